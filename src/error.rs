//! Error kinds surfaced by the network subsystem (spec.md §7, §4.H).

use thiserror::Error;

/// Errors surfaced upward out of the transaction engine and WebDAV
/// operations. Mirrors the status-to-errno mapping in §4.H plus the
/// non-HTTP failure modes listed in §7.
#[derive(Error, Debug)]
pub enum DavError {
    /// 401/407 survived the auth retry loop without the cache ever
    /// supplying credentials the server accepted.
    #[error("authentication required")]
    AuthRequired,

    /// 402/403.
    #[error("permission denied")]
    PermissionDenied,

    /// 404/409/410.
    #[error("not found")]
    NotFound,

    /// 414.
    #[error("name too long")]
    NameTooLong,

    /// 423/424.
    #[error("resource busy or locked")]
    Busy,

    /// 507.
    #[error("no space left on device")]
    NoSpace,

    /// Any other 4xx.
    #[error("invalid request (status {0})")]
    Invalid(u16),

    /// Any transport failure: connect/read/write errors, a second
    /// consecutive EPIPE, or an unexpected 1xx/3xx/5xx.
    #[error("I/O error: {0}")]
    Io(String),

    /// OPTIONS on the base URL reported DAV level 0.
    #[error("device not configured: server does not advertise any DAV level")]
    DeviceNotConfigured,

    /// The user declined the certificate-confirmation UI helper.
    #[error("cancelled by user")]
    Cancelled,

    /// A growable buffer could not be extended.
    #[error("out of memory")]
    OutOfMemory,

    /// A directory rename/remove target was not empty (§4.I dir-is-empty).
    #[error("directory not empty")]
    NotEmpty,

    #[error("I/O error: {source}")]
    StdIo {
        #[from]
        source: std::io::Error,
    },

    #[error("HTTP transport error: {source}")]
    Reqwest {
        #[from]
        source: reqwest::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("invalid URL: {source}")]
    Url {
        #[from]
        source: url::ParseError,
    },
}

impl DavError {
    /// Returns a user-friendly suggestion, in the style the CLI front-end
    /// prints alongside every error.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            DavError::AuthRequired => Some("Check the mount's stored credentials."),
            DavError::PermissionDenied => {
                Some("The server rejected this operation for the current user.")
            }
            DavError::NotFound => Some("The remote path does not exist."),
            DavError::NameTooLong => Some("Shorten the file or directory name."),
            DavError::Busy => Some("The resource is locked by another client; retry later."),
            DavError::NoSpace => Some("The server reports insufficient storage."),
            DavError::DeviceNotConfigured => {
                Some("The base URL does not appear to be a WebDAV collection.")
            }
            DavError::Cancelled => Some("The certificate was not accepted."),
            DavError::NotEmpty => Some("Remove the directory's contents first."),
            _ => None,
        }
    }

    /// Maps an HTTP status code to a `DavError`, per spec.md §4.H.
    ///
    /// `translate_status_to_error` in the original source falls through
    /// from case 414 into 423/424 without a `break`; this is preserved
    /// deliberately (§9 "Ambiguity / possible bug") rather than treated as
    /// a typo, and is pinned by `status_414_is_name_too_long` and
    /// `status_423_424_are_busy` below.
    pub fn from_status(status: u16) -> Option<DavError> {
        match status / 100 {
            2 => None,
            4 => Some(match status {
                401 | 407 => DavError::AuthRequired,
                402 | 403 => DavError::PermissionDenied,
                404 | 409 | 410 => DavError::NotFound,
                414 => DavError::NameTooLong,
                423 | 424 => DavError::Busy,
                _ => DavError::Invalid(status),
            }),
            5 => Some(if status == 507 {
                DavError::NoSpace
            } else {
                DavError::Io(format!("unexpected server error {status}"))
            }),
            _ => Some(DavError::Io(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_maps_to_none() {
        for status in [200, 201, 204, 206, 207] {
            assert!(DavError::from_status(status).is_none());
        }
    }

    #[test]
    fn auth_required_for_401_and_407() {
        assert!(matches!(DavError::from_status(401), Some(DavError::AuthRequired)));
        assert!(matches!(DavError::from_status(407), Some(DavError::AuthRequired)));
    }

    #[test]
    fn permission_denied_for_402_and_403() {
        assert!(matches!(DavError::from_status(402), Some(DavError::PermissionDenied)));
        assert!(matches!(DavError::from_status(403), Some(DavError::PermissionDenied)));
    }

    #[test]
    fn not_found_for_404_409_410() {
        for status in [404, 409, 410] {
            assert!(matches!(DavError::from_status(status), Some(DavError::NotFound)));
        }
    }

    #[test]
    fn status_414_is_name_too_long() {
        assert!(matches!(DavError::from_status(414), Some(DavError::NameTooLong)));
    }

    #[test]
    fn status_423_424_are_busy() {
        assert!(matches!(DavError::from_status(423), Some(DavError::Busy)));
        assert!(matches!(DavError::from_status(424), Some(DavError::Busy)));
    }

    #[test]
    fn status_507_is_no_space() {
        assert!(matches!(DavError::from_status(507), Some(DavError::NoSpace)));
    }

    #[test]
    fn other_4xx_is_invalid() {
        assert!(matches!(DavError::from_status(418), Some(DavError::Invalid(418))));
    }

    #[test]
    fn other_5xx_is_io_error() {
        assert!(matches!(DavError::from_status(500), Some(DavError::Io(_))));
    }

    #[test]
    fn unmapped_1xx_3xx_is_io_error() {
        assert!(matches!(DavError::from_status(100), Some(DavError::Io(_))));
        assert!(matches!(DavError::from_status(301), Some(DavError::Io(_))));
    }

    #[test]
    fn suggestions_exist_for_mapped_kinds() {
        assert!(DavError::NotFound.suggestion().is_some());
        assert!(DavError::Busy.suggestion().is_some());
        assert!(DavError::Invalid(418).suggestion().is_none());
    }
}
