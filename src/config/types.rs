//! Mount configuration (spec.md §3 `MountOptions`) plus the verbosity
//! enum shared with the CLI front-end.

use serde::{Deserialize, Serialize};

/// Verbosity level controlling tracing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Suppress all output except errors
    Quiet,
    /// Normal output (info level)
    Normal,
    /// Verbose output (debug level)
    Verbose,
    /// Maximum output (trace level)
    Trace,
}

impl From<(bool, u8)> for Verbosity {
    /// Convert from (quiet_flag, verbose_count) to Verbosity.
    ///
    /// - quiet=true -> Quiet (regardless of verbose count)
    /// - verbose=0  -> Normal
    /// - verbose=1  -> Verbose
    /// - verbose=2+ -> Trace
    fn from((quiet, verbose_count): (bool, u8)) -> Self {
        if quiet {
            Verbosity::Quiet
        } else {
            match verbose_count {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}

impl Verbosity {
    /// Return the tracing filter string for this verbosity level.
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }
}

/// One mount's persisted configuration (spec.md §3 `MountOptions`):
/// exactly one base URL, credentials reference, and the handful of
/// behavioral flags the original mount command line exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub base_url: String,
    pub username: Option<String>,
    /// Read-only: disables PUT/DELETE/MKCOL/MOVE/LOCK.
    #[serde(default)]
    pub read_only: bool,
    /// AppleDouble-header mirroring mode (spec.md §3 "mirrored").
    #[serde(default)]
    pub mirrored: bool,
    /// Worker thread count; also sizes the stream slot pool (N+1 slots).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Seconds a finished download's validators stay fresh without a
    /// revalidation round-trip.
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: i64,
    /// Optional path to a TOML proxy override file, watched for changes.
    #[serde(default)]
    pub proxy_override_path: Option<std::path::PathBuf>,
    /// Path to the certificate-confirmation UI helper binary.
    #[serde(default)]
    pub cert_prompt_helper: Option<std::path::PathBuf>,
}

fn default_worker_threads() -> usize {
    4
}

fn default_freshness_window_secs() -> i64 {
    30
}

impl MountConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, crate::error::DavError> {
        toml::from_str(s).map_err(|e| crate::error::DavError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, crate::error::DavError> {
        toml::to_string_pretty(self).map_err(|e| crate::error::DavError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from((true, 5)), Verbosity::Quiet);
        assert_eq!(Verbosity::from((false, 0)), Verbosity::Normal);
        assert_eq!(Verbosity::from((false, 1)), Verbosity::Verbose);
        assert_eq!(Verbosity::from((false, 2)), Verbosity::Trace);
    }

    #[test]
    fn mount_config_round_trips_through_toml() {
        let cfg = MountConfig {
            base_url: "https://dav.example.com/home/".into(),
            username: Some("alice".into()),
            read_only: false,
            mirrored: true,
            worker_threads: 4,
            freshness_window_secs: 30,
            proxy_override_path: None,
            cert_prompt_helper: None,
        };
        let toml = cfg.to_toml_string().unwrap();
        let parsed = MountConfig::from_toml_str(&toml).unwrap();
        assert_eq!(parsed.base_url, cfg.base_url);
        assert!(parsed.mirrored);
    }

    #[test]
    fn mount_config_defaults_worker_threads_and_freshness() {
        let cfg = MountConfig::from_toml_str(
            r#"base_url = "https://dav.example.com/""#,
        )
        .unwrap();
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.freshness_window_secs, 30);
        assert!(!cfg.read_only);
    }
}
