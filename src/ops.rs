//! WebDAV operations (spec.md §4.I).
//!
//! Each function follows the common recipe the spec calls out: build the
//! URL via `url_builder`, construct headers (and an XML body for
//! PROPFIND/LOCK) and hand off to the transaction engine, then parse the
//! response via `dav_xml`.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, ETAG, LAST_MODIFIED};

use crate::cache::CacheMeta;
use crate::context::MountContext;
use crate::dav_xml::{self, DavResource};
use crate::error::DavError;
use crate::lexer::{format_rfc1123, parse_http_date};
use crate::node::{DownloadStatus, Node, NodeType};
use crate::transaction::{get_transaction_to_cache, transaction_from_file, transaction_to_buffer};
use crate::url_builder::build_url;

fn header(name: HeaderName, value: impl AsRef<str>) -> (HeaderName, HeaderValue) {
    (name, HeaderValue::from_str(value.as_ref()).expect("header value is valid ASCII"))
}

fn depth_header(depth: u8) -> (HeaderName, HeaderValue) {
    header(HeaderName::from_static("depth"), depth.to_string())
}

/// The overall DAV level observed on a mount, per RFC 2518 §9.1 and
/// spec.md §4.I "mount".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DavLevel {
    /// No DAV support advertised at all.
    None,
    /// Level 1: no locking support, mount read-only.
    ReadOnly,
    /// Level 2: locking supported.
    Full,
}

pub struct MountResult {
    pub level: DavLevel,
    pub root: DavResource,
}

/// `mount` = OPTIONS then stat on the base URL (spec.md §4.I).
pub fn mount(ctx: &MountContext) -> Result<MountResult, DavError> {
    let (resp, _) = transaction_to_buffer(
        ctx,
        reqwest::Method::OPTIONS,
        ctx.base_url.clone(),
        &[header(ACCEPT, "*/*")],
        None,
        true,
    )?;
    let dav_header = resp
        .headers
        .get(HeaderName::from_static("dav"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let level = match dav_xml::parse_dav_level(dav_header) {
        0 => return Err(DavError::DeviceNotConfigured),
        1 => DavLevel::ReadOnly,
        _ => DavLevel::Full,
    };

    let root = stat(ctx, "")?;
    Ok(MountResult { level, root })
}

/// `stat` = PROPFIND depth 0 asking `{getlastmodified, getcontentlength,
/// resourcetype}`.
pub fn stat(ctx: &MountContext, relative_path: &str) -> Result<DavResource, DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let body = dav_xml::build_propfind_body(dav_xml::PROPS_STAT);
    let (resp, raw) = transaction_to_buffer(
        ctx,
        propfind_method(),
        url,
        &[depth_header(0), header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")],
        Some(body),
        true,
    )?;
    let _ = resp;
    let mut resources = dav_xml::parse_multistatus(&raw)?;
    resources.pop().ok_or(DavError::NotFound)
}

/// `dir-is-empty` = PROPFIND depth 1 asking `{resourcetype}`; more than
/// one member (the directory itself plus at least one child) means
/// NOT_EMPTY.
pub fn dir_is_empty(ctx: &MountContext, relative_path: &str) -> Result<bool, DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let body = dav_xml::build_propfind_body(dav_xml::PROPS_DIR_IS_EMPTY);
    let (_resp, raw) = transaction_to_buffer(
        ctx,
        propfind_method(),
        url,
        &[depth_header(1), header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")],
        Some(body),
        true,
    )?;
    let resources = dav_xml::parse_multistatus(&raw)?;
    Ok(resources.len() <= 1)
}

/// `readdir` = PROPFIND depth 1 asking `{getlastmodified,
/// getcontentlength, resourcetype}` (plus `appledoubleheader` when
/// `mirrored` mode is active).
pub fn readdir(ctx: &MountContext, relative_path: &str, mirrored: bool) -> Result<Vec<DavResource>, DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let mut props = dav_xml::PROPS_READDIR.to_vec();
    if mirrored {
        props.push(dav_xml::PROP_APPLEDOUBLEHEADER);
    }
    let body = dav_xml::build_propfind_body(&props);
    let (_resp, raw) = transaction_to_buffer(
        ctx,
        propfind_method(),
        url,
        &[depth_header(1), header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")],
        Some(body),
        true,
    )?;
    let mut resources = dav_xml::parse_multistatus(&raw)?;
    if !resources.is_empty() {
        resources.remove(0); // drop the directory's own entry, keep children
    }
    Ok(resources)
}

/// `statfs` = PROPFIND depth 0 asking `{quota-available-bytes,
/// quota-used-bytes}` on the base URL.
pub fn statfs(ctx: &MountContext) -> Result<(Option<u64>, Option<u64>), DavError> {
    let url = build_url(&ctx.base_url, "", None)?;
    let body = dav_xml::build_propfind_body(dav_xml::PROPS_STATFS);
    let (_resp, raw) = transaction_to_buffer(
        ctx,
        propfind_method(),
        url,
        &[depth_header(0), header(CONTENT_TYPE, "text/xml; charset=\"utf-8\"")],
        Some(body),
        true,
    )?;
    let mut resources = dav_xml::parse_multistatus(&raw)?;
    let resource = resources.pop().ok_or(DavError::NotFound)?;
    Ok((resource.quota_available_bytes, resource.quota_used_bytes))
}

/// `open for read` (spec.md §4.I): conditional GET driven by the node's
/// current download/validator state, writing straight to the cache
/// file through the background-capable transaction variant.
pub fn open_for_read(ctx: Arc<MountContext>, node: Arc<Node>, relative_path: &str) -> Result<usize, DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let (last_modified, _etag) = node.validators();

    let mut headers = Vec::new();
    match node.download_status() {
        DownloadStatus::Finished if last_modified >= 0 => {
            let t = chrono::DateTime::<Utc>::from_timestamp(last_modified, 0).unwrap_or_else(Utc::now);
            headers.push(header(reqwest::header::IF_MODIFIED_SINCE, format_rfc1123(t)));
        }
        DownloadStatus::InProgress if last_modified >= 0 => {
            let t = chrono::DateTime::<Utc>::from_timestamp(last_modified, 0).unwrap_or_else(Utc::now);
            headers.push(header(reqwest::header::IF_RANGE, format_rfc1123(t)));
            let current_len = ctx
                .cache
                .open_for_read(&node)
                .and_then(|f| f.metadata().map_err(|e| DavError::Io(e.to_string())))
                .map(|m| m.len())
                .unwrap_or(0);
            headers.push(header(reqwest::header::RANGE, format!("bytes={current_len}-")));
        }
        _ => {}
    }

    get_transaction_to_cache(ctx, node, url, &headers)
}

/// `read (byte range)` = GET with `Range: bytes=off-end`.
pub fn read_range(ctx: Arc<MountContext>, node: Arc<Node>, relative_path: &str, offset: u64, len: u64) -> Result<usize, DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let end = offset + len.saturating_sub(1);
    let headers = vec![header(reqwest::header::RANGE, format!("bytes={offset}-{end}"))];
    get_transaction_to_cache(ctx, node, url, &headers)
}

/// `fsync / write-through` = PUT with the cache fd as body.
pub fn write_through(ctx: &MountContext, node: &Node, relative_path: &str) -> Result<(), DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let file = ctx.cache.open_for_read(node)?;
    let len = file.metadata().map_err(|e| DavError::Io(e.to_string()))?.len();

    let mut headers = Vec::new();
    if let Some((token, _uid)) = node.lock_token() {
        headers.push(header(HeaderName::from_static("if"), format!("(<{token}>)")));
    }

    let resp = transaction_from_file(ctx, url, &headers, file, len)?;

    let last_modified = resp
        .headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .map(|dt| dt.timestamp());
    let etag = resp.headers.get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_string);

    if let (Some(lm), Some(et)) = (last_modified, etag.clone()) {
        node.set_validators(lm, Some(et));
    } else {
        // Server didn't echo validators on the PUT response: a follow-up
        // PROPFIND asking just for them resolves the node's new state.
        let resource = stat(ctx, relative_path)?;
        let lm = resource
            .last_modified
            .as_deref()
            .and_then(parse_http_date)
            .map(|dt| dt.timestamp())
            .unwrap_or(-1);
        node.set_validators(lm, resource.etag);
    }

    ctx.cache.save_meta(node, &CacheMeta {
        last_modified: last_modified.unwrap_or(-1),
        entity_tag: etag,
        appledoubleheader_uid: None,
    })?;
    Ok(())
}

/// `create` = PUT with empty body, no auto-redirect; records the
/// server's `Date` as creation time.
pub fn create(ctx: &MountContext, relative_path: &str) -> Result<i64, DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let (resp, _) = transaction_to_buffer(ctx, reqwest::Method::PUT, url, &[], Some(Vec::new()), false)?;
    let created = resp
        .headers
        .get(reqwest::header::DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| Utc::now().timestamp());
    Ok(created)
}

/// `mkdir` = MKCOL.
pub fn mkdir(ctx: &MountContext, relative_path: &str) -> Result<i64, DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let (resp, _) = transaction_to_buffer(ctx, mkcol_method(), url, &[], None, true)?;
    let created = resp
        .headers
        .get(reqwest::header::DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| Utc::now().timestamp());
    Ok(created)
}

/// `remove / rmdir` = DELETE. Directory removal is preceded by a
/// dir-is-empty check at the caller's discretion (spec.md §4.I); this
/// function performs the check itself when `is_directory` is set.
pub fn remove(ctx: &MountContext, node: &Node, relative_path: &str) -> Result<(), DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    if node.is_directory() && !dir_is_empty(ctx, relative_path)? {
        return Err(DavError::NotEmpty);
    }
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let mut headers = Vec::new();
    if let Some((token, _uid)) = node.lock_token() {
        headers.push(header(HeaderName::from_static("if"), format!("(<{token}>)")));
    }
    transaction_to_buffer(ctx, reqwest::Method::DELETE, url, &headers, None, true)?;
    Ok(())
}

/// `rename` = MOVE with `Destination: <abs-url>`.
pub fn rename(
    ctx: &MountContext,
    source_relative: &str,
    dest_relative: &str,
    dest_is_directory: bool,
) -> Result<(), DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    if source_relative == dest_relative {
        return Ok(());
    }
    if dest_is_directory && !dir_is_empty(ctx, dest_relative)? {
        return Err(DavError::NotEmpty);
    }

    let source_url = build_url(&ctx.base_url, source_relative, None)?;
    let dest_url = build_url(&ctx.base_url, dest_relative, None)?;
    let headers = vec![header(HeaderName::from_static("destination"), dest_url.as_str())];
    transaction_to_buffer(ctx, move_method(), source_url, &headers, None, true)?;
    Ok(())
}

/// `lock / refresh` = LOCK depth 0. `existing_token` being `None` means
/// a fresh lock (sends a `lockinfo` body); `Some` means a refresh (sends
/// `If: (<token>)` with no body).
pub fn lock(
    ctx: &MountContext,
    relative_path: &str,
    owner_href: &str,
    timeout_secs: u64,
    existing_token: Option<&str>,
) -> Result<String, DavError> {
    if ctx.read_only {
        return Err(DavError::PermissionDenied);
    }
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let mut headers = vec![header(
        HeaderName::from_static("timeout"),
        format!("Second-{timeout_secs}"),
    )];

    let (resp, _) = if let Some(token) = existing_token {
        headers.push(header(HeaderName::from_static("if"), format!("(<{token}>)")));
        transaction_to_buffer(ctx, lock_method(), url, &headers, None, true)?
    } else {
        headers.push(header(CONTENT_TYPE, "text/xml; charset=\"utf-8\""));
        let body = dav_xml::build_lockinfo_body(owner_href);
        transaction_to_buffer(ctx, lock_method(), url, &headers, Some(body), true)?
    };

    resp.headers
        .get(HeaderName::from_static("lock-token"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start_matches('<').trim_end_matches('>').to_string())
        .ok_or(DavError::Io("LOCK response carried no Lock-Token header".into()))
}

/// `unlock` = UNLOCK with `Lock-Token: <token>`.
pub fn unlock(ctx: &MountContext, relative_path: &str, token: &str) -> Result<(), DavError> {
    let url = build_url(&ctx.base_url, relative_path, None)?;
    let headers = vec![header(HeaderName::from_static("lock-token"), format!("<{token}>"))];
    transaction_to_buffer(ctx, unlock_method(), url, &headers, None, true)?;
    Ok(())
}

fn propfind_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"PROPFIND").expect("PROPFIND is a valid method token")
}
fn mkcol_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"MKCOL").expect("MKCOL is a valid method token")
}
fn move_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"MOVE").expect("MOVE is a valid method token")
}
fn lock_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"LOCK").expect("LOCK is a valid method token")
}
fn unlock_method() -> reqwest::Method {
    reqwest::Method::from_bytes(b"UNLOCK").expect("UNLOCK is a valid method token")
}

#[allow(dead_code)]
fn node_type_from_resource(resource: &DavResource) -> NodeType {
    if resource.is_collection {
        NodeType::Directory
    } else {
        NodeType::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_header_formats_value() {
        let (name, value) = depth_header(1);
        assert_eq!(name.as_str(), "depth");
        assert_eq!(value.to_str().unwrap(), "1");
    }

    #[test]
    fn node_type_from_resource_maps_collection_flag() {
        let r = DavResource {
            href: "/a/".into(),
            is_collection: true,
            content_length: None,
            last_modified: None,
            etag: None,
            quota_available_bytes: None,
            quota_used_bytes: None,
            appledoubleheader: None,
        };
        assert_eq!(node_type_from_resource(&r), NodeType::Directory);
    }
}
