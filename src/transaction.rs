//! Transaction engine (spec.md §4.G).
//!
//! Grounded on `send_transaction`, `stream_transaction`,
//! `stream_transaction_from_file`, `stream_get_transaction`, and
//! `open_stream_for_transaction` in
//! `examples/original_source/mount.tproj/webdav_network.c`. The original
//! drives three CFReadStream-based variants through one shared
//! stream-open/auth-retry skeleton; `reqwest::blocking` replaces the
//! manual buffer-growth and CFStream plumbing but the control flow —
//! build request, apply auth, send, classify, retry — is unchanged.

use std::error::Error as _;
use std::io::Read;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION};
use reqwest::Method;

use crate::auth::{AuthCache, RequestParts};
use crate::cache::{CacheLayer, CacheMeta};
use crate::context::MountContext;
use crate::error::DavError;
use crate::node::{DownloadStatus, Node};
use crate::queue::RequestQueue;
use crate::trust::{SslOutcome, SslTrustNegotiator, TlsFault};

/// An auth loop tries the request, and if challenged, tries again with
/// fresh credentials exactly once — a third 401/407 in a row means the
/// cache has nothing better to offer (spec.md §8 "Auth loop bound").
const MAX_AUTH_ATTEMPTS: u32 = 2;

/// Result of one completed HTTP exchange, stripped of whatever body
/// representation the caller asked for.
pub struct TransactionResponse {
    pub status: u16,
    pub headers: HeaderMap,
}

/// Converts `DavError::from_status` into the request-level decision:
/// retry the whole transaction (on a 401/407 the auth loop hasn't
/// exhausted), or surface whatever mapped error exists, or succeed.
fn classify_status(status: u16, attempt: u32) -> Result<Option<DavError>, ShouldRetryAuth> {
    if (status == 401 || status == 407) && attempt < MAX_AUTH_ATTEMPTS {
        return Err(ShouldRetryAuth);
    }
    Ok(DavError::from_status(status))
}

struct ShouldRetryAuth;

fn classify_io_error(err: &reqwest::Error) -> bool {
    // Mirrors the original's `streamError.domain == kCFStreamErrorDomainPOSIX
    // && streamError.error == EPIPE` check: a broken pipe on send is worth
    // exactly one retry of the same transaction, since it usually means the
    // server closed an idle persistent connection out from under us.
    err.source()
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .map(|io| io.kind() == std::io::ErrorKind::BrokenPipe)
        .unwrap_or(false)
}

fn build_request_parts(ctx: &MountContext) -> RequestParts {
    let mut parts = RequestParts::new();
    parts.headers.insert(
        reqwest::header::USER_AGENT,
        HeaderValue::from_str(&ctx.user_agent).expect("user agent is a valid header value"),
    );
    parts.headers.insert(
        HeaderName::from_static("x-source-id"),
        HeaderValue::from_str(&ctx.x_source_id).expect("x-source-id is a valid header value"),
    );
    parts
}

/// Shared send step: one HTTP attempt with the current auth headers
/// applied, returning the raw `reqwest::blocking::Response` so callers
/// can read its body the way their variant needs to (buffered, to a
/// cache file, or discarded). `url` is built by the caller via
/// `url_builder::build_url` — the transaction engine itself never
/// constructs request URLs.
///
/// Leaves the slot leased on success: callers that read the response to
/// completion in the foreground release it themselves right after, while
/// `get_transaction_to_cache` carries it into the background-download
/// handoff instead (spec.md §9 "ownership of the slot transfers with the
/// node into the background worker").
fn send_once(
    ctx: &MountContext,
    method: Method,
    url: url::Url,
    extra_headers: &[(HeaderName, HeaderValue)],
    body: Option<reqwest::blocking::Body>,
    last_status: u16,
    follow_redirects: bool,
) -> Result<(reqwest::blocking::Response, u64, crate::pool::SlotHandle), DavError> {
    // Stream-open procedure (spec.md §4.G): apply the proxy snapshot and
    // the SSL property bag before every attempt, rebuilding the client
    // pair only when one of them actually changed since last time.
    ctx.sync_network_state()?;

    let slot = ctx.pool.acquire();
    let tag = ctx.pool.unique_tag(slot);

    let mut parts = build_request_parts(ctx);
    for (name, value) in extra_headers {
        parts.headers.insert(name.clone(), value.clone());
    }
    let mut generation = 0u64;
    ctx.auth.apply(ctx.uid, &mut parts, last_status, &mut generation)?;
    parts.headers.insert(
        HeaderName::from_static("x-webdavfs-slot"),
        HeaderValue::from_str(&tag).expect("slot tag is a valid header value"),
    );

    ctx.pool.replace_stream(slot);
    let mut builder = ctx.client(follow_redirects).request(method, url).headers(parts.headers);
    if let Some(body) = body {
        builder = builder.body(body);
    }

    let result = builder.send();
    let response = match result {
        Ok(resp) => resp,
        Err(e) => {
            ctx.pool.release(slot);
            return Err(e.into());
        }
    };
    ctx.pool.mark_stream_open(slot);
    let close = response
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false);
    ctx.pool.set_connection_close(slot, close);
    Ok((response, generation, slot))
}

/// Classifies a transport-level send failure into either a retry
/// decision (SSL fault handled, or a one-time EPIPE) or a terminal
/// error, following `HandleSSLErrors`' shape.
fn handle_transport_error(trust: &SslTrustNegotiator, err: reqwest::Error, retried_epipe: &mut bool) -> Result<(), DavError> {
    if err.is_connect() || is_tls_error(&err) {
        let fault = classify_tls_fault(&err);
        return match trust.handle_fault(fault, 0, &[], err.url().and_then(|u| u.host_str()).unwrap_or("")) {
            SslOutcome::Retry => Ok(()),
            SslOutcome::Cancelled => Err(DavError::Cancelled),
            SslOutcome::IoError => Err(err.into()),
        };
    }
    if !*retried_epipe && classify_io_error(&err) {
        *retried_epipe = true;
        return Ok(());
    }
    Err(err.into())
}

fn is_tls_error(err: &reqwest::Error) -> bool {
    err.source().map(|s| s.to_string().to_ascii_lowercase().contains("tls")).unwrap_or(false)
}

fn classify_tls_fault(err: &reqwest::Error) -> TlsFault {
    let text = err.source().map(|s| s.to_string().to_ascii_lowercase()).unwrap_or_default();
    if text.contains("expired") || text.contains("not yet valid") {
        TlsFault::CertExpiredOrNotYetValid
    } else if text.contains("unknown issuer") || text.contains("unknown ca") {
        TlsFault::UnknownOrMissingRoot
    } else if text.contains("hostname") || text.contains("bad certificate") || text.contains("chain") {
        TlsFault::BadCertOrChainOrHostname
    } else if text.contains("protocol version") {
        TlsFault::ProtocolFallback
    } else {
        TlsFault::Other
    }
}

/// Response-to-buffer variant (`stream_transaction`): the whole body is
/// read into memory. Used for PROPFIND, OPTIONS, LOCK, MKCOL, DELETE,
/// MOVE (all safe to auto-redirect), and for `create`'s empty-body PUT
/// (which is not, per RFC 2616 §10.3 — callers pass `follow_redirects`
/// accordingly rather than this variant assuming one answer for every
/// method it serves).
pub fn transaction_to_buffer(
    ctx: &MountContext,
    method: Method,
    url: url::Url,
    extra_headers: &[(HeaderName, HeaderValue)],
    body: Option<Vec<u8>>,
    follow_redirects: bool,
) -> Result<(TransactionResponse, Vec<u8>), DavError> {
    let mut last_status = 0u16;
    let mut attempt = 0u32;
    let mut retried_epipe = false;

    loop {
        let req_body = body.clone().map(reqwest::blocking::Body::from);
        match send_once(ctx, method.clone(), url.clone(), extra_headers, req_body, last_status, follow_redirects) {
            Ok((response, _generation, slot)) => {
                let status = response.status().as_u16();
                match classify_status(status, attempt) {
                    Ok(mapped) => {
                        if let Some(err) = mapped {
                            ctx.pool.release(slot);
                            return Err(err);
                        }
                        let headers = response.headers().clone();
                        let mut buf = Vec::new();
                        let mut response = response;
                        let read_result = response.read_to_end(&mut buf).map_err(|e| DavError::Io(e.to_string()));
                        ctx.pool.release(slot);
                        read_result?;
                        ctx.auth.valid(ctx.uid, 0);
                        return Ok((TransactionResponse { status, headers }, buf));
                    }
                    Err(ShouldRetryAuth) => {
                        ctx.pool.release(slot);
                        attempt += 1;
                        last_status = status;
                        continue;
                    }
                }
            }
            Err(DavError::Reqwest { source }) => {
                handle_transport_error(&ctx.trust, source, &mut retried_epipe)?;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
}

/// Request-body-from-file variant (`stream_transaction_from_file`): used
/// by `PUT` to stream the cache file's contents up without buffering the
/// whole thing in memory.
pub fn transaction_from_file(
    ctx: &MountContext,
    url: url::Url,
    extra_headers: &[(HeaderName, HeaderValue)],
    mut file: std::fs::File,
    content_length: u64,
) -> Result<TransactionResponse, DavError> {
    use std::io::Seek;

    let mut last_status = 0u16;
    let mut attempt = 0u32;
    let mut retried_epipe = false;

    loop {
        // A retry re-sends from the start of the file, whether the prior
        // attempt was an auth challenge or an EPIPE.
        file.seek(std::io::SeekFrom::Start(0)).map_err(|e| DavError::Io(e.to_string()))?;
        let body = reqwest::blocking::Body::sized(
            file.try_clone().map_err(|e| DavError::Io(e.to_string()))?,
            content_length,
        );

        // PUT MUST NOT auto-redirect per RFC 2616 §10.3 (spec.md §4.G).
        match send_once(ctx, Method::PUT, url.clone(), extra_headers, Some(body), last_status, false) {
            Ok((response, _generation, slot)) => {
                let status = response.status().as_u16();
                match classify_status(status, attempt) {
                    Ok(mapped) => {
                        ctx.pool.release(slot);
                        if let Some(err) = mapped {
                            return Err(err);
                        }
                        ctx.auth.valid(ctx.uid, 0);
                        return Ok(TransactionResponse { status, headers: response.headers().clone() });
                    }
                    Err(ShouldRetryAuth) => {
                        ctx.pool.release(slot);
                        attempt += 1;
                        last_status = status;
                        continue;
                    }
                }
            }
            Err(DavError::Reqwest { source }) => {
                handle_transport_error(&ctx.trust, source, &mut retried_epipe)?;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
}

/// Response-to-cache-file variant (`stream_get_transaction`): reads the
/// first `page_size` bytes synchronously so the caller (a read-path
/// `open`) has immediate data to hand back, then — if more remains —
/// hands the rest of the response off to a background worker through
/// `ctx.queue`, matching spec.md §9's "background-download handoff".
pub fn get_transaction_to_cache(
    ctx: Arc<MountContext>,
    node: Arc<Node>,
    url: url::Url,
    extra_headers: &[(HeaderName, HeaderValue)],
) -> Result<usize, DavError> {
    let mut last_status = 0u16;
    let mut attempt = 0u32;
    let mut retried_epipe = false;

    loop {
        match send_once(&ctx, Method::GET, url.clone(), extra_headers, None, last_status, true) {
            Ok((response, _generation, slot)) => {
                let status = response.status().as_u16();

                // §4.I "open for read": 304 means the cache is still
                // current and nothing about the node changes.
                if status == 304 {
                    ctx.pool.release(slot);
                    ctx.auth.valid(ctx.uid, 0);
                    return Ok(0);
                }

                match classify_status(status, attempt) {
                    Ok(mapped) => {
                        if let Some(err) = mapped {
                            ctx.pool.release(slot);
                            return Err(err);
                        }
                        let headers = response.headers().clone();
                        let last_modified = headers
                            .get(reqwest::header::LAST_MODIFIED)
                            .and_then(|v| v.to_str().ok())
                            .and_then(crate::lexer::parse_http_date)
                            .map(|dt| dt.timestamp())
                            .unwrap_or(-1);
                        let etag = headers
                            .get(reqwest::header::ETAG)
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);

                        // 200 rewrites the cache from scratch; 206 (a
                        // resumed partial GET) appends to what's there.
                        let truncate = status != 206;

                        node.set_download_status(DownloadStatus::InProgress);
                        let mut file = match ctx.cache.open_for_write(&node, truncate) {
                            Ok(f) => f,
                            Err(e) => {
                                ctx.pool.release(slot);
                                return Err(e);
                            }
                        };
                        let mut response = response;
                        let mut first_chunk = vec![0u8; ctx.page_size];
                        let mut read_total = 0usize;
                        let read_err = loop {
                            match response.read(&mut first_chunk[read_total..]) {
                                Ok(0) => break None,
                                Ok(n) => {
                                    read_total += n;
                                    if read_total == first_chunk.len() {
                                        break None;
                                    }
                                }
                                Err(e) => break Some(DavError::Io(e.to_string())),
                            }
                        };
                        if let Some(err) = read_err {
                            ctx.pool.release(slot);
                            return Err(err);
                        }
                        first_chunk.truncate(read_total);
                        if let Err(e) = crate::cache::append_all(&mut file, &first_chunk) {
                            ctx.pool.release(slot);
                            return Err(e);
                        }

                        let meta_result = ctx.cache.save_meta(&node, &CacheMeta {
                            last_modified,
                            entity_tag: etag.clone(),
                            appledoubleheader_uid: None,
                        });
                        if let Err(e) = meta_result {
                            ctx.pool.release(slot);
                            return Err(e);
                        }

                        if read_total < ctx.page_size {
                            // Whole body fit in the first read: done already.
                            ctx.pool.release(slot);
                            node.set_download_status(DownloadStatus::Finished);
                            node.set_validators(last_modified, etag);
                            return Ok(read_total);
                        }

                        // Ownership of the slot transfers with the node into
                        // the background worker; the foreground transaction
                        // does not release it here.
                        let node_bg = Arc::clone(&node);
                        let ctx_bg = Arc::clone(&ctx);
                        let mut file_bg = file;
                        let mut response_bg = response;
                        ctx.queue.enqueue_download(Box::new(move || {
                            let mut buf = [0u8; 64 * 1024];
                            loop {
                                if node_bg.is_terminated() {
                                    break;
                                }
                                match response_bg.read(&mut buf) {
                                    Ok(0) => break,
                                    Ok(n) => {
                                        if crate::cache::append_all(&mut file_bg, &buf[..n]).is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            if !node_bg.is_terminated() {
                                node_bg.set_download_status(DownloadStatus::Finished);
                                node_bg.set_validators(last_modified, etag);
                            }
                            ctx_bg.pool.release(slot);
                        }));

                        return Ok(read_total);
                    }
                    Err(ShouldRetryAuth) => {
                        ctx.pool.release(slot);
                        attempt += 1;
                        last_status = status;
                        continue;
                    }
                }
            }
            Err(DavError::Reqwest { source }) => {
                handle_transport_error(&ctx.trust, source, &mut retried_epipe)?;
                continue;
            }
            Err(other) => return Err(other),
        }
    }
}
