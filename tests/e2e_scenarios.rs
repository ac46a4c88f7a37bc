//! End-to-end scenarios against a scripted HTTP server (spec.md §8,
//! scenarios S1-S6), driven directly through the library surface rather
//! than the `webdavfs-mount` binary, since there's no kernel-side shim
//! in this test environment to actually mount anything.

mod support;

use std::sync::Arc;

use webdavfs::auth::{Auth, AuthCache, BasicAuthCache};
use webdavfs::cache::DiskCache;
use webdavfs::context::MountContext;
use webdavfs::node::{Node, NodeType};
use webdavfs::ops;
use webdavfs::pool::StreamSlotPool;
use webdavfs::proxy::ProxyWatcher;
use webdavfs::queue::InlineQueue;
use webdavfs::trust::{AutoAcceptCertPrompt, SslTrustNegotiator};

use support::scripted_server::{ScriptedResponse, ScriptedServer};

fn test_context(base_url: &str, cache_dir: &std::path::Path) -> Arc<MountContext> {
    let auth: Arc<dyn AuthCache> = Arc::new(BasicAuthCache::new(Auth::None));
    Arc::new(
        MountContext::new(
            url::Url::parse(base_url).unwrap(),
            std::time::Duration::from_secs(60),
            Arc::new(StreamSlotPool::new(2)),
            Arc::new(ProxyWatcher::new(None)),
            Arc::new(SslTrustNegotiator::new(Box::new(AutoAcceptCertPrompt))),
            auth,
            Arc::new(DiskCache::new(cache_dir).unwrap()),
            Arc::new(InlineQueue),
            webdavfs::context::build_user_agent(false),
            "test-source".into(),
            501,
            false,
            chrono::Duration::seconds(30),
            64, // small, to exercise the background-handoff path deterministically
        )
        .unwrap(),
    )
}

const MULTISTATUS_ROOT: &str = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/</D:href>
    <D:propstat>
      <D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop>
      <D:status>HTTP/1.1 200 OK</D:status>
    </D:propstat>
  </D:response>
</D:multistatus>"#;

/// S1: OPTIONS + PROPFIND mount — the daemon discovers DAV level 2 and
/// stats the root collection.
#[test]
fn s1_options_propfind_mount() {
    let server = ScriptedServer::start(vec![
        ScriptedResponse::new(200, "OK").header("DAV", "1, 2"),
        ScriptedResponse::new(207, "Multi-Status")
            .header("Content-Type", "text/xml")
            .body(MULTISTATUS_ROOT),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let result = ops::mount(&ctx).expect("mount should succeed");
    assert_eq!(result.level, ops::DavLevel::Full);
    assert!(result.root.is_collection);
    assert_eq!(server.recorded(), vec!["OPTIONS /", "PROPFIND /"]);
}

/// S2: a level-1 server (no locking) still mounts, just without full
/// DAV support.
#[test]
fn s2_read_only_level_1_mount() {
    let server = ScriptedServer::start(vec![
        ScriptedResponse::new(200, "OK").header("DAV", "1"),
        ScriptedResponse::new(207, "Multi-Status")
            .header("Content-Type", "text/xml")
            .body(MULTISTATUS_ROOT),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let result = ops::mount(&ctx).expect("mount should succeed");
    assert_eq!(result.level, ops::DavLevel::ReadOnly);
}

/// S3: write with a lock token attached as an `If` header.
#[test]
fn s3_write_with_lock_token() {
    let server = ScriptedServer::start(vec![
        ScriptedResponse::new(200, "OK")
            .header("Last-Modified", "Wed, 21 Oct 2026 07:28:00 GMT")
            .header("ETag", "\"v2\""),
    ]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let node = Node::new("locked.txt", NodeType::File, 1);
    node.set_lock(Some("opaquelocktoken:abc-123".into()), Some(501));
    {
        let mut f = ctx.cache.open_for_write(&node, true).unwrap();
        webdavfs::cache::append_all(&mut f, b"hello").unwrap();
    }

    ops::write_through(&ctx, &node, "locked.txt").expect("write-through should succeed");

    let recorded = server.requests.lock().unwrap();
    let req = &recorded[0];
    assert_eq!(req.method, "PUT");
    assert!(req.headers.iter().any(|(n, v)| n.eq_ignore_ascii_case("if") && v.contains("opaquelocktoken:abc-123")));
}

/// S4: conditional GET returns 304 — the cache file and node validators
/// are untouched, download status remains finished.
#[test]
fn s4_conditional_get_not_modified() {
    let server = ScriptedServer::start(vec![ScriptedResponse::new(304, "Not Modified")]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let node = Arc::new(Node::new("cached.txt", NodeType::File, 2));
    node.set_download_status(webdavfs::node::DownloadStatus::Finished);
    node.set_validators(1_700_000_000, Some("\"v1\"".into()));

    let url = ctx.base_url.join("cached.txt").unwrap();
    let n = webdavfs::transaction::get_transaction_to_cache(Arc::clone(&ctx), Arc::clone(&node), url, &[])
        .expect("304 short-circuit should succeed");

    assert_eq!(n, 0);
    assert_eq!(node.download_status(), webdavfs::node::DownloadStatus::Finished);
    assert_eq!(node.validators().1.as_deref(), Some("\"v1\""));
}

/// S5: a GET larger than `page_size` hands the remainder off to the
/// background queue; the call returns as soon as the first page is
/// written, and (since this test uses `InlineQueue`) the background
/// finisher has already run by the time we check the node's status.
#[test]
fn s5_background_download_completes_via_queue() {
    let body = vec![b'x'; 500]; // > page_size (64)
    let server = ScriptedServer::start(vec![ScriptedResponse::new(200, "OK")
        .header("Last-Modified", "Wed, 21 Oct 2026 07:28:00 GMT")
        .header("ETag", "\"v9\"")
        .body(body.clone())]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let node = Arc::new(Node::new("big.bin", NodeType::File, 3));
    let url = ctx.base_url.join("big.bin").unwrap();

    let first_read = webdavfs::transaction::get_transaction_to_cache(Arc::clone(&ctx), Arc::clone(&node), url, &[])
        .expect("GET should succeed");
    assert_eq!(first_read, 64);

    // InlineQueue runs the finisher synchronously, so by the time
    // get_transaction_to_cache returns, the whole body is already on disk.
    assert_eq!(node.download_status(), webdavfs::node::DownloadStatus::Finished);
    assert_eq!(node.validators().1.as_deref(), Some("\"v9\""));

    let mut file = ctx.cache.open_for_read(&node).unwrap();
    let on_disk = webdavfs::cache::read_range(&mut file, 0, body.len()).unwrap();
    assert_eq!(on_disk, body);
}

/// S6: renaming onto a non-empty directory is rejected before any MOVE
/// is issued.
#[test]
fn s6_rename_over_non_empty_directory_is_rejected() {
    let nonempty_listing = r#"<?xml version="1.0"?>
<D:multistatus xmlns:D="DAV:">
  <D:response>
    <D:href>/dest/</D:href>
    <D:propstat><D:prop><D:resourcetype><D:collection/></D:resourcetype></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
  </D:response>
  <D:response>
    <D:href>/dest/existing.txt</D:href>
    <D:propstat><D:prop><D:resourcetype/></D:prop><D:status>HTTP/1.1 200 OK</D:status></D:propstat>
  </D:response>
</D:multistatus>"#;
    let server = ScriptedServer::start(vec![ScriptedResponse::new(207, "Multi-Status")
        .header("Content-Type", "text/xml")
        .body(nonempty_listing)]);
    let cache_dir = tempfile::tempdir().unwrap();
    let ctx = test_context(&server.base_url, cache_dir.path());

    let result = ops::rename(&ctx, "source.txt", "dest", true);
    assert!(matches!(result, Err(webdavfs::error::DavError::NotEmpty)));
    // Only the depth-1 PROPFIND on the destination was issued, no MOVE.
    assert_eq!(server.recorded(), vec!["PROPFIND /dest"]);
}
