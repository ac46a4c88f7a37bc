//! Shared daemon context (spec.md §9 design note): one explicit struct
//! threaded by reference into every operation, instead of the globals
//! the original C keeps for the proxy dictionary, SSL property bag, and
//! stream table. Built once at mount time and shared behind an `Arc`.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::auth::AuthCache;
use crate::cache::CacheLayer;
use crate::error::DavError;
use crate::pool::StreamSlotPool;
use crate::proxy::{ProxySnapshot, ProxyWatcher};
use crate::queue::RequestQueue;
use crate::trust::{SslProperties, SslTrustNegotiator};

/// User-Agent token plus version, OS, and optional mirrored-mode marker
/// (spec.md §4.G "Build either a request-only..." references the
/// User-Agent header set on every transaction).
pub fn build_user_agent(mirrored: bool) -> String {
    let os = std::env::consts::OS;
    if mirrored {
        format!("WebDAVFS/{} ({os}) (mirrored)", env!("CARGO_PKG_VERSION"))
    } else {
        format!("WebDAVFS/{} ({os})", env!("CARGO_PKG_VERSION"))
    }
}

/// The two `reqwest::blocking::Client`s kept in sync with the current
/// proxy snapshot and SSL property bag: one follows redirects (every
/// idempotent operation) and one never does, for `PUT` (spec.md §4.G,
/// "PUT MUST NOT auto-redirect per RFC 2616 §10.3" — the blocking API
/// has no per-request redirect override, so this is the client-level
/// equivalent of that rule).
struct ClientPair {
    default: reqwest::blocking::Client,
    no_redirect: reqwest::blocking::Client,
}

/// The proxy snapshot and SSL property bag a `ClientPair` was last built
/// from, so `sync_network_state` can tell whether a rebuild is actually
/// needed instead of paying for one on every request.
#[derive(Clone, Default, PartialEq)]
struct AppliedNetworkState {
    proxy: ProxySnapshot,
    ssl: SslProperties,
}

fn build_client_pair(
    timeout: Duration,
    proxy: &ProxySnapshot,
    ssl: &SslProperties,
) -> Result<ClientPair, DavError> {
    let base = || -> Result<reqwest::blocking::ClientBuilder, DavError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if proxy.http.enabled {
            let url = format!("http://{}:{}", proxy.http.host, proxy.http.port);
            builder = builder.proxy(reqwest::Proxy::http(url)?);
        }
        if proxy.https.enabled {
            let url = format!("http://{}:{}", proxy.https.host, proxy.https.port);
            builder = builder.proxy(reqwest::Proxy::https(url)?);
        }
        if !proxy.http.enabled && !proxy.https.enabled {
            builder = builder.no_proxy();
        }
        // The property bag has no separate toggle per fault class, only
        // "skip certificate validation" — every accepted-fault flag maps
        // onto the same reqwest knob.
        let accept_invalid =
            ssl.allows_expired_certs || ssl.allows_expired_roots || !ssl.validates_cert_chain || ssl.allows_any_root;
        builder = builder.danger_accept_invalid_certs(accept_invalid);
        if ssl.level_pinned {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_0);
        }
        Ok(builder)
    };

    let default = base()?.build()?;
    let no_redirect = base()?.redirect(reqwest::redirect::Policy::none()).build()?;
    Ok(ClientPair { default, no_redirect })
}

/// Everything a transaction or operation needs that outlives any single
/// request. Cheap to clone (just `Arc` bumps).
pub struct MountContext {
    pub base_url: url::Url,
    clients: RwLock<ClientPair>,
    client_timeout: Duration,
    applied: Mutex<AppliedNetworkState>,
    pub pool: Arc<StreamSlotPool>,
    pub proxy: Arc<ProxyWatcher>,
    pub trust: Arc<SslTrustNegotiator>,
    pub auth: Arc<dyn AuthCache>,
    pub cache: Arc<dyn CacheLayer>,
    pub queue: Arc<dyn RequestQueue>,
    pub user_agent: String,
    pub x_source_id: String,
    pub uid: u32,
    pub read_only: bool,
    pub freshness_window: chrono::Duration,
    pub page_size: usize,
}

impl MountContext {
    /// Builds the context, including the initial client pair from
    /// whatever the proxy watcher and trust negotiator report right now.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: url::Url,
        client_timeout: Duration,
        pool: Arc<StreamSlotPool>,
        proxy: Arc<ProxyWatcher>,
        trust: Arc<SslTrustNegotiator>,
        auth: Arc<dyn AuthCache>,
        cache: Arc<dyn CacheLayer>,
        queue: Arc<dyn RequestQueue>,
        user_agent: String,
        x_source_id: String,
        uid: u32,
        read_only: bool,
        freshness_window: chrono::Duration,
        page_size: usize,
    ) -> Result<Self, DavError> {
        let proxy_snapshot = proxy.snapshot();
        let ssl_props = trust.properties();
        let clients = build_client_pair(client_timeout, &proxy_snapshot, &ssl_props)?;
        Ok(Self {
            base_url,
            clients: RwLock::new(clients),
            client_timeout,
            applied: Mutex::new(AppliedNetworkState { proxy: proxy_snapshot, ssl: ssl_props }),
            pool,
            proxy,
            trust,
            auth,
            cache,
            queue,
            user_agent,
            x_source_id,
            uid,
            read_only,
            freshness_window,
            page_size,
        })
    }

    /// Re-reads the proxy snapshot and SSL property bag and, if either
    /// changed since the clients were last built, rebuilds both (spec.md
    /// §4.G stream-open procedure: "Apply proxy snapshot (under C's
    /// mutex) and SSL property bag (under E's state)"). Called by the
    /// transaction engine before every send attempt.
    pub fn sync_network_state(&self) -> Result<(), DavError> {
        let proxy_snapshot = self.proxy.snapshot();
        let ssl_props = self.trust.properties();
        let mut applied = self.applied.lock().expect("applied network state mutex poisoned");
        if applied.proxy == proxy_snapshot && applied.ssl == ssl_props {
            return Ok(());
        }
        let clients = build_client_pair(self.client_timeout, &proxy_snapshot, &ssl_props)?;
        *self.clients.write().expect("client pair lock poisoned") = clients;
        *applied = AppliedNetworkState { proxy: proxy_snapshot, ssl: ssl_props };
        Ok(())
    }

    /// Returns a cheap clone of the client currently in effect.
    /// `follow_redirects` selects between the redirect-following client
    /// (every idempotent operation) and the one built with
    /// `Policy::none()` (`PUT`, per RFC 2616 §10.3).
    pub fn client(&self, follow_redirects: bool) -> reqwest::blocking::Client {
        let guard = self.clients.read().expect("client pair lock poisoned");
        if follow_redirects {
            guard.default.clone()
        } else {
            guard.no_redirect.clone()
        }
    }

    /// `X-Source-Id` is a stable per-daemon-instance identifier the
    /// original attaches to every request so a server-side access log can
    /// correlate requests from one mount; this port derives it from the
    /// process id and mount start time instead of the original's host
    /// UUID plus volume id, since neither concept has a portable
    /// equivalent here.
    pub fn build_x_source_id(start: chrono::DateTime<chrono::Utc>) -> String {
        format!("webdavfs-{}-{}", std::process::id(), start.timestamp())
    }

    pub fn page_size_from_sysconf() -> usize {
        // SAFETY: sysconf with a valid name argument never touches memory
        // it isn't supposed to; a negative return just means "unknown".
        let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if value > 0 {
            value as usize
        } else {
            4096
        }
    }
}
