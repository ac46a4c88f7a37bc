//! Proxy snapshot mirroring (spec.md §4.C).
//!
//! The original reads `SCDynamicStoreCopyProxies` under a notification
//! callback; there's no portable equivalent outside macOS, so this port
//! reads `HTTP_PROXY`/`HTTPS_PROXY` environment variables plus an optional
//! override file, and treats a `notify`-backed filesystem watch on that
//! file as the "descriptor that becomes readable on change" the daemon's
//! main loop selects on (spec.md §9, "mixing polling and notifications").

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use crate::auth::AuthCache;

const HTTP_DEFAULT_PORT: u16 = 80;
const HTTPS_DEFAULT_PORT: u16 = 443;

/// One proxy endpoint, mirrors the `{enabled, host, port}` triple spec.md
/// §3 describes for each of HTTP/HTTPS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// `{http_enabled, http_host, http_port, https_enabled, https_host,
/// https_port, raw_dict}` from spec.md §3, minus `raw_dict` (an
/// implementation detail of the macOS dictionary this port doesn't carry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySnapshot {
    pub http: ProxyEndpoint,
    pub https: ProxyEndpoint,
}

/// Guards the snapshot with one mutex, per spec.md §5.
pub struct ProxyWatcher {
    snapshot: Mutex<ProxySnapshot>,
    override_path: Option<PathBuf>,
    _watcher: Option<RecommendedWatcher>,
}

impl ProxyWatcher {
    /// Reads the initial snapshot from the environment and, if
    /// `override_path` exists, registers a filesystem watch on it so that
    /// edits trigger a refresh exactly like a system proxy-store change
    /// notification would.
    pub fn new(override_path: Option<PathBuf>) -> Self {
        let watcher = Self {
            snapshot: Mutex::new(ProxySnapshot::default()),
            override_path: override_path.clone(),
            _watcher: None,
        };
        watcher.refresh_from_env();
        watcher
    }

    /// Starts watching `override_path` for changes, calling `on_change`
    /// (which should re-run `refresh`) whenever the file is written.
    /// Returns `Ok(())` even if no override path was configured.
    pub fn start_watching<F>(&mut self, mut on_change: F) -> notify::Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let Some(path) = self.override_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        self._watcher = Some(watcher);

        std::thread::Builder::new()
            .name("proxy-watch".into())
            .spawn(move || {
                for res in rx {
                    if res.is_ok() {
                        on_change();
                    }
                }
            })
            .map_err(|e| notify::Error::generic(&e.to_string()))?;
        Ok(())
    }

    /// Re-reads environment variables (and override file, if present) and
    /// atomically rewrites the snapshot under the mutex, then invalidates
    /// proxy credentials in the auth cache, per spec.md §4.C's final step.
    pub fn refresh(&self, auth_cache: &dyn AuthCache) {
        self.refresh_from_env();
        auth_cache.proxy_invalidate();
    }

    fn refresh_from_env(&self) {
        let http = parse_endpoint(
            std::env::var("HTTP_PROXY").or_else(|_| std::env::var("http_proxy")).ok(),
            HTTP_DEFAULT_PORT,
        );
        let https = parse_endpoint(
            std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("https_proxy")).ok(),
            HTTPS_DEFAULT_PORT,
        );
        let overrides = self
            .override_path
            .as_deref()
            .and_then(read_override_file)
            .unwrap_or_default();

        let mut snap = self.snapshot.lock().expect("proxy snapshot mutex poisoned");
        *snap = ProxySnapshot {
            http: overrides.http.unwrap_or(http),
            https: overrides.https.unwrap_or(https),
        };
    }

    /// Returns a copy of the current snapshot, taken under the lock.
    pub fn snapshot(&self) -> ProxySnapshot {
        self.snapshot.lock().expect("proxy snapshot mutex poisoned").clone()
    }
}

fn parse_endpoint(value: Option<String>, default_port: u16) -> ProxyEndpoint {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return ProxyEndpoint::default();
    };
    let Ok(url) = url::Url::parse(&value) else {
        return ProxyEndpoint::default();
    };
    let Some(host) = url.host_str() else {
        return ProxyEndpoint::default();
    };
    let port = url.port().unwrap_or(default_port);
    let port = if port == 0 { default_port } else { port };
    ProxyEndpoint {
        enabled: true,
        host: host.to_string(),
        port,
    }
}

#[derive(Default)]
struct OverrideFile {
    http: Option<ProxyEndpoint>,
    https: Option<ProxyEndpoint>,
}

fn read_override_file(path: &Path) -> Option<OverrideFile> {
    #[derive(serde::Deserialize)]
    struct Raw {
        #[serde(default)]
        http_enabled: Option<bool>,
        #[serde(default)]
        http_host: Option<String>,
        #[serde(default)]
        http_port: Option<u16>,
        #[serde(default)]
        https_enabled: Option<bool>,
        #[serde(default)]
        https_host: Option<String>,
        #[serde(default)]
        https_port: Option<u16>,
    }

    let contents = std::fs::read_to_string(path).ok()?;
    let raw: Raw = toml::from_str(&contents).ok()?;
    Some(OverrideFile {
        http: raw.http_host.map(|host| ProxyEndpoint {
            enabled: raw.http_enabled.unwrap_or(true),
            host,
            port: match raw.http_port {
                Some(0) | None => HTTP_DEFAULT_PORT,
                Some(p) => p,
            },
        }),
        https: raw.https_host.map(|host| ProxyEndpoint {
            enabled: raw.https_enabled.unwrap_or(true),
            host,
            port: match raw.https_port {
                Some(0) | None => HTTPS_DEFAULT_PORT,
                Some(p) => p,
            },
        }),
    })
}

/// Shared, reference-counted handle used throughout the daemon context.
pub type SharedProxyWatcher = Arc<ProxyWatcher>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAuthCache(AtomicUsize);
    impl AuthCache for CountingAuthCache {
        fn apply(
            &self,
            _uid: u32,
            _request: &mut crate::auth::RequestParts,
            _last_status: u16,
            _generation: &mut u64,
        ) -> Result<(), crate::error::DavError> {
            Ok(())
        }
        fn valid(&self, _uid: u32, _generation: u64) {}
        fn proxy_invalidate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn disabled_when_env_missing() {
        std::env::remove_var("HTTP_PROXY");
        std::env::remove_var("HTTPS_PROXY");
        let watcher = ProxyWatcher::new(None);
        let snap = watcher.snapshot();
        assert!(!snap.http.enabled);
        assert!(!snap.https.enabled);
    }

    #[test]
    fn defaults_port_when_missing() {
        std::env::set_var("HTTP_PROXY", "http://proxy.example.com");
        let watcher = ProxyWatcher::new(None);
        let snap = watcher.snapshot();
        assert!(snap.http.enabled);
        assert_eq!(snap.http.host, "proxy.example.com");
        assert_eq!(snap.http.port, 80);
        std::env::remove_var("HTTP_PROXY");
    }

    #[test]
    fn refresh_invalidates_proxy_credentials() {
        let watcher = ProxyWatcher::new(None);
        let auth = CountingAuthCache(AtomicUsize::new(0));
        watcher.refresh(&auth);
        assert_eq!(auth.0.load(Ordering::SeqCst), 1);
    }
}
