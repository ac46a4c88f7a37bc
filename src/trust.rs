//! SSL trust negotiation and certificate-confirmation UI helper
//! (spec.md §4.E, §6).
//!
//! Grounded on `HandleSSLErrors`/`ConfirmCertificate` in
//! `examples/original_source/mount.tproj/webdav_network.c`. The original
//! classifies `CFStreamError` codes in the SSL domain; this port
//! classifies `reqwest::Error` (whose `source()` chain surfaces
//! `rustls::Error` on connect failure) into the same five outcomes.
//!
//! The original serializes `{TLSServerCertificateChain, TLSTrustClientStatus,
//! TLSServerHostName}` to a binary property list and pipes it to a helper
//! process. This port keeps the subprocess boundary (§9, "security-
//! structural") but serializes the same three fields as JSON with
//! `serde_json`, consistent with every other on-disk/IPC structure the
//! teacher already uses (trust store, queue, history) — a native port
//! would restore `CFPropertyList`, noted in DESIGN.md.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use serde::Serialize;

/// What `HandleSSLErrors` should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslOutcome {
    /// Retry the same transaction — either a property changed, or a fresh
    /// exception was granted.
    Retry,
    /// The user declined the certificate UI.
    Cancelled,
    /// Not an SSL error this negotiator knows how to handle.
    IoError,
}

/// Coarse classification of a TLS fault, mirroring the `case` labels in
/// `HandleSSLErrors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsFault {
    ProtocolFallback,
    CertExpiredOrNotYetValid,
    BadCertOrChainOrHostname,
    UnknownOrMissingRoot,
    Other,
}

/// The SSL property bag (spec.md §3): nullable until first fault,
/// monotone once populated (spec.md §5 — a mutation always leads to a
/// retry of the same transaction, so concurrent writers racing to set the
/// same flag is harmless).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslProperties {
    pub level_pinned: bool,
    pub allows_expired_certs: bool,
    pub allows_expired_roots: bool,
    pub validates_cert_chain: bool,
    pub allows_any_root: bool,
}

impl SslProperties {
    fn validates_cert_chain_default() -> bool {
        true
    }
}

/// Request payload sent to the certificate UI helper (§6).
#[derive(Serialize)]
struct CertPromptRequest {
    server_cert_chain: Vec<String>, // base64 DER, placeholder encoding
    tls_client_status: i32,
    server_hostname: String,
}

/// Isolation boundary for certificate confirmation: always an external
/// process (§9, "Cert UI subprocess" — security-structural, never an
/// in-process callback).
pub trait CertPrompt: Send + Sync {
    fn confirm(&self, cert_chain_der: &[Vec<u8>], status: i32, hostname: &str) -> bool;
}

/// Forks the configured helper binary, feeds it the JSON request on
/// stdin, and treats exit code 0 as acceptance — matching `ConfirmCertificate`'s
/// fork/exec/wait/`WEXITSTATUS == 0` protocol.
pub struct ProcessCertPrompt {
    pub helper_path: std::path::PathBuf,
}

impl CertPrompt for ProcessCertPrompt {
    fn confirm(&self, cert_chain_der: &[Vec<u8>], status: i32, hostname: &str) -> bool {
        use base64::Engine;
        let request = CertPromptRequest {
            server_cert_chain: cert_chain_der
                .iter()
                .map(|der| base64::engine::general_purpose::STANDARD.encode(der))
                .collect(),
            tls_client_status: status,
            server_hostname: hostname.to_string(),
        };
        let Ok(payload) = serde_json::to_vec(&request) else {
            return false;
        };

        let mut child = match Command::new(&self.helper_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .env("__CF_USER_TEXT_ENCODING", "0x1D29:0:0")
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("certificate UI helper failed to start: {e}");
                return false;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if stdin.write_all(&payload).is_err() {
                tracing::error!("failed to write certificate prompt payload to helper");
                return false;
            }
        }

        match child.wait() {
            Ok(status) => status.success(),
            Err(e) => {
                tracing::error!("certificate UI helper wait() failed: {e}");
                false
            }
        }
    }
}

/// Test double that always accepts (used for scripted "SSL fallback
/// monotonicity" tests and scenarios that exercise the retry path without
/// a real subprocess).
pub struct AutoAcceptCertPrompt;
impl CertPrompt for AutoAcceptCertPrompt {
    fn confirm(&self, _cert_chain_der: &[Vec<u8>], _status: i32, _hostname: &str) -> bool {
        true
    }
}

/// Test double that always declines.
pub struct AutoDenyCertPrompt;
impl CertPrompt for AutoDenyCertPrompt {
    fn confirm(&self, _cert_chain_der: &[Vec<u8>], _status: i32, _hostname: &str) -> bool {
        false
    }
}

/// The negotiator itself: owns the property bag and the cert-prompt
/// collaborator, classifies faults, and mutates the bag.
pub struct SslTrustNegotiator {
    properties: Mutex<SslProperties>,
    prompt: Box<dyn CertPrompt>,
}

impl SslTrustNegotiator {
    pub fn new(prompt: Box<dyn CertPrompt>) -> Self {
        Self {
            properties: Mutex::new(SslProperties {
                validates_cert_chain: SslProperties::validates_cert_chain_default(),
                ..Default::default()
            }),
            prompt,
        }
    }

    pub fn properties(&self) -> SslProperties {
        self.properties.lock().expect("ssl properties mutex poisoned").clone()
    }

    /// Classifies and handles one TLS fault; returns the retry/cancel/io
    /// outcome. `cert_chain_der`/`hostname` are only consulted when the UI
    /// helper needs to be invoked.
    pub fn handle_fault(
        &self,
        fault: TlsFault,
        status: i32,
        cert_chain_der: &[Vec<u8>],
        hostname: &str,
    ) -> SslOutcome {
        let mut props = self.properties.lock().expect("ssl properties mutex poisoned");
        match fault {
            TlsFault::ProtocolFallback => {
                if props.level_pinned {
                    return SslOutcome::IoError;
                }
                props.level_pinned = true;
                SslOutcome::Retry
            }
            TlsFault::CertExpiredOrNotYetValid => {
                if props.allows_expired_certs {
                    return SslOutcome::IoError;
                }
                drop(props);
                if self.prompt.confirm(cert_chain_der, status, hostname) {
                    let mut props = self.properties.lock().expect("ssl properties mutex poisoned");
                    props.allows_expired_certs = true;
                    props.allows_expired_roots = true;
                    SslOutcome::Retry
                } else {
                    SslOutcome::Cancelled
                }
            }
            TlsFault::BadCertOrChainOrHostname => {
                if !props.validates_cert_chain {
                    return SslOutcome::IoError;
                }
                drop(props);
                if self.prompt.confirm(cert_chain_der, status, hostname) {
                    let mut props = self.properties.lock().expect("ssl properties mutex poisoned");
                    props.validates_cert_chain = false;
                    SslOutcome::Retry
                } else {
                    SslOutcome::Cancelled
                }
            }
            TlsFault::UnknownOrMissingRoot => {
                if props.allows_any_root {
                    return SslOutcome::IoError;
                }
                drop(props);
                if self.prompt.confirm(cert_chain_der, status, hostname) {
                    let mut props = self.properties.lock().expect("ssl properties mutex poisoned");
                    props.allows_any_root = true;
                    SslOutcome::Retry
                } else {
                    SslOutcome::Cancelled
                }
            }
            TlsFault::Other => SslOutcome::IoError,
        }
    }
}
