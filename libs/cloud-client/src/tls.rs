//! rustls setup for the pooled transport.
//!
//! Native roots are read from the OS store at most once per process.

use crate::error::ClientError;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        tracing::warn!(error = %err, "skipping unreadable native root certificate");
    }
    if loaded.certs.is_empty() {
        tracing::warn!("OS certificate store returned no roots");
    } else {
        tracing::debug!(count = loaded.certs.len(), "native root certificates loaded");
    }
    loaded.certs
}

/// Cached native root certificates (possibly empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// Process-wide default provider if one is installed, aws-lc-rs otherwise.
///
/// Never installs a global default itself.
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client config trusting the OS root store.
///
/// # Errors
///
/// Returns [`ClientError::Tls`] when the OS store yields no usable root, so
/// that the failure surfaces at client construction instead of at handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, ClientError> {
    let certs = native_root_certs();
    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());

    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates failed to parse");
    }
    if added == 0 {
        return Err(ClientError::Tls(
            format!("no usable native root CA certificates ({} found)", certs.len()).into(),
        ));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(config)
}
