use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Empty};
use hyper::{Request, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpProbe, ProbeError, ProbeResponse, ProbeResult};

/// How much of a response body the probe keeps for reporting.
const BODY_PREFIX_LIMIT: usize = 1000;

/// HTTP probe adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// One pooled client (keep-alive, DNS cache, TLS session reuse) serves every
/// probe for the lifetime of the monitor. Redirects are deliberately not
/// followed here; the monitor owns the hop budget.
pub struct HttpProbeAdapter {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
}

impl HttpProbeAdapter {
    /// Create a new probe adapter with the native root store.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add a native certificate to the root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                errors = ?native_certs.errors,
                "some native certificates failed to load"
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Empty<Bytes>>(https_connector);

        tracing::debug!("probe HTTP client created");
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for HttpProbeAdapter {
    async fn get(&self, url: &str, deadline: Duration) -> ProbeResult<ProbeResponse> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header(header::USER_AGENT, "swagman-health/1.0")
            .header(header::ACCEPT, "*/*")
            .body(Empty::new())
            .map_err(|e| ProbeError::InvalidRequest(e.to_string()))?;

        tracing::debug!(url, ?deadline, "probing");

        let response = match timeout(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(ProbeError::Connection(err.to_string())),
            Err(_) => return Err(ProbeError::Timeout(deadline)),
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // Drain the body within whatever deadline budget remains so the
        // pooled connection can be reused; a slow body is not a failure.
        let body_prefix = match timeout(deadline, response.into_body().collect()).await {
            Ok(Ok(collected)) => {
                let bytes = collected.to_bytes();
                let cut = bytes.len().min(BODY_PREFIX_LIMIT);
                String::from_utf8_lossy(&bytes[..cut]).into_owned()
            }
            _ => String::new(),
        };

        Ok(ProbeResponse {
            status,
            location,
            body_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adapter_creation_succeeds() {
        assert!(HttpProbeAdapter::new().is_ok());
    }

    #[tokio::test]
    async fn unroutable_host_is_a_connection_error() {
        let adapter = HttpProbeAdapter::new().unwrap();
        let result = adapter
            .get("http://invalid.invalid/", Duration::from_secs(2))
            .await;
        assert!(matches!(
            result,
            Err(ProbeError::Connection(_) | ProbeError::Timeout(_))
        ));
    }
}
