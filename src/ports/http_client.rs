use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Custom error type for probe transport failures.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProbeError {
    /// Connection, TLS, or DNS failure before a response arrived.
    #[error("connection error: {0}")]
    Connection(String),

    /// The per-attempt deadline elapsed.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// What a single GET attempt observed. Redirects are not followed at this
/// layer; the monitor walks `Location` itself so hops can be capped and
/// recorded.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    /// Value of the `Location` header, when the status is a redirect.
    pub location: Option<String>,
    /// Leading bytes of the response body, bounded by the adapter.
    pub body_prefix: String,
}

impl ProbeResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// HttpProbe defines the port (interface) for issuing health-check GETs.
#[async_trait]
pub trait HttpProbe: Send + Sync + 'static {
    /// Issue a single GET with the given deadline, without following
    /// redirects.
    async fn get(&self, url: &str, timeout: Duration) -> ProbeResult<ProbeResponse>;
}
