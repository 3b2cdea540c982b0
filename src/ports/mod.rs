pub mod http_client;

pub use http_client::{HttpProbe, ProbeError, ProbeResponse, ProbeResult};
