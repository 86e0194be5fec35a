//! Ordered multi-endpoint transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::error::TransportError;
use super::request::{JsonRpcRequest, JsonRpcResponse};
use super::transport::RpcTransport;

/// Tries each endpoint in order, moving on only after a retryable failure.
///
/// Node-side errors (`TransportError::Rpc`) are returned immediately: another
/// endpoint would reject the same request.
pub struct FallbackTransport {
    name: String,
    endpoints: Vec<Arc<dyn RpcTransport>>,
}

impl FallbackTransport {
    pub fn new(endpoints: Vec<Arc<dyn RpcTransport>>) -> Self {
        let name = endpoints
            .iter()
            .map(|t| t.url())
            .collect::<Vec<_>>()
            .join(",");
        Self { name, endpoints }
    }
}

#[async_trait]
impl RpcTransport for FallbackTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            match endpoint.send(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() => {
                    warn!(url = endpoint.url(), method = %req.method, error = %e, "endpoint failed, trying next");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(TransportError::AllProvidersDown))
    }

    fn url(&self) -> &str {
        &self.name
    }
}
