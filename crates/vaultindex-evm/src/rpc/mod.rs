//! JSON-RPC plumbing: wire types, the transport seam, HTTP and fallback transports.

pub mod error;
pub mod fallback;
pub mod http;
pub mod request;
pub mod transport;

pub use error::TransportError;
pub use fallback::FallbackTransport;
pub use http::HttpTransport;
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use transport::{call_rpc, RpcTransport};
