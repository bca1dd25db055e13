//! Deriv WebSocket API: wire types and the shared connection manager.

mod connection;
mod types;

pub use connection::ConnectionManager;
pub use types::{ApiError, ApiResponse, AuthorizeInfo, EchoReq, MessageKind, OutboundRequest};
