//! Wire types for the Deriv WebSocket v3 API.
//!
//! Requests are flat JSON objects keyed by the operation name
//! (`authorize`, `copy_start`, `copy_stop`, `ping`); every request carries
//! an auto-incremented `req_id` attached by the connection manager.
//! Responses carry a `msg_type` discriminator, the `echo_req` of the
//! request they answer, and either an `error` object or a payload field
//! named after the operation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outgoing request. Serializes untagged, so each variant becomes the flat
/// object the API expects.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundRequest {
    Authorize {
        authorize: String,
        req_id: u64,
    },
    CopyStart {
        copy_start: String,
        loginid: String,
        req_id: u64,
    },
    CopyStop {
        copy_stop: String,
        req_id: u64,
    },
    Ping {
        ping: u8,
        req_id: u64,
    },
}

impl OutboundRequest {
    /// The `msg_type` the server will echo back for this request.
    pub fn msg_type(&self) -> &'static str {
        match self {
            OutboundRequest::Authorize { .. } => "authorize",
            OutboundRequest::CopyStart { .. } => "copy_start",
            OutboundRequest::CopyStop { .. } => "copy_stop",
            OutboundRequest::Ping { .. } => "ping",
        }
    }

    pub fn req_id(&self) -> u64 {
        match self {
            OutboundRequest::Authorize { req_id, .. }
            | OutboundRequest::CopyStart { req_id, .. }
            | OutboundRequest::CopyStop { req_id, .. }
            | OutboundRequest::Ping { req_id, .. } => *req_id,
        }
    }
}

/// Error payload present on failed responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    pub message: String,
}

/// The `authorize` payload: identity and balance of the account the
/// connection is now scoped to.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeInfo {
    pub loginid: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub balance: Decimal,
}

/// Echo of the request a response answers. Only the fields this tool
/// sends are modeled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EchoReq {
    #[serde(default)]
    pub loginid: Option<String>,
    #[serde(default)]
    pub copy_start: Option<String>,
}

/// Inbound message, dispatched by `msg_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub req_id: Option<u64>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub echo_req: Option<EchoReq>,
    #[serde(default)]
    pub authorize: Option<AuthorizeInfo>,
    #[serde(default)]
    pub copy_start: Option<u8>,
    #[serde(default)]
    pub copy_stop: Option<u8>,
    #[serde(default)]
    pub pong: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Discriminator used for dispatch. Prefers the explicit `msg_type`
    /// field, falling back to payload-field presence for servers that
    /// omit it.
    pub fn kind(&self) -> MessageKind {
        if self.error.is_some() {
            return MessageKind::Error;
        }

        let msg_type = match self.msg_type.as_deref() {
            Some(t) => t,
            None if self.authorize.is_some() => "authorize",
            None if self.copy_start.is_some() => "copy_start",
            None if self.copy_stop.is_some() => "copy_stop",
            None if self.pong.is_some() => "ping",
            None => return MessageKind::Other,
        };

        match msg_type {
            "authorize" => MessageKind::Authorize,
            "copy_start" => MessageKind::CopyStart,
            "copy_stop" => MessageKind::CopyStop,
            "ping" => MessageKind::Pong,
            _ => MessageKind::Other,
        }
    }
}

/// Dispatch category of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Authorize,
    CopyStart,
    CopyStop,
    Pong,
    Error,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_serializes_flat() {
        let req = OutboundRequest::CopyStart {
            copy_start: "a1-master".into(),
            loginid: "CR100".into(),
            req_id: 7,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["copy_start"], "a1-master");
        assert_eq!(json["loginid"], "CR100");
        assert_eq!(json["req_id"], 7);

        let ping = serde_json::to_value(OutboundRequest::Ping { ping: 1, req_id: 8 }).unwrap();
        assert_eq!(ping["ping"], 1);
    }

    #[test]
    fn test_dispatch_by_msg_type() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{"msg_type":"authorize","req_id":1,
                "authorize":{"loginid":"CR100","currency":"USD","balance":"100.50"}}"#,
        )
        .unwrap();

        assert_eq!(resp.kind(), MessageKind::Authorize);
        let auth = resp.authorize.unwrap();
        assert_eq!(auth.loginid, "CR100");
        assert_eq!(auth.balance, dec!(100.50));
    }

    #[test]
    fn test_dispatch_falls_back_to_field_presence() {
        let resp: ApiResponse =
            serde_json::from_str(r#"{"copy_start":1,"echo_req":{"loginid":"CR100"}}"#).unwrap();
        assert_eq!(resp.kind(), MessageKind::CopyStart);
    }

    #[test]
    fn test_error_wins_over_payload() {
        let resp: ApiResponse = serde_json::from_str(
            r#"{"msg_type":"copy_start",
                "error":{"code":"CopyTradingNotAllowed","message":"not allowed"}}"#,
        )
        .unwrap();
        assert_eq!(resp.kind(), MessageKind::Error);
    }

    #[test]
    fn test_pong_kind() {
        let resp: ApiResponse =
            serde_json::from_str(r#"{"msg_type":"ping","pong":1,"req_id":3}"#).unwrap();
        assert_eq!(resp.kind(), MessageKind::Pong);
    }
}
