//! Connection manager for the shared Deriv WebSocket.
//!
//! One socket carries requests for every account; the manager owns the
//! request-id counter and the "currently authorized identity". Switching
//! identity requires a full authorize round-trip before any account-scoped
//! request is sent on the connection.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::config::AppConfig;

use super::types::{ApiResponse, AuthorizeInfo, OutboundRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Monotonic request-id counter. Ids start at 1 and every request sent on
/// the connection gets the next one, whatever its kind.
#[derive(Debug, Default)]
struct RequestIds {
    last: u64,
}

impl RequestIds {
    fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Wraps one WebSocket with a request counter and the authorized identity.
pub struct ConnectionManager {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    req_ids: RequestIds,
    open: bool,
    authorized_loginid: Option<String>,
    request_timeout: Duration,

    // Messages received while waiting on an authorize round-trip; drained
    // in order by next_message().
    buffered: VecDeque<ApiResponse>,
}

impl ConnectionManager {
    /// Open the socket. Does not authorize; callers follow up with
    /// [`authorize`](Self::authorize) or [`ensure_authorized`](Self::ensure_authorized).
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let url = config.url();
        debug!(url = %url, "Connecting WebSocket");

        let (stream, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        let (write, read) = stream.split();

        Ok(Self {
            write,
            read,
            req_ids: RequestIds::default(),
            open: true,
            authorized_loginid: None,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            buffered: VecDeque::new(),
        })
    }

    fn next_req_id(&mut self) -> u64 {
        self.req_ids.next()
    }

    /// Serialize and transmit a request. Transmits only if the socket is
    /// open; otherwise the request is dropped with a log line and nothing
    /// is surfaced to the caller. No queuing, no retry.
    async fn transmit(&mut self, req: &OutboundRequest) {
        if !self.open {
            warn!(
                msg_type = req.msg_type(),
                req_id = req.req_id(),
                "Socket not open, dropping request"
            );
            return;
        }

        let json = match serde_json::to_string(req) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize request");
                return;
            }
        };

        debug!(payload = %json, "Sending request");
        if let Err(e) = self.write.send(Message::text(json)).await {
            warn!(error = %e, "Send failed, marking socket closed");
            self.open = false;
        }
    }

    /// Send a keepalive ping.
    pub async fn ping(&mut self) {
        let req_id = self.next_req_id();
        self.transmit(&OutboundRequest::Ping { ping: 1, req_id }).await;
    }

    /// Send a copy-start request scoped to the currently authorized account.
    pub async fn send_copy_start(&mut self, master_token: &str, loginid: &str) -> u64 {
        let req_id = self.next_req_id();
        self.transmit(&OutboundRequest::CopyStart {
            copy_start: master_token.to_string(),
            loginid: loginid.to_string(),
            req_id,
        })
        .await;
        req_id
    }

    /// Send a copy-stop request carrying the copy-session token.
    pub async fn send_copy_stop(&mut self, session_token: &str) -> u64 {
        let req_id = self.next_req_id();
        self.transmit(&OutboundRequest::CopyStop {
            copy_stop: session_token.to_string(),
            req_id,
        })
        .await;
        req_id
    }

    /// Authorize the connection with `token` and wait for the matching
    /// acknowledgment. Messages that arrive in the meantime are buffered
    /// for normal dispatch. The wait is bounded by the configured request
    /// timeout, so a server that never answers fails the action instead of
    /// hanging it forever.
    pub async fn authorize(&mut self, token: &str) -> Result<AuthorizeInfo> {
        if !self.open {
            bail!("Cannot authorize: socket is not open");
        }

        let req_id = self.next_req_id();
        self.transmit(&OutboundRequest::Authorize {
            authorize: token.to_string(),
            req_id,
        })
        .await;

        let timeout = self.request_timeout;
        let info = match tokio::time::timeout(timeout, self.wait_for_authorize(req_id)).await {
            Ok(result) => result?,
            Err(_) => bail!("Authorize timed out after {:?}", timeout),
        };

        self.authorized_loginid = Some(info.loginid.clone());
        Ok(info)
    }

    /// Re-authorize if the socket is not already scoped to `loginid`.
    /// The acknowledgment must name the target loginid; a token that
    /// authorizes some other account is an error. Returns the authorize
    /// payload when a round-trip actually happened.
    pub async fn ensure_authorized(
        &mut self,
        loginid: &str,
        token: &str,
    ) -> Result<Option<AuthorizeInfo>> {
        if self.authorized_loginid.as_deref() == Some(loginid) {
            debug!(loginid = %loginid, "Already authorized");
            return Ok(None);
        }

        let info = self.authorize(token).await?;
        if info.loginid != loginid {
            bail!("Authorized as {} but expected {}", info.loginid, loginid);
        }
        Ok(Some(info))
    }

    async fn wait_for_authorize(&mut self, req_id: u64) -> Result<AuthorizeInfo> {
        while let Some(resp) = self.read_frame().await {
            if resp.req_id == Some(req_id) {
                if let Some(err) = resp.error {
                    bail!("Authorize failed: {} ({})", err.message, err.code);
                }
                return resp
                    .authorize
                    .context("Authorize acknowledgment missing payload");
            }
            self.buffered.push_back(resp);
        }
        bail!("Connection closed while waiting for authorize")
    }

    /// Next inbound message: buffered messages first, then the socket.
    /// Returns `None` once the connection is closed. Socket errors and
    /// unparseable frames are logged, never escalated.
    pub async fn next_message(&mut self) -> Option<ApiResponse> {
        if let Some(resp) = self.buffered.pop_front() {
            return Some(resp);
        }
        self.read_frame().await
    }

    async fn read_frame(&mut self) -> Option<ApiResponse> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ApiResponse>(text.as_str()) {
                        Ok(resp) => return Some(resp),
                        Err(e) => {
                            warn!(error = %e, "Failed to parse message, skipping");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket closed");
                    self.open = false;
                    return None;
                }
                Some(Ok(_)) => {
                    // Binary, ping and pong frames; tungstenite answers
                    // pings itself.
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read error");
                    self.open = false;
                    return None;
                }
            }
        }
    }
}
