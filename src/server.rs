// bridge/src/server.rs
//
// Local WebSocket endpoint the assistant connects to. One listener bound
// to the first free port in the configured range, auth-token handshake
// against the lockfile token, one reader plus one writer task per
// connection. Every request is dispatched on its own task, so a blocking
// tool suspends only itself, never the connection.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HandshakeRequest, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ConfigManager;
use crate::error::{BridgeError, Result, PARSE_ERROR};
use crate::lockfile::{LockInfo, Lockfile};
use crate::protocol::{Notification, Request, RequestId, Response, RpcError};
use crate::tools::{ToolContext, ToolRegistry};

/// Header the client must present during the WebSocket handshake.
pub const AUTH_HEADER: &str = "x-ide-authorization";

type Connections = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>>;

/// A started server. Dropping it (or calling `stop`) closes the listener
/// and removes the discovery lockfile.
pub struct RunningServer {
    port: u16,
    auth_token: String,
    connections: Connections,
    accept_task: JoinHandle<()>,
    _lockfile: Lockfile,
}

impl RunningServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Push a notification to every connected client.
    pub fn broadcast(&self, notification: &Notification) {
        let Ok(text) = serde_json::to_string(notification) else { return };
        let conns = self.connections.lock();
        for tx in conns.values() {
            let _ = tx.send(text.clone());
        }
    }

    pub async fn stop(self) {
        self.accept_task.abort();
        self.connections.lock().clear();
        // lockfile removed on drop
    }
}

/// Bind the first free port in the configured range, write the lockfile,
/// and start accepting connections.
pub async fn start(cfg: Arc<ConfigManager>, registry: Arc<ToolRegistry>) -> Result<RunningServer> {
    let conf = cfg.get();
    let auth_token = uuid::Uuid::new_v4().to_string();

    let (listener, port) = bind_in_range(&conf.server.host, conf.server.port_min, conf.server.port_max).await?;

    let info = LockInfo::new(conf.workspace.folders.clone(), auth_token.clone());
    let lockfile = Lockfile::write(conf.server.lock_dir.as_deref(), port, &info)
        .map_err(|e| BridgeError::session(format!("lockfile: {e}")))?;

    info!(port, "bridge listening");

    let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
    let conn_ids = Arc::new(AtomicU64::new(0));

    let accept_task = {
        let connections = connections.clone();
        let registry = registry.clone();
        let token = auth_token.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(%peer, "incoming connection");
                let id = conn_ids.fetch_add(1, Ordering::Relaxed);
                let connections = connections.clone();
                let registry = registry.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    handle_connection(id, stream, token, connections, registry).await;
                });
            }
        })
    };

    Ok(RunningServer {
        port,
        auth_token,
        connections,
        accept_task,
        _lockfile: lockfile,
    })
}

async fn bind_in_range(host: &str, port_min: u16, port_max: u16) -> Result<(TcpListener, u16)> {
    for port in port_min..=port_max {
        match TcpListener::bind((host, port)).await {
            Ok(l) => {
                // port 0 asks the OS for an ephemeral port; report the real one
                let bound = l.local_addr().map(|a| a.port()).unwrap_or(port);
                return Ok((l, bound));
            }
            Err(_) => continue,
        }
    }
    Err(BridgeError::session(format!(
        "no free port on {host} in {port_min}..={port_max}"
    )))
}

async fn handle_connection(
    id: u64,
    stream: TcpStream,
    token: String,
    connections: Connections,
    registry: Arc<ToolRegistry>,
) {
    let check_auth = |req: &HandshakeRequest, resp: HandshakeResponse| {
        let presented = req
            .headers()
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented == Some(token.as_str()) {
            Ok(resp)
        } else {
            warn!("handshake rejected: bad or missing auth header");
            let mut denied = ErrorResponse::new(Some("unauthorized".into()));
            *denied.status_mut() = StatusCode::UNAUTHORIZED;
            Err(denied)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_auth).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "handshake failed");
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    connections.lock().insert(id, tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(&text, &tx, &registry),
            Ok(Message::Close(_)) | Err(_) => break,
            // pings are answered by the protocol layer; binary is not part
            // of this wire
            Ok(_) => {}
        }
    }

    connections.lock().remove(&id);
    writer.abort();
    debug!(conn = id, "connection closed");
}

/// Decode one inbound frame and dispatch it. Requests run on their own
/// task; notifications are acknowledged only by a log line.
fn handle_text(text: &str, tx: &mpsc::UnboundedSender<String>, registry: &Arc<ToolRegistry>) {
    let request: Request = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            let value: std::result::Result<serde_json::Value, _> = serde_json::from_str(text);
            if let Ok(v) = value {
                if v.get("id").is_none() {
                    debug!(method = %v.get("method").and_then(|m| m.as_str()).unwrap_or("?"), "client notification");
                    return;
                }
            }
            let response = Response::failure(
                RequestId::Num(0),
                RpcError {
                    code: PARSE_ERROR,
                    message: "Parse error".into(),
                    data: Some(e.to_string()),
                },
            );
            let _ = tx.send(serde_json::to_string(&response).unwrap_or_default());
            return;
        }
    };

    let registry = registry.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let response = match registry
            .dispatch(&request.method, &ToolContext::deferred(), request.params)
            .await
        {
            Ok(result) => Response::success(request.id, result.into_value()),
            Err(e) => {
                debug!(method = %request.method, error = %e, "tool returned error");
                Response::failure(request.id, RpcError::from(&e))
            }
        };
        let _ = tx.send(serde_json::to_string(&response).unwrap_or_default());
    });
}
