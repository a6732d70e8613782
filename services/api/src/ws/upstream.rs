//! The upstream realtime session adapter.
//!
//! A [`RealtimeConnector`] establishes sessions; a [`RealtimeSession`] exists
//! only once the handshake has succeeded, so `send` is defined by
//! construction. The bridge depends on the trait, not on OpenAI, so it can
//! run against a fake connector in tests.

use super::protocol::RelayEvent;
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{info, warn};

/// Configuration for one upstream realtime session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    /// Free-form behavioral instructions for the remote agent.
    pub instructions: String,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("invalid upstream request: {0}")]
    Request(String),
    #[error("realtime handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("upstream session is closed")]
    SessionClosed,
}

/// Capability to establish upstream realtime sessions.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Establishes one session. Failures (rejected credential, network) are
    /// returned to the caller and never retried here.
    async fn connect(&self, config: &SessionConfig) -> Result<RealtimeSession, UpstreamError>;
}

/// A live upstream session.
///
/// Events flow through two bounded channels; the I/O task owns the wire.
/// Closure of the inbound channel is the close notification and is observed
/// at most once, whatever ended the session.
pub struct RealtimeSession {
    outbound: mpsc::Sender<RelayEvent>,
    inbound: mpsc::Receiver<RelayEvent>,
    io_task: Option<JoinHandle<()>>,
}

impl RealtimeSession {
    pub fn new(
        outbound: mpsc::Sender<RelayEvent>,
        inbound: mpsc::Receiver<RelayEvent>,
        io_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            io_task,
        }
    }

    /// Non-blocking readiness probe.
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Forwards one event to the upstream session.
    pub async fn send(&self, event: RelayEvent) -> Result<(), UpstreamError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| UpstreamError::SessionClosed)
    }

    /// The next inbound event, in upstream arrival order. `None` once the
    /// session has terminated for any reason.
    pub async fn next_event(&mut self) -> Option<RelayEvent> {
        self.inbound.recv().await
    }

    /// Idempotent teardown: stops the I/O task and suppresses further
    /// event delivery.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        self.inbound.close();
    }
}

const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// The real connector for the OpenAI realtime API.
pub struct OpenAiConnector {
    api_key: String,
}

impl OpenAiConnector {
    pub fn new(api_key: String) -> Self {
        Self { api_key }
    }
}

#[async_trait]
impl RealtimeConnector for OpenAiConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<RealtimeSession, UpstreamError> {
        let url = format!("{OPENAI_REALTIME_URL}?model={}", config.model);
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|e| UpstreamError::Request(format!("{e}")))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| UpstreamError::Request(format!("{e}")))?,
        );

        let (ws_stream, _) = connect_async(request).await?;
        let (mut upstream_tx, mut upstream_rx) = ws_stream.split();
        info!(model = %config.model, "Connected to the OpenAI realtime API.");

        // Configure the session before any client traffic flows.
        let session = oai_realtime::SessionResource {
            model: Some(config.model.clone()),
            instructions: Some(config.instructions.clone()),
            ..Default::default()
        };
        let update = OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
            session,
            event_id: None,
        });
        let payload =
            serde_json::to_string(&update).map_err(|e| UpstreamError::Request(format!("{e}")))?;
        upstream_tx.send(WsMessage::Text(payload.into())).await?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<RelayEvent>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<RelayEvent>(64);

        let io_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = outbound_rx.recv() => match event {
                        Some(event) => {
                            if upstream_tx
                                .send(WsMessage::Text(event.to_text().into()))
                                .await
                                .is_err()
                            {
                                warn!("Upstream write failed; ending session.");
                                break;
                            }
                        }
                        // The bridge dropped its end of the session.
                        None => break,
                    },
                    frame = upstream_rx.next() => match frame {
                        Some(Ok(WsMessage::Text(text))) => match RelayEvent::parse(&text) {
                            Ok(event) => {
                                if inbound_tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Skipping undecodable upstream frame."),
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Upstream closed the session.");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Upstream transport error.");
                            break;
                        }
                        None => break,
                    },
                }
            }
            // Dropping `inbound_tx` here is the close notification.
        });

        Ok(RealtimeSession::new(outbound_tx, inbound_rx, Some(io_task)))
    }
}
