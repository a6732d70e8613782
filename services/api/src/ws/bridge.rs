//! The per-connection bridge between a browser socket and an upstream
//! realtime session.
//!
//! Each accepted connection walks `Validating -> ConnectingUpstream ->
//! Relaying -> Closed`. Client frames that arrive before the upstream
//! session is ready are buffered and drained FIFO on readiness; after that
//! frames are forwarded live. Either side closing tears the other down, so
//! a finished connection never leaves an orphaned upstream session or a
//! dangling browser socket.

use super::{
    protocol::RelayEvent,
    queue::PendingQueue,
    upstream::{RealtimeConnector, RealtimeSession, SessionConfig, UpstreamError},
};
use crate::state::AppState;
use axum::{
    extract::{
        OriginalUri, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Paths browser clients may connect on; anything else is refused.
const RELAY_PATHS: [&str; 2] = ["/", "/realtime"];

fn is_relay_path(path: &str) -> bool {
    RELAY_PATHS.contains(&path)
}

/// Axum handler upgrading relay-port requests to WebSockets.
///
/// Every path upgrades; the bridge validates the path after the handshake,
/// matching plain WebSocket-server semantics where a bad path is observed
/// as an immediate close rather than an HTTP error.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, uri.path().to_string(), state))
}

#[instrument(name = "relay_conn", skip_all, fields(conn_id = %Uuid::new_v4()))]
async fn handle_socket(socket: WebSocket, path: String, state: Arc<AppState>) {
    state.active_sessions.fetch_add(1, Ordering::Relaxed);

    let session_config = SessionConfig {
        model: state.config.realtime_model.clone(),
        instructions: state.config.session_instructions.clone(),
    };
    run_bridge(
        socket,
        &path,
        state.connector.as_ref(),
        &session_config,
        state.config.queue_capacity,
        state.config.connect_timeout,
    )
    .await;

    state.active_sessions.fetch_sub(1, Ordering::Relaxed);
}

/// Drives one connection from accept to teardown.
///
/// Generic over the socket so tests can drive it with an in-memory pair
/// instead of a real WebSocket.
pub(crate) async fn run_bridge<S>(
    socket: S,
    path: &str,
    connector: &dyn RealtimeConnector,
    session_config: &SessionConfig,
    queue_capacity: usize,
    connect_timeout: Duration,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error> + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    // Validating: a wrong path closes before anything is forwarded.
    if !is_relay_path(path) {
        info!(%path, "Rejecting relay connection on unexpected path.");
        let _ = sink.close().await;
        return;
    }
    info!("New relay client connection.");

    // ConnectingUpstream: buffer client frames until the session is ready.
    let mut queue = PendingQueue::new(queue_capacity);
    let connect = tokio::time::timeout(connect_timeout, connector.connect(session_config));
    tokio::pin!(connect);

    let session = loop {
        tokio::select! {
            outcome = &mut connect => {
                match outcome {
                    Ok(Ok(session)) => break session,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Failed to connect to the upstream realtime service.");
                        let _ = sink.close().await;
                        return;
                    }
                    Err(_) => {
                        warn!(timeout = ?connect_timeout, "Upstream connect timed out.");
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(dropped) = queue.push(text.to_string()) {
                            warn!(
                                queued = queue.len(),
                                "Pending queue full; dropping the oldest client message: {}",
                                dropped
                            );
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Browser connection closed while the upstream connect was in flight.");
                        // Resolve the connect anyway so a session that does
                        // come up is torn down, not orphaned. Bounded by the
                        // connect timeout.
                        if let Ok(Ok(mut session)) = connect.await {
                            session.disconnect();
                        }
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Browser transport error while connecting upstream.");
                        if let Ok(Ok(mut session)) = connect.await {
                            session.disconnect();
                        }
                        return;
                    }
                }
            }
        }
    };
    info!(queued = queue.len(), "Upstream session ready.");

    relay(sink, stream, session, queue).await;
}

/// Relaying: drain the queue FIFO, then forward live in both directions
/// until either side closes.
async fn relay<Si, St>(
    mut sink: Si,
    mut stream: St,
    mut session: RealtimeSession,
    queue: PendingQueue,
) where
    Si: Sink<Message, Error = axum::Error> + Unpin,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    for payload in queue.drain() {
        if let Err(e) = forward_to_upstream(&session, &payload).await {
            warn!(error = %e, "Upstream session dropped while draining queued messages.");
            let _ = sink.close().await;
            return;
        }
    }

    loop {
        tokio::select! {
            event = session.next_event() => match event {
                Some(event) => {
                    debug!(event_type = %event.event_type(), "Relaying upstream event to the browser.");
                    if sink.send(Message::Text(event.to_text().into())).await.is_err() {
                        info!("Browser write failed; tearing down the upstream session.");
                        session.disconnect();
                        return;
                    }
                }
                None => {
                    info!("Upstream session closed.");
                    let _ = sink.close().await;
                    return;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = forward_to_upstream(&session, &text).await {
                        warn!(error = %e, "Upstream session dropped; closing the browser socket.");
                        let _ = sink.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Browser connection closed.");
                    session.disconnect();
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Browser transport error; tearing down the upstream session.");
                    session.disconnect();
                    return;
                }
            },
        }
    }
}

/// Decodes one raw client payload and forwards it upstream.
///
/// An undecodable payload is logged and dropped so a single bad frame never
/// kills a live session; only a closed upstream is an error.
async fn forward_to_upstream(
    session: &RealtimeSession,
    payload: &str,
) -> Result<(), UpstreamError> {
    match RelayEvent::parse(payload) {
        Ok(event) => {
            debug!(event_type = %event.event_type(), "Relaying client event upstream.");
            session.send(event).await
        }
        Err(e) => {
            warn!(error = %e, "Dropping undecodable client message.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::{
        pin::Pin,
        sync::atomic::{AtomicUsize, Ordering},
        task::{Context, Poll},
    };
    use tokio::sync::{Mutex, mpsc, oneshot};
    use tokio_tungstenite::tungstenite;

    /// In-memory stand-in for the axum WebSocket.
    struct FakeSocket {
        rx: mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
        tx: Option<mpsc::UnboundedSender<Message>>,
        close_count: Arc<AtomicUsize>,
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.rx.poll_recv(cx)
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            match &self.tx {
                Some(tx) => tx.send(item).map_err(|_| axum::Error::new("peer gone")),
                None => Err(axum::Error::new("socket closed")),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Result<(), Self::Error>> {
            if self.tx.take().is_some() {
                self.close_count.fetch_add(1, Ordering::SeqCst);
            }
            Poll::Ready(Ok(()))
        }
    }

    struct BrowserEnd {
        /// Frames the "browser" sends to the bridge.
        to_bridge: mpsc::UnboundedSender<Result<Message, axum::Error>>,
        /// Frames the bridge writes back to the "browser".
        from_bridge: mpsc::UnboundedReceiver<Message>,
        close_count: Arc<AtomicUsize>,
    }

    fn fake_socket() -> (FakeSocket, BrowserEnd) {
        let (to_bridge, bridge_rx) = mpsc::unbounded_channel();
        let (bridge_tx, from_bridge) = mpsc::unbounded_channel();
        let close_count = Arc::new(AtomicUsize::new(0));
        (
            FakeSocket {
                rx: bridge_rx,
                tx: Some(bridge_tx),
                close_count: close_count.clone(),
            },
            BrowserEnd {
                to_bridge,
                from_bridge,
                close_count,
            },
        )
    }

    /// Test double for the realtime service: one prebuilt session handed
    /// out on `connect`, optionally gated or failed.
    struct MockConnector {
        session: Mutex<Option<RealtimeSession>>,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        reject: bool,
        hang: bool,
        calls: AtomicUsize,
    }

    /// The service side of a mock session: what the bridge sent upstream
    /// arrives on `sent`, and `events` injects upstream-originated events.
    struct UpstreamEnd {
        sent: mpsc::Receiver<RelayEvent>,
        events: mpsc::Sender<RelayEvent>,
    }

    impl MockConnector {
        fn accepting() -> (Arc<Self>, UpstreamEnd) {
            let (outbound_tx, sent) = mpsc::channel(64);
            let (events, inbound_rx) = mpsc::channel(64);
            let session = RealtimeSession::new(outbound_tx, inbound_rx, None);
            (
                Arc::new(Self {
                    session: Mutex::new(Some(session)),
                    gate: Mutex::new(None),
                    reject: false,
                    hang: false,
                    calls: AtomicUsize::new(0),
                }),
                UpstreamEnd { sent, events },
            )
        }

        /// Like `accepting`, but `connect` does not finish until the
        /// returned sender fires.
        fn gated() -> (Arc<Self>, oneshot::Sender<()>, UpstreamEnd) {
            let (outbound_tx, sent) = mpsc::channel(64);
            let (events, inbound_rx) = mpsc::channel(64);
            let session = RealtimeSession::new(outbound_tx, inbound_rx, None);
            let (open, gate) = oneshot::channel();
            (
                Arc::new(Self {
                    session: Mutex::new(Some(session)),
                    gate: Mutex::new(Some(gate)),
                    reject: false,
                    hang: false,
                    calls: AtomicUsize::new(0),
                }),
                open,
                UpstreamEnd { sent, events },
            )
        }

        fn rejecting() -> Arc<Self> {
            Arc::new(Self {
                session: Mutex::new(None),
                gate: Mutex::new(None),
                reject: true,
                hang: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                session: Mutex::new(None),
                gate: Mutex::new(None),
                reject: false,
                hang: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn connect_calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RealtimeConnector for MockConnector {
        async fn connect(
            &self,
            _config: &SessionConfig,
        ) -> Result<RealtimeSession, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(gate) = self.gate.lock().await.take() {
                let _ = gate.await;
            }
            if self.reject {
                return Err(UpstreamError::Handshake(
                    tungstenite::Error::ConnectionClosed,
                ));
            }
            Ok(self
                .session
                .lock()
                .await
                .take()
                .expect("mock connector supports a single connect"))
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            model: "test-model".to_string(),
            instructions: "test instructions".to_string(),
        }
    }

    fn spawn_bridge(
        socket: FakeSocket,
        path: &str,
        connector: Arc<MockConnector>,
        queue_capacity: usize,
    ) -> tokio::task::JoinHandle<()> {
        let path = path.to_string();
        tokio::spawn(async move {
            run_bridge(
                socket,
                &path,
                connector.as_ref(),
                &test_config(),
                queue_capacity,
                Duration::from_secs(5),
            )
            .await;
        })
    }

    fn text_frame(value: serde_json::Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string().into()))
    }

    /// Lets every ready task run to completion; with the paused clock this
    /// only returns once the runtime is otherwise idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn pre_readiness_messages_drain_in_order_then_live_traffic_follows() {
        let (socket, browser) = fake_socket();
        let (connector, open, mut upstream) = MockConnector::gated();
        let bridge = spawn_bridge(socket, "/", connector, 8);

        browser.to_bridge.send(text_frame(json!({"type":"a"}))).unwrap();
        browser.to_bridge.send(text_frame(json!({"type":"b"}))).unwrap();
        settle().await;

        open.send(()).unwrap();
        settle().await;
        browser.to_bridge.send(text_frame(json!({"type":"c"}))).unwrap();

        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "a");
        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "b");
        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "c");

        drop(browser);
        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_path_closes_without_ever_connecting() {
        let (socket, mut browser) = fake_socket();
        let (connector, _upstream) = MockConnector::accepting();
        let bridge = spawn_bridge(socket, "/unknown", connector.clone(), 8);

        bridge.await.unwrap();
        assert!(browser.from_bridge.recv().await.is_none());
        assert_eq!(browser.close_count.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frame_is_dropped_without_killing_the_session() {
        let (socket, browser) = fake_socket();
        let (connector, mut upstream) = MockConnector::accepting();
        let bridge = spawn_bridge(socket, "/realtime", connector, 8);
        settle().await;

        browser
            .to_bridge
            .send(Ok(Message::Text("not json".into())))
            .unwrap();
        browser.to_bridge.send(text_frame(json!({"type":"ping"}))).unwrap();

        // Only the valid frame arrives; the connection is still live.
        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "ping");
        browser.to_bridge.send(text_frame(json!({"type":"pong"}))).unwrap();
        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "pong");
        assert_eq!(browser.close_count.load(Ordering::SeqCst), 0);

        drop(browser);
        bridge.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn browser_close_during_connect_still_tears_down_the_session() {
        let (socket, browser) = fake_socket();
        let (connector, open, mut upstream) = MockConnector::gated();
        let bridge = spawn_bridge(socket, "/", connector, 8);

        browser.to_bridge.send(Ok(Message::Close(None))).unwrap();
        settle().await;
        open.send(()).unwrap();

        bridge.await.unwrap();
        // The session the connect produced was disconnected and dropped,
        // so its outbound channel is gone and nothing was ever sent.
        assert!(upstream.sent.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_close_closes_the_browser_socket_exactly_once() {
        let (socket, mut browser) = fake_socket();
        let (connector, upstream) = MockConnector::accepting();
        let bridge = spawn_bridge(socket, "/", connector, 8);
        settle().await;

        drop(upstream.events);
        bridge.await.unwrap();

        assert!(browser.from_bridge.recv().await.is_none());
        assert_eq!(browser.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_rejection_closes_the_browser_and_sends_nothing_upstream() {
        let (socket, mut browser) = fake_socket();
        let connector = MockConnector::rejecting();
        let bridge = spawn_bridge(socket, "/", connector.clone(), 8);

        // Queued before the rejection lands; must never be forwarded.
        browser.to_bridge.send(text_frame(json!({"type":"a"}))).unwrap();

        bridge.await.unwrap();
        assert!(browser.from_bridge.recv().await.is_none());
        assert_eq!(browser.close_count.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_closes_the_connection() {
        let (socket, mut browser) = fake_socket();
        let connector = MockConnector::hanging();
        let bridge = spawn_bridge(socket, "/", connector, 8);

        // The paused clock auto-advances past the 5s timeout.
        bridge.await.unwrap();
        assert!(browser.from_bridge.recv().await.is_none());
        assert_eq!(browser.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_overflow_drops_the_oldest_message() {
        let (socket, browser) = fake_socket();
        let (connector, open, mut upstream) = MockConnector::gated();
        let bridge = spawn_bridge(socket, "/", connector, 2);

        browser.to_bridge.send(text_frame(json!({"type":"t1"}))).unwrap();
        browser.to_bridge.send(text_frame(json!({"type":"t2"}))).unwrap();
        browser.to_bridge.send(text_frame(json!({"type":"t3"}))).unwrap();
        settle().await;
        open.send(()).unwrap();

        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "t2");
        assert_eq!(upstream.sent.recv().await.unwrap().event_type(), "t3");

        drop(browser);
        bridge.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_events_are_forwarded_verbatim_in_order() {
        let (socket, mut browser) = fake_socket();
        let (connector, upstream) = MockConnector::accepting();
        let bridge = spawn_bridge(socket, "/", connector, 8);
        settle().await;

        let first = json!({"type":"response.delta","delta":"hel"});
        let second = json!({"type":"response.delta","delta":"lo"});
        upstream
            .events
            .send(RelayEvent::from_value(first.clone()).unwrap())
            .await
            .unwrap();
        upstream
            .events
            .send(RelayEvent::from_value(second.clone()).unwrap())
            .await
            .unwrap();

        for expected in [first, second] {
            match browser.from_bridge.recv().await.unwrap() {
                Message::Text(text) => {
                    let got: serde_json::Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(got, expected);
                }
                other => panic!("expected a text frame, got {other:?}"),
            }
        }

        drop(browser);
        bridge.await.unwrap();
    }
}
