//! Terminal session over a WebSocket terminal stream.
//!
//! Each connect spawns one Tokio task that owns the socket. The task
//! reports back through an unbounded channel of [`LinkEvent`]s; the event
//! loop feeds transport failures into the controller. Every event carries
//! the id of the link that produced it, so events from a connection the
//! user already replaced can be told apart from the current one.
//!
//! ```text
//! connect() ──spawn──► stream task ──LinkEvent──► event loop
//!     ▲                    ▲
//!     │                    └── Outbound (frames, close) ◄── close()/resize/input
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::VtError;
use crate::protocol::{ClientFrame, ConnectRequest, RendererSettings, ServerFrame};

/// Close code sent when the user disconnects.
pub const USER_CLOSE_CODE: u16 = 4000;
pub const USER_CLOSE_REASON: &str = "Closed by user";
/// Reported when the stream dies without a close frame.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// How long a user close waits for the server's close reply.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on [`TerminalSession::teardown`].
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifies one connection of a session. Ids are never reused.
pub type LinkId = u64;

/// A transport failure reported by the terminal stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub code: u16,
    pub reason: String,
    pub terminal_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The stream handshake completed and the connect request was sent.
    Opened,
    Output(Vec<u8>),
    TransportError(TransportFailure),
    /// The remote side closed the stream normally.
    Closed,
}

/// A [`SessionEvent`] tagged with the link that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub event: SessionEvent,
}

pub trait TerminalSession {
    /// Start a connection. A no-op while a connection is live.
    fn connect(&mut self, renderer: &RendererSettings, request: ConnectRequest)
    -> Result<(), VtError>;

    /// Tear down the connection. Closing a closed session does nothing.
    fn close(&mut self);

    /// Close, then wait until the transport has finished closing.
    fn teardown(&mut self) -> impl Future<Output = ()>;

    fn is_connected(&self) -> bool;

    /// Whether events from `link` still concern this session. False once
    /// the link was closed by the user or replaced by a newer connect.
    fn is_current(&self, link: LinkId) -> bool;

    fn perform_resize(&mut self, width: u32, height: u32);

    /// Host information announced by the remote side, if any.
    fn host_info(&self) -> Option<Value>;

    /// Context describing the current screen, for the context menu.
    fn screen_context(&self) -> Option<Value>;

    fn send_input(&mut self, data: &str) -> Result<(), VtError>;
}

#[derive(Debug)]
enum Outbound {
    Frame(ClientFrame),
    Close,
}

struct SessionLink {
    id: LinkId,
    outbound: mpsc::UnboundedSender<Outbound>,
    host_info: Arc<Mutex<Option<Value>>>,
    task: JoinHandle<()>,
}

impl SessionLink {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Sending half of the event channel, bound to one link.
#[derive(Clone)]
struct EventSink {
    link: LinkId,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    fn send(&self, event: SessionEvent) {
        let _ = self.tx.send(LinkEvent {
            link: self.link,
            event,
        });
    }
}

pub struct WsTerminalSession {
    events: mpsc::UnboundedSender<LinkEvent>,
    link: Option<SessionLink>,
    next_link_id: LinkId,
}

impl WsTerminalSession {
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            events,
            link: None,
            next_link_id: 1,
        }
    }

    fn live_link(&self) -> Option<&SessionLink> {
        self.link.as_ref().filter(|link| link.is_live())
    }
}

impl TerminalSession for WsTerminalSession {
    fn connect(
        &mut self,
        renderer: &RendererSettings,
        request: ConnectRequest,
    ) -> Result<(), VtError> {
        if self.live_link().is_some() {
            debug!(target: "session", "Connect ignored: session already live");
            return Ok(());
        }

        let url = Url::parse(&request.url)
            .map_err(|e| VtError::Transport(format!("invalid stream url {}: {e}", request.url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(VtError::Transport(format!(
                "unsupported stream scheme: {}",
                url.scheme()
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| VtError::Transport(format!("no async runtime: {e}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let host_info = Arc::new(Mutex::new(None));
        let connect_frame = ClientFrame::Connect {
            connection_settings: request,
            renderer_settings: renderer.clone(),
        };

        let id = self.next_link_id;
        self.next_link_id += 1;
        let sink = EventSink {
            link: id,
            tx: self.events.clone(),
        };

        let task = runtime.spawn(stream_loop(
            url.to_string(),
            connect_frame,
            outbound_rx,
            sink,
            Arc::clone(&host_info),
        ));

        self.link = Some(SessionLink {
            id,
            outbound: outbound_tx,
            host_info,
            task,
        });
        Ok(())
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            // A finished task has already dropped its receiver.
            let _ = link.outbound.send(Outbound::Close);
            info!(target: "session", link = link.id, "Session closed by user");
        }
    }

    async fn teardown(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.outbound.send(Outbound::Close);
        let mut task = link.task;
        match timeout(TEARDOWN_TIMEOUT, &mut task).await {
            Ok(_) => info!(target: "session", link = link.id, "Session torn down"),
            Err(_) => {
                warn!(target: "session", link = link.id, "Stream task did not finish closing, aborting");
                task.abort();
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.live_link().is_some()
    }

    fn is_current(&self, link: LinkId) -> bool {
        // The link may have finished already: its last event is still news.
        self.link.as_ref().is_some_and(|current| current.id == link)
    }

    fn perform_resize(&mut self, width: u32, height: u32) {
        if let Some(link) = self.live_link() {
            let _ = link
                .outbound
                .send(Outbound::Frame(ClientFrame::Resize { width, height }));
        }
    }

    fn host_info(&self) -> Option<Value> {
        let link = self.live_link()?;
        lock(&link.host_info).clone()
    }

    fn screen_context(&self) -> Option<Value> {
        let link = self.live_link()?;
        let host_info = lock(&link.host_info).clone().unwrap_or(Value::Null);
        Some(json!({
            "screenID": link.id,
            "hostInfo": host_info,
        }))
    }

    fn send_input(&mut self, data: &str) -> Result<(), VtError> {
        let link = self
            .live_link()
            .ok_or_else(|| VtError::Transport("not connected".to_owned()))?;
        link.outbound
            .send(Outbound::Frame(ClientFrame::Input {
                data: data.to_owned(),
            }))
            .map_err(|_| VtError::Transport("stream task gone".to_owned()))
    }
}

impl Drop for WsTerminalSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn failure(code: u16, reason: impl Into<String>, terminal_message: &str) -> SessionEvent {
    SessionEvent::TransportError(TransportFailure {
        code,
        reason: reason.into(),
        terminal_message: terminal_message.to_owned(),
    })
}

/// Owns one WebSocket connection until it closes or the user closes it.
async fn stream_loop(
    url: String,
    connect_frame: ClientFrame,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
    host_info: Arc<Mutex<Option<Value>>>,
) {
    let connect = connect_async(url.as_str());
    tokio::pin!(connect);

    // A close while the handshake is pending ends the task without
    // reporting anything: the user no longer cares about this link.
    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    warn!(target: "session", url = %url, "Terminal stream connect failed: {}", e);
                    events.send(failure(
                        ABNORMAL_CLOSE_CODE,
                        e.to_string(),
                        "Unable to reach terminal stream",
                    ));
                    return;
                }
            },
            command = outbound_rx.recv() => match command {
                Some(Outbound::Frame(_)) => {
                    debug!(target: "session", "Dropping frame sent before the stream opened");
                }
                Some(Outbound::Close) | None => {
                    info!(target: "session", url = %url, "Closed before the stream opened");
                    return;
                }
            },
        }
    };
    info!(target: "session", url = %url, "Terminal stream connected");

    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write.send(Message::Text(connect_frame.to_json().into())).await {
        error!(target: "session", "Failed to send connect request: {}", e);
        events.send(failure(ABNORMAL_CLOSE_CODE, e.to_string(), "Connect request failed"));
        return;
    }
    events.send(SessionEvent::Opened);

    loop {
        tokio::select! {
            msg_result = read.next() => {
                match msg_result {
                    Some(Ok(Message::Binary(data))) => {
                        events.send(SessionEvent::Output(data.to_vec()));
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_text(text.as_str(), &events, &host_info);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let event = match frame {
                            Some(frame) if frame.code != CloseCode::Normal => {
                                let code = u16::from(frame.code);
                                let reason = frame.reason.as_str().to_owned();
                                warn!(target: "session", code, reason = %reason, "Terminal stream closed abnormally");
                                failure(code, reason, "Terminal stream closed")
                            }
                            _ => {
                                info!(target: "session", url = %url, "Terminal stream closed by server");
                                SessionEvent::Closed
                            }
                        };
                        events.send(event);
                        return;
                    }
                    Some(Err(e)) => {
                        error!(target: "session", url = %url, "Terminal stream error: {}", e);
                        events.send(failure(ABNORMAL_CLOSE_CODE, e.to_string(), "Terminal stream error"));
                        return;
                    }
                    None => {
                        warn!(target: "session", url = %url, "Terminal stream ended without close frame");
                        events.send(failure(ABNORMAL_CLOSE_CODE, "stream ended", "Terminal stream ended"));
                        return;
                    }
                    _ => {}
                }
            }

            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Frame(frame)) => {
                        if let Err(e) = write.send(Message::Text(frame.to_json().into())).await {
                            error!(target: "session", "Failed to send frame: {}", e);
                            events.send(failure(ABNORMAL_CLOSE_CODE, e.to_string(), "Terminal stream write failed"));
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let close = CloseFrame {
                            code: CloseCode::from(USER_CLOSE_CODE),
                            reason: USER_CLOSE_REASON.to_owned().into(),
                        };
                        if write.send(Message::Close(Some(close))).await.is_err() {
                            return;
                        }
                        // Wait for the server's close reply so the handshake completes.
                        while let Ok(Some(Ok(msg))) = timeout(CLOSE_HANDSHAKE_TIMEOUT, read.next()).await {
                            if msg.is_close() {
                                break;
                            }
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn handle_text(text: &str, events: &EventSink, host_info: &Arc<Mutex<Option<Value>>>) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            events.send(SessionEvent::Output(text.as_bytes().to_vec()));
            return;
        }
    };

    match frame.msg_type.as_str() {
        "hostInfo" => {
            *lock(host_info) = frame.data;
        }
        "output" => {
            if let Some(Value::String(data)) = frame.data {
                events.send(SessionEvent::Output(data.into_bytes()));
            }
        }
        other => {
            debug!(target: "session", msg_type = other, "Ignoring stream frame");
        }
    }
}
