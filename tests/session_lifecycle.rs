//! Controller and real WebSocket session driven together.

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use common::{RecordingShell, options};
use vt_client::app::{App, Command};
use vt_client::config_store::FileConfigStore;
use vt_client::controller::{ConnectionLifecycleController, ControllerOptions, ToggleOutcome};
use vt_client::dispatcher::RecognizerTable;
use vt_client::host_shell::{DISCONNECTED_TITLE, ShellEvent};
use vt_client::session::{LinkEvent, SessionEvent, USER_CLOSE_CODE, WsTerminalSession};
use vt_client::state_machine::connection_sm::ConnectionPhase;

const WAIT: Duration = Duration::from_secs(5);

type WsController = ConnectionLifecycleController<WsTerminalSession, RecordingShell>;

fn options_for(url: &str) -> ControllerOptions {
    ControllerOptions {
        stream_url: url.to_owned(),
        ..options()
    }
}

fn ws_controller(url: &str) -> (WsController, mpsc::UnboundedReceiver<LinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = ConnectionLifecycleController::new(
        WsTerminalSession::new(tx),
        RecordingShell::default(),
        options_for(url),
    );
    (controller, rx)
}

/// Serve every accepted connection with `drop_first` deciding whether the
/// first one is cut right after the handshake. Each connect frame that
/// arrives is reported on the returned channel.
async fn stream_server(drop_first: bool) -> (String, mpsc::UnboundedReceiver<usize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            index += 1;
            let seen_tx = seen_tx.clone();
            let cut = drop_first && index == 1;
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                if cut {
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(_) => {
                            let _ = seen_tx.send(index);
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });

    (format!("ws://{addr}/terminalstream"), seen_rx)
}

async fn wait_disconnected(c: &WsController) {
    timeout(WAIT, async {
        while c.is_connected() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Deliver whatever the session reported within a short quiet period.
async fn drain(c: &mut WsController, rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut delivered = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(200), rx.recv()).await {
        delivered.push(event.clone());
        c.handle_session_event(event);
    }
    delivered
}

#[tokio::test]
async fn late_failure_of_replaced_link_keeps_new_session() {
    let (url, mut seen_rx) = stream_server(true).await;
    let (mut c, mut rx) = ws_controller(&url);

    assert_eq!(c.toggle_connection(), ToggleOutcome::Connected);

    // Hold back everything the first link reports until it has failed.
    let mut stale = Vec::new();
    loop {
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.link, 1);
        let failed = matches!(event.event, SessionEvent::TransportError(_));
        stale.push(event);
        if failed {
            break;
        }
    }
    wait_disconnected(&c).await;

    assert_eq!(c.toggle_connection(), ToggleOutcome::Connected);
    assert_eq!(timeout(WAIT, seen_rx.recv()).await.unwrap(), Some(2));

    for event in stale {
        assert!(c.handle_session_event(event).is_none());
    }
    let fresh = drain(&mut c, &mut rx).await;
    assert!(fresh.iter().all(|e| e.link == 2), "{fresh:?}");

    assert!(c.is_connected());
    assert!(!c.error_bar().is_visible());
    assert_eq!(c.phase(), ConnectionPhase::Connected);
    assert_ne!(c.shell().title(), DISCONNECTED_TITLE);
}

#[tokio::test]
async fn disconnect_during_connect_then_reconnect() {
    let (url, mut seen_rx) = stream_server(false).await;
    let (mut c, mut rx) = ws_controller(&url);

    // No await in between: the first link is closed before its handshake.
    assert_eq!(c.toggle_connection(), ToggleOutcome::Connected);
    assert_eq!(c.toggle_connection(), ToggleOutcome::Disconnected);
    assert_eq!(c.toggle_connection(), ToggleOutcome::Connected);

    assert!(timeout(WAIT, seen_rx.recv()).await.unwrap().is_some());
    let delivered = drain(&mut c, &mut rx).await;
    assert!(delivered.iter().all(|e| e.link == 2), "{delivered:?}");
    assert!(delivered.iter().any(|e| e.event == SessionEvent::Opened));

    assert!(c.is_connected());
    assert!(!c.error_bar().is_visible());
    assert_eq!(c.phase(), ConnectionPhase::Connected);
    assert!(seen_rx.try_recv().is_err());
}

/// The shell's close request is acknowledged only once the close frame is
/// out, so dropping the runtime right after the ack loses nothing.
#[test]
fn close_frame_sent_before_close_ack() {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    std_listener.set_nonblocking(true).unwrap();
    let url = format!("ws://{}/terminalstream", std_listener.local_addr().unwrap());

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = std::sync::mpsc::channel();
    let server = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = TcpListener::from_std(std_listener).unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(_) => {
                        let _ = first_tx.send(());
                    }
                    Message::Close(frame) => {
                        let _ = close_tx.send(frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned())));
                    }
                    _ => {}
                }
            }
        });
    });

    let dir = tempfile::tempdir().unwrap();
    let client = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    client.block_on(async {
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let controller = ConnectionLifecycleController::new(
            WsTerminalSession::new(session_tx),
            RecordingShell::default(),
            options_for(&url),
        );
        let mut app = App::new(controller, FileConfigStore::new(dir.path()), RecognizerTable::default());
        app.handle_command(Command::Toggle);
        timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();

        let (shell_tx, shell_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        shell_tx.send(ShellEvent::Close(ack_tx)).unwrap();
        let (_writer, reader) = tokio::io::duplex(64);
        app.run(tokio::io::BufReader::new(reader), session_rx, shell_rx)
            .await
            .unwrap();
        ack_rx.await.unwrap();
    });
    drop(client);

    let frame = close_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(frame, Some((USER_CLOSE_CODE, "Closed by user".to_owned())));
    server.join().unwrap();
}
