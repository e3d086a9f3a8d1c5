use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use vt_client::protocol::{ConnectRequest, RendererSettings, SecurityType};
use vt_client::session::{
    LinkEvent, SessionEvent, TerminalSession, USER_CLOSE_CODE, WsTerminalSession,
};

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> SessionEvent {
    let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.link, 1);
    event.event
}

fn request(url: &str) -> ConnectRequest {
    ConnectRequest::new("mvs.example.com".into(), 23, SecurityType::Telnet, url.into())
}

/// Accept one connection, hand the first text frame back on `first_tx`,
/// then run `script` against the socket.
async fn one_shot_server<F, Fut>(script: F) -> (String, mpsc::UnboundedReceiver<Value>)
where
    F: FnOnce(
            tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        ) -> Fut
        + Send
        + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (first_tx, first_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            let _ = first_tx.send(frame);
        }
        script(ws).await;
    });

    (format!("ws://{addr}/terminalstream"), first_rx)
}

#[tokio::test]
async fn server_close_code_becomes_transport_error() {
    let (url, mut first_rx) = one_shot_server(|mut ws| async move {
        let close = CloseFrame {
            code: CloseCode::from(4000),
            reason: "timeout".into(),
        };
        let _ = ws.send(Message::Close(Some(close))).await;
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = WsTerminalSession::new(tx);
    session
        .connect(&RendererSettings::default(), request(&url))
        .unwrap();
    assert!(session.is_connected());

    let first = timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first["type"], "connect");
    assert_eq!(first["connectionSettings"]["host"], "mvs.example.com");
    assert_eq!(first["connectionSettings"]["screenWidth"], "MAX");
    assert_eq!(first["rendererSettings"]["fontProperties"]["size"], 14);

    assert_eq!(next_event(&mut rx).await, SessionEvent::Opened);
    match next_event(&mut rx).await {
        SessionEvent::TransportError(failure) => {
            assert_eq!(failure.code, 4000);
            assert_eq!(failure.reason, "timeout");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn output_and_host_info_frames() {
    let (url, mut first_rx) = one_shot_server(|mut ws| async move {
        let host_info = json!({"type": "hostInfo", "data": {"lpar": "SYS1"}});
        let output = json!({"type": "output", "data": "READY"});
        ws.send(Message::Text(host_info.to_string().into())).await.unwrap();
        ws.send(Message::Text(output.to_string().into())).await.unwrap();
        ws.send(Message::Binary(b"\x1b[H".to_vec().into())).await.unwrap();
        // Hold the socket open until the client closes it.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    })
    .await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = WsTerminalSession::new(tx);
    session
        .connect(&RendererSettings::default(), request(&url))
        .unwrap();
    timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();

    assert_eq!(next_event(&mut rx).await, SessionEvent::Opened);
    assert_eq!(next_event(&mut rx).await, SessionEvent::Output(b"READY".to_vec()));
    assert_eq!(next_event(&mut rx).await, SessionEvent::Output(b"\x1b[H".to_vec()));

    assert_eq!(session.host_info(), Some(json!({"lpar": "SYS1"})));
    let context = session.screen_context().unwrap();
    assert_eq!(context["hostInfo"]["lpar"], "SYS1");

    session.close();
    session.close();
    assert!(!session.is_connected());
}

#[tokio::test]
async fn user_close_sends_close_code() {
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();
    let (url, mut first_rx) = one_shot_server(move |mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let _ = close_tx.send(frame.map(|f| (u16::from(f.code), f.reason.as_str().to_owned())));
                break;
            }
        }
    })
    .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut session = WsTerminalSession::new(tx);
    session
        .connect(&RendererSettings::default(), request(&url))
        .unwrap();
    timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();

    session.close();
    let frame = timeout(WAIT, close_rx.recv()).await.unwrap().unwrap();
    assert_eq!(frame, Some((USER_CLOSE_CODE, "Closed by user".to_owned())));
}

#[tokio::test]
async fn teardown_waits_for_close_frame() {
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();
    let (url, mut first_rx) = one_shot_server(move |mut ws| async move {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                let _ = close_tx.send(frame.map(|f| u16::from(f.code)));
                break;
            }
        }
    })
    .await;

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut session = WsTerminalSession::new(tx);
    session
        .connect(&RendererSettings::default(), request(&url))
        .unwrap();
    timeout(WAIT, first_rx.recv()).await.unwrap().unwrap();

    timeout(WAIT, session.teardown()).await.unwrap();
    assert!(!session.is_connected());
    // The server saw the close frame before teardown returned.
    assert_eq!(close_rx.try_recv().ok(), Some(Some(USER_CLOSE_CODE)));
}

#[tokio::test]
async fn unreachable_stream_reports_abnormal_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = WsTerminalSession::new(tx);
    session
        .connect(
            &RendererSettings::default(),
            request(&format!("ws://{addr}/terminalstream")),
        )
        .unwrap();

    match next_event(&mut rx).await {
        SessionEvent::TransportError(failure) => assert_eq!(failure.code, 1006),
        other => panic!("expected transport error, got {other:?}"),
    }
}
