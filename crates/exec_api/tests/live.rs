use std::future::Future;
use std::time::Duration;

use exec_api::{ChannelEvent, ExecutionRequest, Language, LiveChannel, SessionEvent};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts one WebSocket client and hands it to `script`.
async fn spawn_live_server<S, F>(script: S) -> (String, JoinHandle<()>)
where
    S: FnOnce(ServerSocket) -> F + Send + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("local TCP listener should bind");
    let addr = listener.local_addr().expect("listener address");
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept client");
        let socket = accept_async(socket).await.expect("websocket handshake");
        script(socket).await;
    });
    (format!("ws://{addr}/ws/execute"), handle)
}

fn collecting_sink() -> (
    Box<dyn FnMut(ChannelEvent) + Send>,
    mpsc::UnboundedReceiver<ChannelEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Box::new(move |event| {
            let _ = tx.send(event);
        }),
        rx,
    )
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive")
        .expect("sink should stay open")
}

async fn next_text(socket: &mut ServerSocket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("client frame should arrive")
            .expect("socket open")
            .expect("read frame");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("client frames are json");
        }
    }
}

async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .expect("send frame");
}

#[tokio::test]
async fn events_arrive_in_order_and_unknown_frames_are_dropped() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let (url, server) = spawn_live_server(move |mut socket| async move {
        let execute = next_text(&mut socket).await;
        let _ = frames_tx.send(execute);

        send_json(&mut socket, json!({"type": "output", "content": "a"})).await;
        send_json(&mut socket, json!({"type": "mystery", "content": "?"})).await;
        socket
            .send(WsMessage::Text("not json".into()))
            .await
            .expect("send garbage");
        send_json(&mut socket, json!({"type": "output", "content": "b"})).await;
        send_json(&mut socket, json!({"type": "input_required", "prompt": "> "})).await;
        send_json(
            &mut socket,
            json!({"type": "complete", "success": true, "exit_code": 0}),
        )
        .await;
        let _ = socket.close(None).await;
    })
    .await;

    let (sink, mut events) = collecting_sink();
    let channel = LiveChannel::connect(&url, sink).await.expect("connect");
    assert!(channel.is_connected());

    channel.send(&ExecutionRequest::new("print(input())", Language::Python).with_input("3"));

    let execute = timeout(Duration::from_secs(2), frames_rx.recv())
        .await
        .expect("server saw execute")
        .expect("frame");
    assert_eq!(
        execute,
        json!({
            "type": "execute",
            "code": "print(input())",
            "language": "python",
            "input_data": "3\n",
            "compile_only": false,
        })
    );

    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Session(SessionEvent::Output {
            content: "a".to_string()
        })
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Session(SessionEvent::Output {
            content: "b".to_string()
        })
    );
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::Session(SessionEvent::InputRequired {
            prompt: "> ".to_string()
        })
    );
    match next_event(&mut events).await {
        ChannelEvent::Session(SessionEvent::Complete { success, exit_info }) => {
            assert!(success);
            assert_eq!(exit_info["exit_code"], 0);
        }
        other => panic!("expected complete, got {other:?}"),
    }
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Closed { .. }
    ));
    assert!(!channel.is_connected());

    server.await.expect("server task");
}

#[tokio::test]
async fn send_input_frames_the_line() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let (url, server) = spawn_live_server(move |mut socket| async move {
        let frame = next_text(&mut socket).await;
        let _ = frames_tx.send(frame);
    })
    .await;

    let (sink, _events) = collecting_sink();
    let channel = LiveChannel::connect(&url, sink).await.expect("connect");
    channel.send_input("5");

    let frame = timeout(Duration::from_secs(2), frames_rx.recv())
        .await
        .expect("server saw input")
        .expect("frame");
    assert_eq!(frame, json!({"type": "input", "content": "5"}));

    server.await.expect("server task");
}

#[tokio::test]
async fn sending_after_remote_close_reports_not_connected() {
    let (url, server) = spawn_live_server(|mut socket| async move {
        let _ = socket.close(None).await;
    })
    .await;

    let (sink, mut events) = collecting_sink();
    let channel = LiveChannel::connect(&url, sink).await.expect("connect");

    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::Closed { .. }
    ));
    assert!(!channel.is_connected());

    channel.send(&ExecutionRequest::new("x", Language::C));
    assert_eq!(
        next_event(&mut events).await,
        ChannelEvent::SendFailed {
            message: "Not connected to execution server".to_string()
        }
    );

    channel.send_input("late");
    assert!(matches!(
        next_event(&mut events).await,
        ChannelEvent::SendFailed { .. }
    ));

    server.await.expect("server task");
}

#[tokio::test]
async fn disconnect_closes_the_socket_without_a_closed_event() {
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let (url, server) = spawn_live_server(move |mut socket| async move {
        while let Some(frame) = socket.next().await {
            match frame {
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = closed_tx.send(());
    })
    .await;

    let (sink, mut events) = collecting_sink();
    let mut channel = LiveChannel::connect(&url, sink).await.expect("connect");
    channel.disconnect();
    assert!(!channel.is_connected());

    timeout(Duration::from_secs(2), closed_rx.recv())
        .await
        .expect("server observed the close");
    assert!(events.try_recv().is_err());

    server.await.expect("server task");
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (sink, _events) = collecting_sink();
    let result = LiveChannel::connect(&format!("ws://{addr}/ws/execute"), sink).await;
    assert!(result.is_err());
}
