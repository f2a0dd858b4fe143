//! End-to-end tests against an in-process WebSocket server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use alive_client::{AliveClient, AliveEvent, AliveEventPayload, ClientOptions, Subscription, Topic};

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;
type Events = mpsc::UnboundedReceiver<(Vec<String>, AliveEvent)>;

/// Accept one connection, returning it with the requested URI.
async fn accept(listener: &TcpListener) -> (ServerSocket, String) {
    let (stream, _) = timeout(TIMEOUT, listener.accept())
        .await
        .expect("client connects")
        .unwrap();
    let mut uri = String::new();
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        uri = req.uri().to_string();
        Ok(resp)
    })
    .await
    .unwrap();
    (ws, uri)
}

/// Next text frame from the client, decoded.
async fn next_frame(ws: &mut ServerSocket) -> Value {
    loop {
        let message = timeout(TIMEOUT, ws.next())
            .await
            .expect("client sends a frame")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send(ws: &mut ServerSocket, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn start() -> (TcpListener, AliveClient<String>, Events) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (notifier, events) = mpsc::unbounded_channel();
    let options = ClientOptions::new(
        format!("ws://{addr}/u/5/ws?token=t1"),
        "http://127.0.0.1:1/refresh",
    );
    let client = AliveClient::connect(options, notifier);
    (listener, client, events)
}

fn room(subscriber: &str) -> Subscription<String> {
    Subscription::new(subscriber.to_owned(), Topic::new("room", "room--sig"))
}

#[tokio::test]
async fn subscribes_and_delivers_messages() {
    let (listener, client, mut events) = start().await;
    client.subscribe(vec![room("a")]).unwrap();

    let (mut ws, uri) = accept(&listener).await;
    assert!(uri.starts_with("/u/5/ws?token=t1&shared=false&p="), "{uri}");
    assert!(uri.ends_with(".0"), "{uri}");
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"subscribe": {"room--sig": ""}})
    );

    send(
        &mut ws,
        json!({"e": "msg", "ch": "room", "off": "3", "data": {"timestamp": 10, "text": "hi"}}),
    )
    .await;

    let (to, event) = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(to, vec!["a".to_owned()]);
    assert_eq!(event.channel, "room");
    let AliveEventPayload::Message(data) = event.payload else {
        panic!("expected a message, got {:?}", event.payload);
    };
    assert_eq!(data.wait, 0);
    assert_eq!(data.extra["text"], json!("hi"));

    client.shutdown().unwrap();
}

#[tokio::test]
async fn server_reconnect_resubscribes_from_last_offset() {
    let (listener, client, mut events) = start().await;
    client.subscribe(vec![room("a")]).unwrap();

    let (mut ws, _) = accept(&listener).await;
    let _ = next_frame(&mut ws).await;
    send(
        &mut ws,
        json!({"e": "msg", "ch": "room", "off": "9", "data": {"timestamp": 1}}),
    )
    .await;
    let _ = timeout(TIMEOUT, events.recv()).await.unwrap();

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "Alive Reconnect".into(),
    }))
    .await
    .unwrap();
    drop(ws);

    let (mut ws, uri) = accept(&listener).await;
    assert!(uri.ends_with(".1"), "{uri}");
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"subscribe": {"room--sig": "9"}})
    );

    client.shutdown().unwrap();
}

#[tokio::test]
async fn presence_channel_reports_own_user_first() {
    let (listener, client, mut events) = start().await;
    client
        .subscribe(vec![Subscription::new(
            "a".to_owned(),
            Topic::new("presence-doc", "presence-doc--sig"),
        )])
        .unwrap();

    let (mut ws, _) = accept(&listener).await;
    assert_eq!(
        next_frame(&mut ws).await,
        json!({"subscribe": {"presence-doc--sig": "[]"}})
    );

    send(
        &mut ws,
        json!({
            "e": "msg", "ch": "presence-doc", "off": "1",
            "data": {"e": "pf", "d": [{"u": 6, "p": "x_1.1", "m": [{"cursor": 4}]}]}
        }),
    )
    .await;

    let (_, event) = timeout(TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        json!({
            "channel": "presence-doc",
            "type": "presence",
            "data": [
                {"userId": 5, "isOwnUser": true, "metadata": []},
                {"userId": 6, "isOwnUser": false, "metadata": [{"cursor": 4}]}
            ]
        })
    );

    client.shutdown().unwrap();
}

#[tokio::test]
async fn shutdown_closes_the_socket() {
    let (listener, client, _events) = start().await;
    let (mut ws, _) = accept(&listener).await;

    client.shutdown().unwrap();
    timeout(TIMEOUT, client.closed()).await.unwrap();

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
