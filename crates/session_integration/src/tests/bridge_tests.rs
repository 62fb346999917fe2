use super::*;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;

type Sidecar = WebSocketStream<TcpStream>;

async fn spawn_sidecar<F, Fut>(script: F) -> Url
where
    F: FnOnce(Sidecar) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let socket = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        script(socket).await;
    });
    Url::parse(&format!("ws://{addr}/session")).expect("url")
}

async fn next_request(socket: &mut Sidecar) -> (u64, BridgeCall) {
    loop {
        let frame = socket.next().await.expect("frame").expect("frame ok");
        if let Message::Text(text) = frame {
            let BridgeOutbound::Request { id, call } =
                serde_json::from_str(&text).expect("request frame");
            return (id, call);
        }
    }
}

async fn push(socket: &mut Sidecar, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .expect("push frame");
}

async fn reply(socket: &mut Sidecar, id: u64, result: Value) {
    push(
        socket,
        json!({ "type": "response", "payload": { "id": id, "result": result } }),
    )
    .await;
}

fn session_for(url: Url) -> (BridgeSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = SessionEventSink::new(move |event| {
        let _ = tx.send(event);
    });
    let config = BridgeConfig {
        url,
        store: SessionStoreConfig::default(),
        request_timeout: Duration::from_secs(5),
    };
    (BridgeSession::new(config, sink), rx)
}

#[test]
fn request_frames_use_method_and_camel_case_params() {
    let frame = serde_json::to_value(BridgeOutbound::Request {
        id: 7,
        call: BridgeCall::SendMessage {
            chat_id: ChatId("628123@c.us".into()),
            text: "hi".into(),
        },
    })
    .expect("serialize");
    assert_eq!(
        frame,
        json!({
            "type": "request",
            "payload": {
                "id": 7,
                "call": { "method": "send_message", "params": { "chatId": "628123@c.us", "text": "hi" } }
            }
        })
    );
}

#[test]
fn unit_events_parse_without_payload() {
    let inbound: BridgeInbound =
        serde_json::from_str(r#"{"type":"authenticated"}"#).expect("parse");
    assert_eq!(inbound.into_event(), Some(SessionEvent::Authenticated));
}

#[tokio::test]
async fn initialize_forwards_store_and_relays_lifecycle_events() {
    let url = spawn_sidecar(|mut socket| async move {
        let (id, call) = next_request(&mut socket).await;
        assert_eq!(
            call,
            BridgeCall::Initialize {
                data_path: "./session".into(),
                client_id: "bot1".into(),
            }
        );
        push(&mut socket, json!({ "type": "qr", "payload": { "code": "QR-1" } })).await;
        reply(&mut socket, id, Value::Null).await;
        push(
            &mut socket,
            json!({
                "type": "ready",
                "payload": { "info": { "displayName": "Bot", "userId": "6280000", "platform": "android" } }
            }),
        )
        .await;
        while socket.next().await.is_some() {}
    })
    .await;

    let (session, mut events) = session_for(url);
    session.initialize().await.expect("initialize");

    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Qr {
            code: "QR-1".into()
        })
    );
    let Some(SessionEvent::Ready { info: Some(info) }) = events.recv().await else {
        panic!("expected ready with account info");
    };
    assert_eq!(info.user_id, "6280000");
}

#[tokio::test]
async fn data_calls_map_results_and_errors() {
    let url = spawn_sidecar(|mut socket| async move {
        let (id, _) = next_request(&mut socket).await;
        reply(&mut socket, id, Value::Null).await;

        let (id, call) = next_request(&mut socket).await;
        assert_eq!(
            call,
            BridgeCall::GetNumberId {
                number: "0812345".into()
            }
        );
        reply(&mut socket, id, Value::Null).await;

        let (id, _) = next_request(&mut socket).await;
        push(
            &mut socket,
            json!({ "type": "response", "payload": { "id": id, "error": "page crashed" } }),
        )
        .await;
        while socket.next().await.is_some() {}
    })
    .await;

    let (session, _events) = session_for(url);
    session.initialize().await.expect("initialize");

    let lookup = session.get_number_id("0812345").await.expect("lookup");
    assert_eq!(lookup, None);

    let err = session.get_state().await.expect_err("bridge error");
    assert!(err.to_string().contains("page crashed"), "{err:#}");
}

#[tokio::test]
async fn unexpected_close_emits_disconnected() {
    let url = spawn_sidecar(|mut socket| async move {
        let (id, _) = next_request(&mut socket).await;
        reply(&mut socket, id, Value::Null).await;
        let _ = socket.close(None).await;
    })
    .await;

    let (session, mut events) = session_for(url);
    session.initialize().await.expect("initialize");

    assert_eq!(
        events.recv().await,
        Some(SessionEvent::Disconnected {
            reason: BRIDGE_CLOSED_REASON.into()
        })
    );
}

#[tokio::test]
async fn calls_before_initialize_fail() {
    let url = Url::parse("ws://127.0.0.1:9/session").expect("url");
    let (session, _events) = session_for(url);
    let err = session.get_chats().await.expect_err("not open");
    assert!(err.to_string().contains("not open"));
    session.destroy().await.expect("destroy of unopened session is a no-op");
}
