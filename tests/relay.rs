use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use room_relay::messages::ServerMessage;
use room_relay::{routes, Server};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn start() -> (SocketAddr, Arc<Server>) {
    let server = Arc::new(Server::new());
    let (addr, serving) =
        warp::serve(routes::build_filters(Arc::clone(&server))).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serving);
    (addr, server)
}

async fn connect(addr: SocketAddr, user: &str) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws?userId={user}"))
        .await
        .expect("connect");
    assert!(matches!(recv(&mut ws).await, ServerMessage::Connected { .. }));
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.expect("send");
}

async fn recv(ws: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("server frame");
        }
    }
}

async fn expect_silence(ws: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame {next:?}");
}

#[tokio::test]
async fn call_setup_between_two_peers() {
    let (addr, _server) = start();
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    send(&mut alice, json!({"type": "call:join", "roomId": "call_1"})).await;
    // let alice's join land before bob's
    tokio::time::sleep(Duration::from_millis(50)).await;
    send(&mut bob, json!({"type": "call:join", "roomId": "call_1"})).await;

    assert_eq!(
        recv(&mut alice).await,
        ServerMessage::PeerJoined {
            room_id: "call_1".into(),
            peer_user_id: "bob".into()
        }
    );
    expect_silence(&mut bob).await;

    let offer = json!({"type": "offer", "sdp": "v=0"});
    send(
        &mut alice,
        json!({"type": "call:signal", "targetUserId": "bob", "roomId": "call_1", "signal": offer}),
    )
    .await;
    assert_eq!(
        recv(&mut bob).await,
        ServerMessage::Signal {
            from_user_id: "alice".into(),
            room_id: "call_1".into(),
            signal: offer
        }
    );

    send(
        &mut alice,
        json!({"type": "call:signal", "targetUserId": "zed", "roomId": "call_1", "signal": {}}),
    )
    .await;
    expect_silence(&mut alice).await;
    expect_silence(&mut bob).await;
}

#[tokio::test]
async fn disconnect_stops_delivery() {
    let (addr, server) = start();
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    for ws in [&mut alice, &mut bob] {
        send(ws, json!({"type": "join_channel", "roomId": "general"})).await;
        assert!(matches!(recv(ws).await, ServerMessage::History { .. }));
    }

    bob.close(None).await.expect("close");
    for _ in 0..100 {
        if server.channels().members_of("general").await.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.channels().members_of("general").await.len(), 1);

    send(
        &mut alice,
        json!({
            "type": "send_message",
            "roomId": "general",
            "message": {"id": "m1", "content": "anyone?", "timestamp": 5}
        }),
    )
    .await;
    match recv(&mut alice).await {
        ServerMessage::NewMessage { message, .. } => assert_eq!(message.user_id, "alice"),
        other => panic!("unexpected {other:?}"),
    }
}
