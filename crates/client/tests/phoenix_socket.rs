//! End-to-end tests: the bridge driving real sockets against an in-process
//! Phoenix-style websocket server.

use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use phoenix_ports_client::{Bridge, PhoenixConnector, SocketOptions};
use phoenix_ports_shared::{Envelope, Event, PhxMessage, HEARTBEAT, PHX_JOIN, PHX_LEAVE};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type Handler = fn(&PhxMessage) -> Vec<PhxMessage>;

fn ok(msg: &PhxMessage, response: Value) -> PhxMessage {
    PhxMessage::reply(
        msg.join_ref.clone(),
        msg.msg_ref.clone(),
        msg.topic.clone(),
        "ok",
        response,
    )
}

/// Joins succeed except on `room:secret`, pushes are echoed as broadcasts.
fn chat_server(msg: &PhxMessage) -> Vec<PhxMessage> {
    match msg.event.as_str() {
        PHX_JOIN if msg.topic == "room:secret" => vec![PhxMessage::reply(
            msg.join_ref.clone(),
            msg.msg_ref.clone(),
            msg.topic.clone(),
            "error",
            json!({"reason": "unauthorized"}),
        )],
        PHX_JOIN => vec![ok(msg, json!({"history": []}))],
        PHX_LEAVE | HEARTBEAT => vec![ok(msg, json!({}))],
        _ => {
            let mut broadcast = PhxMessage::new(msg.topic.clone(), msg.event.clone(), msg.payload.clone());
            broadcast.join_ref = msg.join_ref.clone();
            vec![ok(msg, json!({})), broadcast]
        }
    }
}

/// Never answers anything.
fn silent_server(_msg: &PhxMessage) -> Vec<PhxMessage> {
    Vec::new()
}

/// Accept one websocket and answer each frame with `handler`. Returns the endpoint.
async fn serve(handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(frame)) = ws.next().await {
            let Message::Text(text) = frame else {
                continue;
            };
            let Some(msg) = PhxMessage::from_text(text.as_str()) else {
                continue;
            };
            for reply in handler(&msg) {
                if ws.send(Message::Text(reply.to_text().into())).await.is_err() {
                    return;
                }
            }
        }
    });

    format!("ws://{}/socket", addr)
}

struct Host {
    commands: UnboundedSender<Envelope>,
    events: UnboundedReceiver<Event>,
}

impl Host {
    fn start(options: SocketOptions) -> Self {
        let (commands, command_rx) = unbounded();
        let (event_tx, events) = unbounded();
        let bridge = Bridge::new(PhoenixConnector::new(options), event_tx);
        tokio::spawn(bridge.run(command_rx));
        Self { commands, events }
    }

    fn send(&self, tag: &str, data: Value) {
        self.commands
            .unbounded_send(Envelope::new(tag, data))
            .unwrap();
    }

    async fn next(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.next())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream ended")
    }
}

#[tokio::test]
async fn test_chat_session() {
    let endpoint = serve(chat_server).await;
    let mut host = Host::start(SocketOptions::default());

    host.send(
        "CreateSocket",
        json!({"endpoint": endpoint, "name": "s1", "debug": true, "params": {"token": "abc"}}),
    );
    assert_eq!(
        host.next().await,
        Event::SocketOpened {
            socket_name: "s1".to_string()
        }
    );

    host.send(
        "CreateChannel",
        json!({"socketName": "s1", "topic": "room:lobby", "payload": {}, "messages": ["new_msg"]}),
    );
    assert_eq!(
        host.next().await,
        Event::ChannelJoined {
            payload: json!({"history": []}),
            topic: "room:lobby".to_string(),
        }
    );

    // Unsubscribed events are echoed by the server but not forwarded
    host.send(
        "CreatePush",
        json!({"topic": "room:lobby", "event": "typing", "payload": {}}),
    );
    host.send(
        "CreatePush",
        json!({"topic": "room:lobby", "event": "new_msg", "payload": {"text": "hi"}}),
    );
    assert_eq!(
        host.next().await,
        Event::ChannelMessageReceived {
            payload: json!({"text": "hi"}),
            topic: "room:lobby".to_string(),
            message: "new_msg".to_string(),
        }
    );

    host.send("CreateChannel", json!({"socketName": "s1", "topic": "room:secret"}));
    assert_eq!(
        host.next().await,
        Event::ChannelJoinError {
            payload: json!({"reason": "unauthorized"}),
            topic: "room:secret".to_string(),
        }
    );

    host.send("LeaveChannel", json!({"topic": "room:lobby"}));
    assert_eq!(
        host.next().await,
        Event::ChannelLeft {
            payload: json!({}),
            topic: "room:lobby".to_string(),
        }
    );

    host.send("Disconnect", json!({"socketName": "s1"}));
    assert_eq!(
        host.next().await,
        Event::SocketClosed {
            socket_name: "s1".to_string()
        }
    );
}

#[tokio::test]
async fn test_join_times_out() {
    let endpoint = serve(silent_server).await;
    let mut host = Host::start(SocketOptions {
        timeout: Duration::from_millis(200),
        heartbeat_interval: Duration::from_secs(30),
    });

    host.send("CreateSocket", json!({"endpoint": endpoint}));
    assert!(matches!(host.next().await, Event::SocketOpened { .. }));

    host.send("CreateChannel", json!({"topic": "room:lobby"}));
    assert_eq!(
        host.next().await,
        Event::ChannelJoinTimeout {
            topic: "room:lobby".to_string()
        }
    );
}

#[tokio::test]
async fn test_unanswered_heartbeat_closes_socket() {
    let endpoint = serve(silent_server).await;
    let mut host = Host::start(SocketOptions {
        timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_millis(100),
    });

    host.send("CreateSocket", json!({"endpoint": endpoint, "name": "s1"}));
    assert!(matches!(host.next().await, Event::SocketOpened { .. }));

    assert_eq!(
        host.next().await,
        Event::SocketErrored {
            error: "heartbeat timeout".to_string(),
            socket_name: "s1".to_string(),
        }
    );
    assert_eq!(
        host.next().await,
        Event::SocketClosed {
            socket_name: "s1".to_string()
        }
    );
}

#[tokio::test]
async fn test_refused_connection_reports_error_then_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut host = Host::start(SocketOptions::default());
    host.send(
        "CreateSocket",
        json!({"endpoint": format!("ws://{}/socket", addr), "name": "s1"}),
    );
    host.send("CreateChannel", json!({"socketName": "s1", "topic": "room:lobby"}));

    let mut events = Vec::new();
    for _ in 0..3 {
        events.push(host.next().await);
    }
    assert!(events.contains(&Event::ChannelJoinError {
        payload: json!({"reason": "socket closed"}),
        topic: "room:lobby".to_string(),
    }));
    let errored = events
        .iter()
        .position(|e| matches!(e, Event::SocketErrored { socket_name, .. } if socket_name == "s1"));
    let closed = events.iter().position(|e| {
        *e == Event::SocketClosed {
            socket_name: "s1".to_string(),
        }
    });
    assert!(errored.is_some());
    assert!(errored < closed);
}
