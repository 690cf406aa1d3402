//! Native Phoenix socket implementation using tokio-tungstenite.

use std::collections::HashMap;

use futures_channel::mpsc::{unbounded, UnboundedReceiver};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use phoenix_ports_shared::{empty_payload, reason_payload, PhxMessage, PHX_CLOSE, PHX_ERROR};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{
    endpoint_url, ConnectRequest, ConnectionState, Connector, Notice, NoticeKind, NoticeSender,
    Outbound, PhoenixSocket, Reply, SocketId, SocketOptions,
};
use crate::error::ClientError;
use crate::logging::TransportLogger;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Opens [`PhoenixSocket`]s, each driven by its own tokio task.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct PhoenixConnector {
    options: SocketOptions,
}

impl PhoenixConnector {
    pub fn new(options: SocketOptions) -> Self {
        Self { options }
    }
}

impl Connector for PhoenixConnector {
    type Socket = PhoenixSocket;

    fn connect(
        &mut self,
        request: ConnectRequest,
        notices: NoticeSender,
    ) -> Result<PhoenixSocket, ClientError> {
        let url = endpoint_url(&request.endpoint, &request.params)?;
        let (sender, receiver) = unbounded();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let connection = Connection {
            id: request.id,
            name: request.name.clone(),
            url,
            options: self.options.clone(),
            notices: notices.clone(),
            state: state_tx,
            logger: TransportLogger::new(&request.name, request.debug),
            next_ref: 0,
            channels: HashMap::new(),
            pending: HashMap::new(),
            heartbeat_ref: None,
        };
        tokio::spawn(connection.run(receiver));

        Ok(PhoenixSocket::new(
            request.id,
            request.name,
            sender,
            state_rx,
            notices,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingKind {
    Join,
    Leave,
}

/// A join or leave waiting for its `phx_reply`
#[derive(Debug)]
struct Pending {
    kind: PendingKind,
    topic: String,
    deadline: Instant,
}

/// State owned by one socket's task
struct Connection {
    id: SocketId,
    name: String,
    url: Url,
    options: SocketOptions,
    notices: NoticeSender,
    state: watch::Sender<ConnectionState>,
    logger: TransportLogger,
    next_ref: u64,
    /// topic -> join_ref of the current join
    channels: HashMap<String, String>,
    /// msg_ref -> request awaiting a reply
    pending: HashMap<String, Pending>,
    heartbeat_ref: Option<String>,
}

impl Connection {
    async fn run(mut self, mut receiver: UnboundedReceiver<Outbound>) {
        crate::log_info!("Socket '{}' connecting to {}", self.name, self.url);

        let ws_stream = match connect_async(self.url.as_str()).await {
            Ok((ws_stream, _response)) => ws_stream,
            Err(e) => {
                crate::log_error!("Socket '{}' failed to connect: {}", self.name, e);
                self.finish(receiver, Some(e.to_string()));
                return;
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        crate::log_info!("Socket '{}' connected", self.name);
        self.notify(NoticeKind::Opened);

        let (mut write, mut read) = ws_stream.split();
        let period = self.options.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failure: Option<String> = None;
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                outbound = receiver.next() => match outbound {
                    Some(Outbound::Disconnect) | None => {
                        crate::log_info!("Socket '{}' disconnecting", self.name);
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Some(outbound) => {
                        if let Some(frame) = self.handle_outbound(outbound) {
                            if let Err(e) = self.send_frame(&mut write, &frame).await {
                                failure = Some(format!("send failed: {}", e));
                                break;
                            }
                        }
                    }
                },
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        crate::log_info!("Socket '{}' received close frame: {:?}", self.name, frame);
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the JSON protocol; ping/pong is handled by tungstenite
                    }
                    Some(Err(e)) => {
                        failure = Some(e.to_string());
                        break;
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if self.heartbeat_ref.is_some() {
                        failure = Some("heartbeat timeout".to_string());
                        break;
                    }
                    let msg_ref = self.make_ref();
                    let frame = PhxMessage::heartbeat(&msg_ref);
                    self.heartbeat_ref = Some(msg_ref);
                    if let Err(e) = self.send_frame(&mut write, &frame).await {
                        failure = Some(format!("send failed: {}", e));
                        break;
                    }
                },
                _ = sleep_until(deadline) => {
                    let frames = self.expire_pending();
                    if let Err(e) = self.send_frames(&mut write, &frames).await {
                        failure = Some(format!("send failed: {}", e));
                        break;
                    }
                },
            }
        }

        self.finish(receiver, failure);
    }

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn notify(&self, kind: NoticeKind) {
        let notice = Notice {
            socket: self.id,
            socket_name: self.name.clone(),
            kind,
        };
        if self.notices.unbounded_send(notice).is_err() {
            crate::log_debug!("Socket '{}' has no listener for notices", self.name);
        }
    }

    async fn send_frame(&self, write: &mut WsWrite, frame: &PhxMessage) -> Result<(), tungstenite::Error> {
        if self.logger.is_enabled() {
            self.logger.log("push", &describe(frame), &frame.payload);
        }
        write.send(Message::Text(frame.to_text().into())).await
    }

    async fn send_frames(&self, write: &mut WsWrite, frames: &[PhxMessage]) -> Result<(), tungstenite::Error> {
        for frame in frames {
            self.send_frame(write, frame).await?;
        }
        Ok(())
    }

    /// Turn a queued command into the frame to send, if any.
    fn handle_outbound(&mut self, outbound: Outbound) -> Option<PhxMessage> {
        match outbound {
            Outbound::Join { topic, payload } => {
                let join_ref = self.make_ref();
                self.channels.insert(topic.clone(), join_ref.clone());
                self.track(&join_ref, PendingKind::Join, &topic);
                Some(PhxMessage::join(&join_ref, topic, payload))
            }
            Outbound::Leave { topic } => {
                let Some(join_ref) = self.channels.get(&topic).cloned() else {
                    self.notify(NoticeKind::LeaveReply {
                        topic,
                        reply: Reply::Ok(empty_payload()),
                    });
                    return None;
                };
                let msg_ref = self.make_ref();
                self.track(&msg_ref, PendingKind::Leave, &topic);
                Some(PhxMessage::leave(Some(join_ref), &msg_ref, topic))
            }
            Outbound::Push {
                topic,
                event,
                payload,
            } => {
                let Some(join_ref) = self.channels.get(&topic).cloned() else {
                    crate::log_warn!(
                        "Socket '{}' dropping push '{}' to unjoined topic '{}'",
                        self.name,
                        event,
                        topic
                    );
                    return None;
                };
                let msg_ref = self.make_ref();
                Some(
                    PhxMessage::new(topic, event, payload)
                        .with_join_ref(join_ref)
                        .with_msg_ref(msg_ref),
                )
            }
            Outbound::Disconnect => None,
        }
    }

    fn track(&mut self, msg_ref: &str, kind: PendingKind, topic: &str) {
        self.pending.insert(
            msg_ref.to_string(),
            Pending {
                kind,
                topic: topic.to_string(),
                deadline: Instant::now() + self.options.timeout,
            },
        );
    }

    fn handle_text(&mut self, text: &str) {
        let Some(msg) = PhxMessage::from_text(text) else {
            crate::log_warn!("Socket '{}' received an invalid frame: {}", self.name, text);
            return;
        };
        if self.logger.is_enabled() {
            self.logger.log("receive", &describe(&msg), &msg.payload);
        }

        if msg.is_reply() {
            self.handle_reply(msg);
            return;
        }

        if let Some(join_ref) = &msg.join_ref {
            if self.channels.get(&msg.topic) != Some(join_ref) {
                crate::log_debug!(
                    "Socket '{}' dropping stale '{}' on '{}'",
                    self.name,
                    msg.event,
                    msg.topic
                );
                return;
            }
        }

        match msg.event.as_str() {
            PHX_CLOSE => {
                crate::log_info!("Channel '{}' closed by server", msg.topic);
                self.channels.remove(&msg.topic);
            }
            PHX_ERROR => {
                crate::log_warn!("Channel '{}' errored on server: {}", msg.topic, msg.payload);
                self.channels.remove(&msg.topic);
            }
            _ => self.notify(NoticeKind::Message {
                topic: msg.topic,
                event: msg.event,
                payload: msg.payload,
            }),
        }
    }

    fn handle_reply(&mut self, msg: PhxMessage) {
        let Some(msg_ref) = msg.msg_ref.clone() else {
            return;
        };

        if self.heartbeat_ref.as_deref() == Some(msg_ref.as_str()) {
            self.heartbeat_ref = None;
            return;
        }

        // Replies to pushes are not tracked
        let Some(pending) = self.pending.remove(&msg_ref) else {
            return;
        };

        let reply = match msg.reply_parts() {
            Some(("ok", response)) => Reply::Ok(response),
            Some((_, response)) => Reply::Error(response),
            None => Reply::Error(msg.payload.clone()),
        };
        self.resolve(&msg_ref, pending, reply);
    }

    fn resolve(&mut self, msg_ref: &str, pending: Pending, reply: Reply) {
        let Pending { kind, topic, .. } = pending;
        match kind {
            PendingKind::Join => {
                if !matches!(reply, Reply::Ok(_))
                    && self.channels.get(&topic).map(String::as_str) == Some(msg_ref)
                {
                    self.channels.remove(&topic);
                }
                self.notify(NoticeKind::JoinReply { topic, reply });
            }
            PendingKind::Leave => {
                if matches!(reply, Reply::Ok(_)) {
                    self.channels.remove(&topic);
                }
                self.notify(NoticeKind::LeaveReply { topic, reply });
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Time out every overdue request. Returns the `phx_leave` frames for
    /// joins that timed out, so the server drops its half of the channel.
    fn expire_pending(&mut self) -> Vec<PhxMessage> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(msg_ref, _)| msg_ref.clone())
            .collect();

        let mut leaves = Vec::new();
        for msg_ref in expired {
            if let Some(pending) = self.pending.remove(&msg_ref) {
                crate::log_warn!(
                    "Socket '{}' timed out waiting for {:?} reply on '{}'",
                    self.name,
                    pending.kind,
                    pending.topic
                );
                let abandoned = pending.kind == PendingKind::Join
                    && self.channels.get(&pending.topic).map(String::as_str) == Some(msg_ref.as_str());
                let topic = pending.topic.clone();
                self.resolve(&msg_ref, pending, Reply::Timeout);
                if abandoned {
                    let leave_ref = self.make_ref();
                    leaves.push(PhxMessage::leave(Some(msg_ref), &leave_ref, topic));
                }
            }
        }
        leaves
    }

    /// Settle everything still outstanding and report the close.
    fn finish(mut self, mut receiver: UnboundedReceiver<Outbound>, failure: Option<String>) {
        self.state.send_replace(ConnectionState::Disconnected);

        receiver.close();
        while let Ok(Some(outbound)) = receiver.try_next() {
            match outbound {
                Outbound::Join { topic, .. } => self.notify(NoticeKind::JoinReply {
                    topic,
                    reply: Reply::Error(reason_payload("socket closed")),
                }),
                Outbound::Leave { topic } => self.notify(NoticeKind::LeaveReply {
                    topic,
                    reply: Reply::Ok(empty_payload()),
                }),
                _ => {}
            }
        }

        let pending: Vec<Pending> = self.pending.drain().map(|(_, p)| p).collect();
        for Pending { kind, topic, .. } in pending {
            let kind = match kind {
                PendingKind::Join => NoticeKind::JoinReply {
                    topic,
                    reply: Reply::Error(reason_payload("socket closed")),
                },
                PendingKind::Leave => NoticeKind::LeaveReply {
                    topic,
                    reply: Reply::Ok(empty_payload()),
                },
            };
            self.notify(kind);
        }
        self.channels.clear();

        if let Some(reason) = failure {
            crate::log_warn!("Socket '{}' errored: {}", self.name, reason);
            self.notify(NoticeKind::Errored(reason));
        }
        crate::log_info!("Socket '{}' closed", self.name);
        self.notify(NoticeKind::Closed);
    }
}

/// `topic event (ref)`
fn describe(frame: &PhxMessage) -> String {
    format!(
        "{} {} ({})",
        frame.topic,
        frame.event,
        frame.msg_ref.as_deref().unwrap_or("")
    )
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
