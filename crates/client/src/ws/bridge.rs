//! Bridge between the application's command/event streams and socket clients.

use std::collections::{HashMap, HashSet};

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{Stream, StreamExt};
use phoenix_ports_shared::{
    reason_payload, Command, CreateChannel, CreatePush, CreateSocket, Disconnect, Envelope, Event,
    LeaveChannel, DEFAULT_SOCKET,
};

use super::connection::{
    ConnectRequest, Connector, Notice, NoticeKind, NoticeSender, Reply, SocketClient, SocketId,
};

pub type EventSender = UnboundedSender<Event>;

/// A registered socket
pub struct SocketHandle<S> {
    pub id: SocketId,
    pub endpoint: String,
    pub client: S,
}

/// A registered channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelHandle {
    pub socket_name: String,
    pub socket_id: SocketId,
    /// Event names forwarded as `ChannelMessageReceived`
    pub messages: HashSet<String>,
    /// Set once the join reply came back ok
    pub joined: bool,
}

/// Translates commands into client calls and client notices into events.
///
/// Owns both registries; nothing here is shared across tasks.
pub struct Bridge<C: Connector> {
    connector: C,
    sockets: HashMap<String, SocketHandle<C::Socket>>,
    channels: HashMap<String, ChannelHandle>,
    /// Disconnected sockets whose final lifecycle notices are still forwarded
    closing: HashSet<SocketId>,
    events: EventSender,
    notice_tx: NoticeSender,
    notice_rx: UnboundedReceiver<Notice>,
    next_socket_id: u64,
}

impl<C: Connector> Bridge<C> {
    pub fn new(connector: C, events: EventSender) -> Self {
        let (notice_tx, notice_rx) = unbounded();
        Self {
            connector,
            sockets: HashMap::new(),
            channels: HashMap::new(),
            closing: HashSet::new(),
            events,
            notice_tx,
            notice_rx,
            next_socket_id: 1,
        }
    }

    pub fn socket(&self, name: &str) -> Option<&SocketHandle<C::Socket>> {
        self.sockets.get(name)
    }

    pub fn channel(&self, topic: &str) -> Option<&ChannelHandle> {
        self.channels.get(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Process commands and notices until the command stream ends, then
    /// disconnect every socket.
    pub async fn run<S>(mut self, mut commands: S)
    where
        S: Stream<Item = Envelope> + Unpin,
    {
        loop {
            tokio::select! {
                envelope = commands.next() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope),
                    None => break,
                },
                Some(notice) = self.notice_rx.next() => self.handle_notice(notice),
            }
        }
        crate::log_info!("Command stream ended, shutting down bridge");
        self.shutdown();
    }

    /// Disconnect and forget every socket.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self.sockets.keys().cloned().collect();
        for name in names {
            self.retire_socket(&name);
        }
    }

    /// Validate an envelope and dispatch it. Bad envelopes are logged and dropped.
    pub fn handle_envelope(&mut self, envelope: Envelope) {
        match Command::try_from(envelope) {
            Ok(command) => self.handle_command(command),
            Err(err) if err.is_unknown_tag() => {
                crate::log_warn!("Received an unknown command: {}", err)
            }
            Err(err) => crate::log_error!("Dropping command: {}", err),
        }
    }

    pub fn handle_command(&mut self, command: Command) {
        crate::log_debug!("Bridge handling {}", command.tag());
        match command {
            Command::CreateSocket(cmd) => self.create_socket(cmd),
            Command::CreateChannel(cmd) => self.create_channel(cmd),
            Command::CreatePush(cmd) => self.push(cmd),
            Command::LeaveChannel(cmd) => self.leave_channel(cmd),
            Command::Disconnect(cmd) => self.disconnect(cmd),
        }
    }

    fn create_socket(&mut self, cmd: CreateSocket) {
        let name = cmd.socket_name().to_string();

        if self
            .sockets
            .get(&name)
            .is_some_and(|socket| socket.client.is_connected())
        {
            crate::log_debug!("Socket '{}' is already open", name);
            return;
        }

        // A handle that never opened or has since closed is replaced
        if let Some(stale) = self.sockets.remove(&name) {
            crate::log_info!("Replacing socket '{}'", name);
            stale.client.disconnect();
            self.drop_channels_of(stale.id);
        }

        let id = SocketId(self.next_socket_id);
        self.next_socket_id += 1;

        let request = ConnectRequest {
            id,
            name: name.clone(),
            endpoint: cmd.endpoint.clone(),
            params: cmd.params,
            debug: cmd.debug,
        };

        match self.connector.connect(request, self.notice_tx.clone()) {
            Ok(client) => {
                crate::log_info!("Created socket '{}' for {}", name, cmd.endpoint);
                self.sockets.insert(
                    name,
                    SocketHandle {
                        id,
                        endpoint: cmd.endpoint,
                        client,
                    },
                );
            }
            Err(e) => {
                crate::log_error!("Could not create socket '{}': {}", name, e);
                self.emit(Event::SocketErrored {
                    error: e.to_string(),
                    socket_name: name.clone(),
                });
                self.emit(Event::SocketClosed { socket_name: name });
            }
        }
    }

    fn create_channel(&mut self, cmd: CreateChannel) {
        let requested = cmd.socket_name().map(str::to_string);
        let topic = cmd.topic;

        if self.channels.contains_key(&topic) {
            crate::log_warn!("Channel '{}' is already registered", topic);
            self.emit(Event::ChannelJoinError {
                payload: reason_payload("already joined"),
                topic,
            });
            return;
        }

        let resolved = self.resolve_socket(requested.as_deref());
        let Some((socket_name, socket)) = resolved.and_then(|name| {
            let socket = self.sockets.get(&name)?;
            Some((name, socket))
        }) else {
            crate::log_warn!("No socket {:?} for channel '{}'", requested, topic);
            self.emit(Event::ChannelJoinError {
                payload: reason_payload("socket not found"),
                topic,
            });
            return;
        };

        socket.client.join(&topic, cmd.payload);
        let handle = ChannelHandle {
            socket_name,
            socket_id: socket.id,
            messages: cmd.messages.into_iter().collect(),
            joined: false,
        };
        crate::log_info!("Joining channel '{}' on socket '{}'", topic, handle.socket_name);
        self.channels.insert(topic, handle);
    }

    fn push(&mut self, cmd: CreatePush) {
        let Some(socket) = self.socket_for(&cmd.topic) else {
            crate::log_debug!("Ignoring push '{}' to unregistered topic '{}'", cmd.event, cmd.topic);
            return;
        };
        socket.client.push(&cmd.topic, &cmd.event, cmd.payload);
    }

    fn leave_channel(&mut self, cmd: LeaveChannel) {
        let Some(socket) = self.socket_for(&cmd.topic) else {
            crate::log_debug!("Ignoring leave of unregistered topic '{}'", cmd.topic);
            return;
        };
        crate::log_info!("Leaving channel '{}'", cmd.topic);
        socket.client.leave(&cmd.topic);
    }

    fn disconnect(&mut self, cmd: Disconnect) {
        let Some(name) = self.resolve_socket(cmd.socket_name()) else {
            crate::log_debug!("No socket to disconnect");
            return;
        };
        let open = self
            .sockets
            .get(&name)
            .is_some_and(|socket| socket.client.is_connected());
        if !open {
            crate::log_debug!("Socket '{}' is not open, nothing to disconnect", name);
            return;
        }
        self.retire_socket(&name);
    }

    /// Name of the socket a command addresses.
    ///
    /// Without an explicit name this is the default socket, or the only
    /// registered socket. With several sockets and no default it is ambiguous.
    fn resolve_socket(&self, requested: Option<&str>) -> Option<String> {
        if let Some(name) = requested {
            return Some(name.to_string());
        }
        if self.sockets.contains_key(DEFAULT_SOCKET) {
            return Some(DEFAULT_SOCKET.to_string());
        }
        let mut names = self.sockets.keys();
        match (names.next(), names.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    /// The socket owning a registered topic.
    fn socket_for(&self, topic: &str) -> Option<&SocketHandle<C::Socket>> {
        let channel = self.channels.get(topic)?;
        self.sockets
            .get(&channel.socket_name)
            .filter(|socket| socket.id == channel.socket_id)
    }

    fn retire_socket(&mut self, name: &str) {
        if let Some(socket) = self.sockets.remove(name) {
            crate::log_info!("Disconnecting socket '{}'", name);
            socket.client.disconnect();
            self.closing.insert(socket.id);
            self.drop_channels_of(socket.id);
        }
    }

    /// Forget every channel owned by a socket. Joins still in flight are
    /// answered with an error so each CreateChannel gets its outcome.
    fn drop_channels_of(&mut self, socket_id: SocketId) {
        let topics: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, channel)| channel.socket_id == socket_id)
            .map(|(topic, _)| topic.clone())
            .collect();

        for topic in topics {
            if let Some(channel) = self.channels.remove(&topic) {
                if !channel.joined {
                    self.emit(Event::ChannelJoinError {
                        payload: reason_payload("socket closed"),
                        topic,
                    });
                }
            }
        }
    }

    fn is_current(&self, socket: SocketId, name: &str) -> bool {
        self.sockets.get(name).is_some_and(|s| s.id == socket)
    }

    fn owns(&self, socket: SocketId, topic: &str) -> bool {
        self.channels
            .get(topic)
            .is_some_and(|channel| channel.socket_id == socket)
    }

    pub fn handle_notice(&mut self, notice: Notice) {
        let Notice {
            socket,
            socket_name,
            kind,
        } = notice;

        match kind {
            NoticeKind::Opened => {
                if self.is_current(socket, &socket_name) {
                    self.emit(Event::SocketOpened { socket_name });
                }
            }
            NoticeKind::Errored(error) => {
                if self.is_current(socket, &socket_name) || self.closing.contains(&socket) {
                    self.emit(Event::SocketErrored { error, socket_name });
                }
            }
            NoticeKind::Closed => {
                if self.closing.remove(&socket) || self.is_current(socket, &socket_name) {
                    self.emit(Event::SocketClosed { socket_name });
                }
            }
            NoticeKind::JoinReply { topic, reply } => {
                if !self.owns(socket, &topic) {
                    crate::log_debug!("Dropping join reply for unregistered topic '{}'", topic);
                    return;
                }
                self.on_join_reply(topic, reply);
            }
            NoticeKind::LeaveReply { topic, reply } => {
                if !self.owns(socket, &topic) {
                    crate::log_debug!("Dropping leave reply for unregistered topic '{}'", topic);
                    return;
                }
                self.on_leave_reply(topic, reply);
            }
            NoticeKind::Message {
                topic,
                event,
                payload,
            } => {
                let subscribed = self.channels.get(&topic).is_some_and(|channel| {
                    channel.socket_id == socket && channel.messages.contains(&event)
                });
                if subscribed {
                    crate::log_debug!("Received message {} on channel '{}'", event, topic);
                    self.emit(Event::ChannelMessageReceived {
                        payload,
                        topic,
                        message: event,
                    });
                }
            }
        }
    }

    fn on_join_reply(&mut self, topic: String, reply: Reply) {
        match reply {
            Reply::Ok(payload) => {
                if let Some(channel) = self.channels.get_mut(&topic) {
                    channel.joined = true;
                }
                crate::log_info!("Joined channel '{}'", topic);
                self.emit(Event::ChannelJoined { payload, topic });
            }
            Reply::Error(payload) => {
                crate::log_warn!("Join of '{}' failed: {}", topic, payload);
                self.channels.remove(&topic);
                self.emit(Event::ChannelJoinError { payload, topic });
            }
            Reply::Timeout => {
                crate::log_warn!("Join of '{}' timed out", topic);
                self.channels.remove(&topic);
                self.emit(Event::ChannelJoinTimeout { topic });
            }
        }
    }

    fn on_leave_reply(&mut self, topic: String, reply: Reply) {
        match reply {
            Reply::Ok(payload) => {
                crate::log_info!("Left channel '{}'", topic);
                self.channels.remove(&topic);
                self.emit(Event::ChannelLeft { payload, topic });
            }
            Reply::Error(payload) => {
                crate::log_warn!("Leave of '{}' failed: {}", topic, payload);
                self.emit(Event::ChannelLeaveError { payload, topic });
            }
            Reply::Timeout => {
                crate::log_warn!("Leave of '{}' timed out", topic);
                self.emit(Event::ChannelLeaveError {
                    payload: reason_payload("timeout"),
                    topic,
                });
            }
        }
    }

    fn emit(&self, event: Event) {
        crate::log_debug!("Emitting {}", event.tag());
        if self.events.unbounded_send(event).is_err() {
            crate::log_debug!("Event receiver dropped");
        }
    }
}
