// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codec::{
    DisconnectPacket, EncodePacket, PacketId, PingRequestPacket, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS,
    SubscribePacket, SubscribeTopic, UnsubscribePacket,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::connect_info::ConnectInfo;
use crate::connect_options::ConnectOptions;
use crate::error::{ConnectReturnCode, Error, ErrorKind};
use crate::framer::Framer;
use crate::keep_alive::KeepAlive;
use crate::listeners::PublishListeners;
use crate::packet::InboundPacket;
use crate::packet_id_allocator::PacketIdAllocator;
use crate::publish_info::PublishInfo;
use crate::status::ClientStatus;
use crate::subscribe_info::{SubscribeInfo, SubscribeOutcome, UnsubscribeInfo};
use crate::task::{Predicate, PredicateOutcome, TaskRegistry};
use crate::transport::Transport;

/// A request the `Client` handle sends into its connection's actor loop, or a
/// continuation a detached forwarder task sends back once a multi-step handshake
/// finishes waiting on the broker.
enum Command {
    Publish {
        info: PublishInfo,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Subscribe {
        info: SubscribeInfo,
        reply: oneshot::Sender<Result<Vec<SubscribeOutcome>, Error>>,
    },
    Unsubscribe {
        info: UnsubscribeInfo,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    PingReq {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Disconnect {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    AddPublishListener {
        name: String,
        sender: mpsc::UnboundedSender<PublishPacket>,
    },
    RemovePublishListener {
        name: String,
    },

    /// A PUBACK matching an in-flight `QoS` 1 publish arrived (or the wait failed).
    PublishAcked {
        packet_id: PacketId,
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// A PUBREC matching an in-flight `QoS` 2 publish arrived; still need PUBREL/PUBCOMP.
    PublishReceivedAck {
        packet_id: PacketId,
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    /// A PUBCOMP matching our own PUBREL arrived, finishing a `QoS` 2 publish.
    PublishCompleted {
        packet_id: PacketId,
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    SubscribeAcked {
        packet_id: PacketId,
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<Vec<SubscribeOutcome>, Error>>,
    },
    UnsubscribeAcked {
        packet_id: PacketId,
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    PingAcked {
        result: Result<InboundPacket, Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

enum ActorAction {
    Continue,
    Stop,
}

struct Shared {
    status: ClientStatus,
    commands: Option<mpsc::UnboundedSender<Command>>,
}

/// A handle to one MQTT session.
///
/// Cloning a `Client` shares the same underlying connection; any clone can drive it.
/// The handle itself holds no socket: the connection lives in a background task
/// spawned by `connect()`, and every method here talks to it over a command channel.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Mutex<Shared>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                status: ClientStatus::Disconnected,
                commands: None,
            })),
        }
    }

    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.shared.lock().expect("client state lock poisoned").status
    }

    /// Open the transport, perform the CONNECT/CONNACK handshake, and spawn the
    /// connection's background actor.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::AlreadyConnected` if the client is not `Disconnected`.
    /// Returns `ErrorKind::FailedToConnect` if the broker rejects the CONNECT.
    /// Returns `ErrorKind::Timeout` if `options.timeout()` elapses first.
    /// Returns transport or codec errors for lower-level failures.
    pub async fn connect(&self, options: &ConnectOptions, info: &ConnectInfo) -> Result<(), Error> {
        {
            let mut shared = self.shared.lock().expect("client state lock poisoned");
            if shared.status != ClientStatus::Disconnected {
                return Err(Error::new(
                    ErrorKind::AlreadyConnected,
                    "connect() called while the client was not disconnected",
                ));
            }
            shared.status = ClientStatus::Connecting;
        }

        let established = establish(options, info).await;
        let (mut transport, framer, connack, pending) = match established {
            Ok(parts) => parts,
            Err(err) => {
                let mut shared = self.shared.lock().expect("client state lock poisoned");
                shared.status = ClientStatus::Disconnected;
                return Err(err);
            }
        };

        if let Some(return_code) = map_connect_return_code(connack.return_code()) {
            let _ = transport.close().await;
            let mut shared = self.shared.lock().expect("client state lock poisoned");
            shared.status = ClientStatus::Disconnected;
            return Err(Error::from_string(
                ErrorKind::FailedToConnect { return_code },
                format!("broker refused connect: {return_code}"),
            ));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(
            transport,
            framer,
            pending,
            info.keep_alive(),
            options.timeout(),
            commands_rx,
            commands_tx.downgrade(),
            Arc::clone(&self.shared),
        );
        tokio::spawn(connection.run());

        let mut shared = self.shared.lock().expect("client state lock poisoned");
        shared.status = ClientStatus::Connected;
        shared.commands = Some(commands_tx);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    pub async fn publish(&self, info: PublishInfo) -> Result<(), Error> {
        let commands = self.commands()?;
        let (reply, receiver) = oneshot::channel();
        send_command(&commands, Command::Publish { info, reply })?;
        await_reply(receiver).await
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    /// Returns `ErrorKind::SubscribeFailed` if the broker rejected every filter.
    pub async fn subscribe(&self, info: SubscribeInfo) -> Result<Vec<SubscribeOutcome>, Error> {
        let commands = self.commands()?;
        let (reply, receiver) = oneshot::channel();
        send_command(&commands, Command::Subscribe { info, reply })?;
        await_reply(receiver).await
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    pub async fn unsubscribe(&self, info: UnsubscribeInfo) -> Result<(), Error> {
        let commands = self.commands()?;
        let (reply, receiver) = oneshot::channel();
        send_command(&commands, Command::Unsubscribe { info, reply })?;
        await_reply(receiver).await
    }

    /// Send a PINGREQ and wait for the broker's PINGRESP.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    /// Returns `ErrorKind::KeepAliveTimeout` if no PINGRESP arrives in time; this
    /// always tears down the connection, automatic keep-alive pings included.
    pub async fn pingreq(&self) -> Result<(), Error> {
        let commands = self.commands()?;
        let (reply, receiver) = oneshot::channel();
        send_command(&commands, Command::PingReq { reply })?;
        await_reply(receiver).await
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let commands = self.commands()?;
        let (reply, receiver) = oneshot::channel();
        send_command(&commands, Command::Disconnect { reply })?;
        await_reply(receiver).await
    }

    /// Register a named listener for inbound PUBLISH packets.
    ///
    /// Registering again under the same `name` replaces the previous listener.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    pub fn publish_stream(&self, name: &str) -> Result<mpsc::UnboundedReceiver<PublishPacket>, Error> {
        let commands = self.commands()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        send_command(
            &commands,
            Command::AddPublishListener {
                name: name.to_owned(),
                sender,
            },
        )?;
        Ok(receiver)
    }

    /// # Errors
    ///
    /// Returns `ErrorKind::NoConnection` if there is no active connection.
    pub fn remove_publish_stream(&self, name: &str) -> Result<(), Error> {
        let commands = self.commands()?;
        send_command(
            &commands,
            Command::RemovePublishListener {
                name: name.to_owned(),
            },
        )
    }

    fn commands(&self) -> Result<mpsc::UnboundedSender<Command>, Error> {
        let shared = self.shared.lock().expect("client state lock poisoned");
        match (shared.status, &shared.commands) {
            (ClientStatus::Connected, Some(commands)) => Ok(commands.clone()),
            _ => Err(Error::new(
                ErrorKind::NoConnection,
                "no active connection",
            )),
        }
    }
}

fn send_command(commands: &mpsc::UnboundedSender<Command>, command: Command) -> Result<(), Error> {
    commands
        .send(command)
        .map_err(|_| Error::new(ErrorKind::ConnectionClosed, "connection actor is gone"))
}

async fn await_reply<T>(receiver: oneshot::Receiver<Result<T, Error>>) -> Result<T, Error> {
    receiver
        .await
        .map_err(|_| Error::new(ErrorKind::ConnectionClosed, "connection closed before replying"))?
}

/// Spawn a detached task that awaits one task-registry completion and re-injects it
/// as a `Command` into the same connection's channel, letting the actor finish the
/// bookkeeping (releasing packet ids, sending a PUBREL, replying) with `&mut self`.
///
/// Holds only a `Weak` sender: if every `Client` handle has already dropped its strong
/// sender, `commands_rx.recv()` in `Connection::run` has already (or is about to) see
/// `None` and tear the connection down, so there's nothing left to re-inject into.
fn spawn_forward<F>(
    receiver: oneshot::Receiver<Result<InboundPacket, Error>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    wrap: F,
) where
    F: FnOnce(Result<InboundPacket, Error>) -> Command + Send + 'static,
{
    tokio::spawn(async move {
        let result = receiver.await.unwrap_or_else(|_| {
            Err(Error::new(
                ErrorKind::ConnectionClosed,
                "connection actor dropped before completing the request",
            ))
        });
        if let Some(commands) = commands.upgrade() {
            let _ = commands.send(wrap(result));
        }
    });
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

fn map_connect_return_code(code: codec::ConnectReturnCode) -> Option<ConnectReturnCode> {
    match code {
        codec::ConnectReturnCode::Accepted => None,
        codec::ConnectReturnCode::UnacceptedProtocol => {
            Some(ConnectReturnCode::UnacceptableProtocolVersion)
        }
        codec::ConnectReturnCode::IdentifierRejected => Some(ConnectReturnCode::IdentifierRejected),
        codec::ConnectReturnCode::ServerUnavailable | codec::ConnectReturnCode::Reserved => {
            Some(ConnectReturnCode::ServerUnavailable)
        }
        codec::ConnectReturnCode::MalformedUsernamePassword => {
            Some(ConnectReturnCode::BadUsernameOrPassword)
        }
        codec::ConnectReturnCode::Unauthorized => Some(ConnectReturnCode::NotAuthorized),
    }
}

fn map_subscribe_ack(packet: InboundPacket) -> Result<Vec<SubscribeOutcome>, Error> {
    let InboundPacket::SubscribeAck(ack) = packet else {
        return Err(Error::new(
            ErrorKind::UnexpectedPacket,
            "expected a SUBACK for this request",
        ));
    };
    let outcomes: Vec<SubscribeOutcome> = ack
        .acknowledgements()
        .iter()
        .map(|ack| match ack {
            codec::SubscribeAck::QoS(qos) => SubscribeOutcome::Granted(*qos),
            codec::SubscribeAck::Failed => SubscribeOutcome::Failed,
        })
        .collect();

    if outcomes
        .iter()
        .all(|outcome| matches!(outcome, SubscribeOutcome::Failed))
    {
        let indices = (0..outcomes.len()).collect();
        return Err(Error::from_string(
            ErrorKind::SubscribeFailed { indices },
            "broker rejected every requested filter".to_owned(),
        ));
    }
    Ok(outcomes)
}

fn match_publish_ack(packet_id: PacketId) -> Predicate {
    Box::new(move |packet| match packet {
        InboundPacket::PublishAck(ack) if ack.packet_id() == packet_id => PredicateOutcome::Match,
        _ => PredicateOutcome::Ignore,
    })
}

fn match_publish_received(packet_id: PacketId) -> Predicate {
    Box::new(move |packet| match packet {
        InboundPacket::PublishReceived(ack) if ack.packet_id() == packet_id => {
            PredicateOutcome::Match
        }
        _ => PredicateOutcome::Ignore,
    })
}

fn match_publish_complete(packet_id: PacketId) -> Predicate {
    Box::new(move |packet| match packet {
        InboundPacket::PublishComplete(ack) if ack.packet_id() == packet_id => {
            PredicateOutcome::Match
        }
        _ => PredicateOutcome::Ignore,
    })
}

fn match_subscribe_ack(packet_id: PacketId) -> Predicate {
    Box::new(move |packet| match packet {
        InboundPacket::SubscribeAck(ack) if ack.packet_id() == packet_id => {
            PredicateOutcome::Match
        }
        _ => PredicateOutcome::Ignore,
    })
}

fn match_unsubscribe_ack(packet_id: PacketId) -> Predicate {
    Box::new(move |packet| match packet {
        InboundPacket::UnsubscribeAck(ack) if ack.packet_id() == packet_id => {
            PredicateOutcome::Match
        }
        _ => PredicateOutcome::Ignore,
    })
}

fn ping_response_predicate() -> Predicate {
    Box::new(|packet| match packet {
        InboundPacket::PingResponse(_) => PredicateOutcome::Match,
        _ => PredicateOutcome::Ignore,
    })
}

/// Connect the transport and drive the CONNECT/CONNACK handshake.
///
/// Any packet other than CONNACK seen before the handshake completes is a protocol
/// error; the transport is torn down and `MalformedPacket` is returned. Any packets
/// the same read batch contained after the CONNACK are returned for the connection
/// actor to process first, so nothing sent eagerly by the broker is lost.
async fn establish(
    options: &ConnectOptions,
    info: &ConnectInfo,
) -> Result<(Transport, Framer, codec::ConnectAckPacket, Vec<InboundPacket>), Error> {
    let handshake = establish_inner(options, info);
    match options.timeout() {
        Some(timeout) => tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_elapsed| Error::new(ErrorKind::Timeout, "timed out waiting for CONNACK"))?,
        None => handshake.await,
    }
}

async fn establish_inner(
    options: &ConnectOptions,
    info: &ConnectInfo,
) -> Result<(Transport, Framer, codec::ConnectAckPacket, Vec<InboundPacket>), Error> {
    let mut transport = Transport::connect(options).await?;

    let packet = info.build_packet()?;
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    transport.write_all(&buf).await?;

    let mut framer = Framer::new();
    let mut read_buf = Vec::with_capacity(1024);
    loop {
        read_buf.clear();
        let read = transport.read_buf(&mut read_buf).await?;
        if read == 0 {
            return Err(Error::new(
                ErrorKind::ConnectionClosed,
                "connection closed before CONNACK arrived",
            ));
        }
        framer.feed(&read_buf);
        let mut packets = framer.poll()?;
        if packets.is_empty() {
            continue;
        }
        let first = packets.remove(0);
        let InboundPacket::ConnectAck(connack) = first else {
            let _ = transport.close().await;
            return Err(Error::new(
                ErrorKind::MalformedPacket,
                "expected CONNACK as the first packet from the broker",
            ));
        };
        return Ok((transport, framer, connack, packets));
    }
}

/// Owns the transport and every piece of per-connection state, and runs the single
/// task that multiplexes commands from the `Client` handle, inbound bytes, and
/// timers. Nothing else is allowed to touch the transport once this is running.
struct Connection {
    transport: Transport,
    framer: Framer,
    read_buf: Vec<u8>,
    registry: TaskRegistry,
    listeners: PublishListeners,
    packet_ids: PacketIdAllocator,
    keep_alive: Option<KeepAlive>,
    request_timeout: Option<Duration>,
    seen_pubrec_ids: HashSet<u16>,
    pending_inbound: Vec<InboundPacket>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    commands_tx: mpsc::WeakUnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    fn new(
        transport: Transport,
        framer: Framer,
        pending_inbound: Vec<InboundPacket>,
        keep_alive_seconds: u16,
        request_timeout: Option<Duration>,
        commands_rx: mpsc::UnboundedReceiver<Command>,
        commands_tx: mpsc::WeakUnboundedSender<Command>,
        shared: Arc<Mutex<Shared>>,
    ) -> Self {
        Self {
            transport,
            framer,
            read_buf: Vec::with_capacity(1024),
            registry: TaskRegistry::new(),
            listeners: PublishListeners::new(),
            packet_ids: PacketIdAllocator::new(),
            keep_alive: KeepAlive::new(keep_alive_seconds),
            request_timeout,
            seen_pubrec_ids: HashSet::new(),
            pending_inbound,
            commands_rx,
            commands_tx,
            shared,
        }
    }

    async fn run(mut self) {
        let pending = std::mem::take(&mut self.pending_inbound);
        for packet in pending {
            if let Err(err) = self.handle_inbound(packet).await {
                self.teardown(err).await;
                return;
            }
        }

        loop {
            let registry_deadline = self.registry.earliest_deadline();
            let keep_alive_deadline = self.keep_alive.as_ref().map(KeepAlive::deadline);

            tokio::select! {
                maybe_command = self.commands_rx.recv() => {
                    let Some(command) = maybe_command else {
                        self.teardown(Error::new(
                            ErrorKind::ConnectionClosed,
                            "client handle dropped",
                        )).await;
                        return;
                    };
                    match self.handle_command(command).await {
                        Ok(ActorAction::Continue) => {}
                        Ok(ActorAction::Stop) => return,
                        Err(err) => {
                            self.teardown(err).await;
                            return;
                        }
                    }
                }
                read_result = self.transport.read_buf(&mut self.read_buf) => {
                    match read_result {
                        Ok(0) => {
                            self.teardown(Error::new(
                                ErrorKind::ConnectionClosed,
                                "peer closed the connection",
                            )).await;
                            return;
                        }
                        Ok(_) => {
                            self.framer.feed(&self.read_buf);
                            self.read_buf.clear();
                            let packets = match self.framer.poll() {
                                Ok(packets) => packets,
                                Err(err) => {
                                    self.teardown(Error::from(err)).await;
                                    return;
                                }
                            };
                            for packet in packets {
                                if let Err(err) = self.handle_inbound(packet).await {
                                    self.teardown(err).await;
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            self.teardown(err).await;
                            return;
                        }
                    }
                }
                () = sleep_until_opt(registry_deadline) => {
                    if self.registry.expire_due(Instant::now()) {
                        self.teardown(Error::new(
                            ErrorKind::KeepAliveTimeout,
                            "no PINGRESP arrived before the keep-alive deadline",
                        )).await;
                        return;
                    }
                }
                () = sleep_until_opt(keep_alive_deadline) => {
                    if let Err(err) = self.fire_keep_alive().await {
                        self.teardown(err).await;
                        return;
                    }
                }
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.transport.write_all(bytes).await?;
        if let Some(keep_alive) = self.keep_alive.as_mut() {
            keep_alive.on_write();
        }
        Ok(())
    }

    fn request_deadline(&self) -> Option<Instant> {
        self.request_timeout.map(|timeout| Instant::now() + timeout)
    }

    async fn fire_keep_alive(&mut self) -> Result<(), Error> {
        let Some(keep_alive) = self.keep_alive.as_ref() else {
            return Ok(());
        };
        let deadline = Instant::now() + keep_alive.interval();

        let mut buf = Vec::new();
        PingRequestPacket::new().encode(&mut buf)?;
        self.write(&buf).await?;

        // A missed automatic ping is connection-fatal just like a missed manual one;
        // the completion receiver is simply dropped, nothing more needs to happen on
        // a successful PINGRESP beyond completing (and so removing) this task.
        let _ = self
            .registry
            .register(ping_response_predicate(), Some(deadline), true);
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Result<ActorAction, Error> {
        match command {
            Command::Publish { info, reply } => self.do_publish(info, reply).await?,
            Command::Subscribe { info, reply } => self.do_subscribe(info, reply).await?,
            Command::Unsubscribe { info, reply } => self.do_unsubscribe(info, reply).await?,
            Command::PingReq { reply } => self.do_pingreq(reply).await?,
            Command::Disconnect { reply } => {
                self.do_disconnect().await?;
                let _ = reply.send(Ok(()));
                return Ok(ActorAction::Stop);
            }
            Command::AddPublishListener { name, sender } => self.listeners.add(&name, sender),
            Command::RemovePublishListener { name } => self.listeners.remove(&name),

            Command::PublishAcked {
                packet_id,
                result,
                reply,
            } => {
                self.packet_ids.release(packet_id);
                let _ = reply.send(result.map(|_| ()));
            }
            Command::PublishReceivedAck {
                packet_id,
                result,
                reply,
            } => match result {
                Ok(_) => {
                    let mut buf = Vec::new();
                    PublishReleasePacket::new(packet_id).encode(&mut buf)?;
                    self.write(&buf).await?;

                    let deadline = self.request_deadline();
                    let receiver =
                        self.registry
                            .register(match_publish_complete(packet_id), deadline, false);
                    spawn_forward(receiver, self.commands_tx.clone(), move |result| {
                        Command::PublishCompleted {
                            packet_id,
                            result,
                            reply,
                        }
                    });
                }
                Err(err) => {
                    self.packet_ids.release(packet_id);
                    let _ = reply.send(Err(err));
                }
            },
            Command::PublishCompleted {
                packet_id,
                result,
                reply,
            } => {
                self.packet_ids.release(packet_id);
                let _ = reply.send(result.map(|_| ()));
            }
            Command::SubscribeAcked {
                packet_id,
                result,
                reply,
            } => {
                self.packet_ids.release(packet_id);
                let outcome = result.and_then(map_subscribe_ack);
                let _ = reply.send(outcome);
            }
            Command::UnsubscribeAcked {
                packet_id,
                result,
                reply,
            } => {
                self.packet_ids.release(packet_id);
                let _ = reply.send(result.map(|_| ()));
            }
            Command::PingAcked { result, reply } => {
                let _ = reply.send(result.map(|_| ()));
            }
        }
        Ok(ActorAction::Continue)
    }

    async fn do_publish(
        &mut self,
        info: PublishInfo,
        reply: oneshot::Sender<Result<(), Error>>,
    ) -> Result<(), Error> {
        let qos = info.qos();
        let mut packet = PublishPacket::new(info.topic(), qos, info.payload())?;
        packet.set_retain(info.retain());
        packet.set_dup(info.dup())?;

        if qos == QoS::AtMostOnce {
            let mut buf = Vec::new();
            packet.encode(&mut buf)?;
            self.write(&buf).await?;
            let _ = reply.send(Ok(()));
            return Ok(());
        }

        let packet_id = self.packet_ids.alloc()?;
        packet.set_packet_id(packet_id);
        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.write(&buf).await?;

        let deadline = self.request_deadline();
        match qos {
            QoS::AtLeastOnce => {
                let receiver = self
                    .registry
                    .register(match_publish_ack(packet_id), deadline, false);
                spawn_forward(receiver, self.commands_tx.clone(), move |result| {
                    Command::PublishAcked {
                        packet_id,
                        result,
                        reply,
                    }
                });
            }
            QoS::ExactOnce => {
                let receiver =
                    self.registry
                        .register(match_publish_received(packet_id), deadline, false);
                spawn_forward(receiver, self.commands_tx.clone(), move |result| {
                    Command::PublishReceivedAck {
                        packet_id,
                        result,
                        reply,
                    }
                });
            }
            QoS::AtMostOnce => unreachable!("QoS 0 handled above"),
        }
        Ok(())
    }

    async fn do_subscribe(
        &mut self,
        info: SubscribeInfo,
        reply: oneshot::Sender<Result<Vec<SubscribeOutcome>, Error>>,
    ) -> Result<(), Error> {
        let filters = info.filters();
        let Some((first_topic, first_qos)) = filters.first() else {
            let _ = reply.send(Err(Error::new(
                ErrorKind::MalformedPacket,
                "subscribe requires at least one filter",
            )));
            return Ok(());
        };

        let packet_id = self.packet_ids.alloc()?;
        let mut packet = SubscribePacket::new(first_topic, *first_qos, packet_id)?;
        for (topic, qos) in &filters[1..] {
            packet.mut_topics().push(SubscribeTopic::new(topic, *qos)?);
        }

        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.write(&buf).await?;

        let deadline = self.request_deadline();
        let receiver = self
            .registry
            .register(match_subscribe_ack(packet_id), deadline, false);
        spawn_forward(receiver, self.commands_tx.clone(), move |result| {
            Command::SubscribeAcked {
                packet_id,
                result,
                reply,
            }
        });
        Ok(())
    }

    async fn do_unsubscribe(
        &mut self,
        info: UnsubscribeInfo,
        reply: oneshot::Sender<Result<(), Error>>,
    ) -> Result<(), Error> {
        if info.filters().is_empty() {
            let _ = reply.send(Err(Error::new(
                ErrorKind::MalformedPacket,
                "unsubscribe requires at least one filter",
            )));
            return Ok(());
        }

        let packet_id = self.packet_ids.alloc()?;
        let filters: Vec<&str> = info.filters().iter().map(String::as_str).collect();
        let packet = UnsubscribePacket::with_topics(&filters, packet_id)?;

        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.write(&buf).await?;

        let deadline = self.request_deadline();
        let receiver =
            self.registry
                .register(match_unsubscribe_ack(packet_id), deadline, false);
        spawn_forward(receiver, self.commands_tx.clone(), move |result| {
            Command::UnsubscribeAcked {
                packet_id,
                result,
                reply,
            }
        });
        Ok(())
    }

    async fn do_pingreq(&mut self, reply: oneshot::Sender<Result<(), Error>>) -> Result<(), Error> {
        let mut buf = Vec::new();
        PingRequestPacket::new().encode(&mut buf)?;
        self.write(&buf).await?;

        let deadline = self.request_deadline();
        let receiver = self
            .registry
            .register(ping_response_predicate(), deadline, true);
        spawn_forward(receiver, self.commands_tx.clone(), move |result| {
            Command::PingAcked { result, reply }
        });
        Ok(())
    }

    async fn do_disconnect(&mut self) -> Result<(), Error> {
        {
            let mut shared = self.shared.lock().expect("client state lock poisoned");
            shared.status = ClientStatus::Closing;
        }

        let mut buf = Vec::new();
        DisconnectPacket::new().encode(&mut buf)?;
        let _ = self.write(&buf).await;
        // Close before clearing the command channel, so a write already in flight when
        // disconnect() was called cannot race a handle that sees `commands` cleared and
        // assumes the transport is already gone.
        let _ = self.transport.close().await;

        let mut shared = self.shared.lock().expect("client state lock poisoned");
        shared.status = ClientStatus::Disconnected;
        shared.commands = None;
        Ok(())
    }

    async fn handle_inbound(&mut self, packet: InboundPacket) -> Result<(), Error> {
        match packet {
            InboundPacket::Publish(publish) => self.dispatch_publish(publish).await,
            InboundPacket::PublishRelease(release) => self.dispatch_publish_release(release).await,
            InboundPacket::ConnectAck(_) => Err(Error::new(
                ErrorKind::UnexpectedPacket,
                "unexpected CONNACK after the connection was already established",
            )),
            other => {
                if self.registry.dispatch(other).is_some() {
                    log::debug!("discarding unmatched inbound packet");
                }
                Ok(())
            }
        }
    }

    async fn dispatch_publish(&mut self, publish: PublishPacket) -> Result<(), Error> {
        let packet_id = publish.packet_id();
        match publish.qos() {
            QoS::AtMostOnce => self.listeners.deliver(&publish),
            QoS::AtLeastOnce => {
                self.listeners.deliver(&publish);
                let mut buf = Vec::new();
                PublishAckPacket::new(packet_id).encode(&mut buf)?;
                self.write(&buf).await?;
            }
            QoS::ExactOnce => {
                let is_duplicate = !self.seen_pubrec_ids.insert(packet_id.value());
                if !is_duplicate {
                    self.listeners.deliver(&publish);
                }
                let mut buf = Vec::new();
                PublishReceivedPacket::new(packet_id).encode(&mut buf)?;
                self.write(&buf).await?;
            }
        }
        Ok(())
    }

    async fn dispatch_publish_release(&mut self, release: PublishReleasePacket) -> Result<(), Error> {
        let packet_id = release.packet_id();
        self.seen_pubrec_ids.remove(&packet_id.value());
        let mut buf = Vec::new();
        PublishCompletePacket::new(packet_id).encode(&mut buf)?;
        self.write(&buf).await
    }

    async fn teardown(&mut self, cause: Error) {
        log::warn!("connection closed: {cause}");
        let _ = self.transport.close().await;
        self.registry.cancel_all(&cause);

        let mut shared = self.shared.lock().expect("client state lock poisoned");
        shared.status = ClientStatus::Disconnected;
        shared.commands = None;
    }
}
