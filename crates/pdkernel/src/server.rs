//
// server.rs
//
// Copyright (C) 2026 Pandia Contributors. All rights reserved.
//
//

use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use bytes::Bytes;
use event_listener::Event;
use pdshared::jupyter_message::{JupyterChannel, JupyterMessage};
use tokio::task::JoinHandle;
use zeromq::{PubSocket, RouterSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::connection_file::ConnectionFile;
use crate::dispatcher::Dispatcher;
use crate::error::KernelError;
use crate::heartbeat::HeartbeatEcho;
use crate::interpreter::Interpreter;
use crate::jupyter_messages::{self, InputReply};
use crate::kernel_connection::KernelConnection;
use crate::kernel_state::StatusCell;
use crate::wire_message::WireMessage;

/// How long stop() waits for in-flight heartbeat echoes and publishes to
/// drain before the channel sockets close.
pub(crate) const GRACE_DELAY: Duration = Duration::from_millis(50);

/// How long stop() waits for each background task to exit after the grace
/// delay.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a stdin read waits for the client's input_reply. Input prompts
/// are synchronous by protocol definition, but the wait is bounded.
const INPUT_REPLY_TIMEOUT: Duration = Duration::from_secs(300);

/// A decoded message received from a channel socket, with the routing
/// identities needed to address the reply.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub identities: Vec<Vec<u8>>,
    pub message: JupyterMessage,
}

/// A message to be signed and written to a channel socket.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub identities: Vec<Vec<u8>>,
    pub message: JupyterMessage,
}

/// The result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A message was dispatched
    Handled,

    /// Nothing arrived within the timeout hint
    Idle,

    /// The kernel is stopped (or stopped during this cycle); the host can
    /// cancel its polling schedule
    Stopped,
}

/// The five channel sockets, bound but not yet running.
struct BoundSockets {
    shell: RouterSocket,
    control: RouterSocket,
    stdin: RouterSocket,
    iopub: PubSocket,
    heartbeat: HeartbeatEcho,
}

/// The cross-thread hand-off queues connecting the host thread to the
/// channel actors. These are the only structures touched by more than one
/// thread.
struct ServerChannels {
    shell_in_rx: Receiver<InboundEnvelope>,
    shell_in_tx: Sender<InboundEnvelope>,
    shell_out_rx: Receiver<OutboundEnvelope>,
    shell_out_tx: Sender<OutboundEnvelope>,

    control_in_rx: Receiver<InboundEnvelope>,
    control_in_tx: Sender<InboundEnvelope>,
    control_out_rx: Receiver<OutboundEnvelope>,
    control_out_tx: Sender<OutboundEnvelope>,

    stdin_out_rx: Receiver<OutboundEnvelope>,
    stdin_out_tx: Sender<OutboundEnvelope>,

    iopub_rx: Receiver<JupyterMessage>,
    iopub_tx: Sender<JupyterMessage>,

    input_rx: Receiver<String>,
    input_tx: Sender<String>,
}

impl ServerChannels {
    fn new() -> Self {
        let (shell_in_tx, shell_in_rx) = async_channel::unbounded();
        let (shell_out_tx, shell_out_rx) = async_channel::unbounded();
        let (control_in_tx, control_in_rx) = async_channel::unbounded();
        let (control_out_tx, control_out_rx) = async_channel::unbounded();
        let (stdin_out_tx, stdin_out_rx) = async_channel::unbounded();
        let (iopub_tx, iopub_rx) = async_channel::unbounded();
        let (input_tx, input_rx) = async_channel::unbounded();
        Self {
            shell_in_rx,
            shell_in_tx,
            shell_out_rx,
            shell_out_tx,
            control_in_rx,
            control_in_tx,
            control_out_rx,
            control_out_tx,
            stdin_out_rx,
            stdin_out_tx,
            iopub_rx,
            iopub_tx,
            input_rx,
            input_tx,
        }
    }
}

/// The kernel's transport server.
///
/// Owns the five channel sockets, the background loops that service them,
/// and the dispatcher that turns decoded requests into replies. The host
/// thread drives it exclusively through bounded [`KernelServer::poll`] calls;
/// the background loops never touch interpreter state.
pub struct KernelServer {
    runtime: tokio::runtime::Runtime,
    connection: KernelConnection,
    connection_file: ConnectionFile,
    state: Arc<StatusCell>,
    stop_event: Arc<Event>,
    dispatcher: Dispatcher,
    channels: ServerChannels,
    sockets: Option<BoundSockets>,
    tasks: Vec<JoinHandle<()>>,
    on_stopped: Option<Box<dyn FnOnce() + Send>>,
}

impl KernelServer {
    /// Open the five channel sockets bound to endpoints derived from the
    /// connection file. Any bind failure is fatal: the kernel does not start
    /// and the error is reported to the caller synchronously.
    pub fn bind(
        connection_file: ConnectionFile,
        username: String,
        interpreter: Box<dyn Interpreter>,
    ) -> Result<Self, KernelError> {
        if connection_file.info.transport != "tcp" {
            return Err(KernelError::Other(anyhow::anyhow!(
                "unsupported transport: {}",
                connection_file.info.transport
            )));
        }

        let connection =
            KernelConnection::from_connection_info(&connection_file.info, username)?;
        let session_id = connection.session_id.clone();
        let state = Arc::new(StatusCell::new(session_id.clone()));
        let stop_event = Arc::new(Event::new());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pandia-kernel")
            .enable_all()
            .build()
            .map_err(|e| KernelError::Other(e.into()))?;

        let sockets = runtime.block_on(Self::bind_sockets(
            &connection_file,
            session_id.clone(),
            state.clone(),
            stop_event.clone(),
        ))?;

        let channels = ServerChannels::new();
        let dispatcher = Dispatcher::new(
            interpreter,
            connection.clone(),
            channels.input_tx.clone(),
        );

        Ok(Self {
            runtime,
            connection,
            connection_file,
            state,
            stop_event,
            dispatcher,
            channels,
            sockets: Some(sockets),
            tasks: Vec::new(),
            on_stopped: None,
        })
    }

    async fn bind_sockets(
        connection_file: &ConnectionFile,
        session_id: String,
        state: Arc<StatusCell>,
        stop_event: Arc<Event>,
    ) -> Result<BoundSockets, KernelError> {
        let info = &connection_file.info;

        let shell = Self::bind_router("shell", &connection_file.endpoint(info.shell_port)).await?;
        let control =
            Self::bind_router("control", &connection_file.endpoint(info.control_port)).await?;
        let stdin = Self::bind_router("stdin", &connection_file.endpoint(info.stdin_port)).await?;

        let iopub_endpoint = connection_file.endpoint(info.iopub_port);
        let mut iopub = PubSocket::new();
        iopub
            .bind(&iopub_endpoint)
            .await
            .map_err(|source| KernelError::TransportBind {
                channel: "iopub",
                endpoint: iopub_endpoint.clone(),
                source,
            })?;
        log::info!(
            "[session {}] IOPub channel bound to {}",
            session_id,
            iopub_endpoint
        );

        let heartbeat = HeartbeatEcho::bind(
            &connection_file.endpoint(info.hb_port),
            session_id,
            state,
            stop_event,
        )
        .await?;

        Ok(BoundSockets {
            shell,
            control,
            stdin,
            iopub,
            heartbeat,
        })
    }

    async fn bind_router(
        channel: &'static str,
        endpoint: &str,
    ) -> Result<RouterSocket, KernelError> {
        let mut socket = RouterSocket::new();
        socket
            .bind(endpoint)
            .await
            .map_err(|source| KernelError::TransportBind {
                channel,
                endpoint: endpoint.to_string(),
                source,
            })?;
        log::info!("{} channel bound to {}", channel, endpoint);
        Ok(socket)
    }

    /// Spawn the background loops, publish the initial "starting" status, and
    /// mark the kernel Running. Returns immediately; it never blocks the
    /// caller.
    pub fn start(&mut self) -> Result<(), KernelError> {
        let sockets = match self.sockets.take() {
            Some(sockets) => sockets,
            None => return Err(KernelError::NotRunning),
        };

        let shell_actor = ChannelActor {
            name: "shell",
            socket: sockets.shell,
            sink: ActorSink::Queue(self.channels.shell_in_tx.clone()),
            outbound_rx: self.channels.shell_out_rx.clone(),
            connection: self.connection.clone(),
            state: self.state.clone(),
            stop_event: self.stop_event.clone(),
        };
        let control_actor = ChannelActor {
            name: "control",
            socket: sockets.control,
            sink: ActorSink::Queue(self.channels.control_in_tx.clone()),
            outbound_rx: self.channels.control_out_rx.clone(),
            connection: self.connection.clone(),
            state: self.state.clone(),
            stop_event: self.stop_event.clone(),
        };
        let stdin_actor = ChannelActor {
            name: "stdin",
            socket: sockets.stdin,
            sink: ActorSink::InputValues(self.channels.input_tx.clone()),
            outbound_rx: self.channels.stdin_out_rx.clone(),
            connection: self.connection.clone(),
            state: self.state.clone(),
            stop_event: self.stop_event.clone(),
        };
        let publisher = IopubPublisher {
            socket: sockets.iopub,
            outbound_rx: self.channels.iopub_rx.clone(),
            connection: self.connection.clone(),
            state: self.state.clone(),
            stop_event: self.stop_event.clone(),
        };

        self.tasks.push(self.runtime.spawn(shell_actor.run()));
        self.tasks.push(self.runtime.spawn(control_actor.run()));
        self.tasks.push(self.runtime.spawn(stdin_actor.run()));
        self.tasks.push(self.runtime.spawn(publisher.run()));
        self.tasks.push(self.runtime.spawn(sockets.heartbeat.run()));

        if !self.state.mark_running() {
            return Err(KernelError::NotRunning);
        }

        // Publish the initial status so subscribed clients see the kernel
        // come up.
        let starting = jupyter_messages::status_message(&self.connection, "starting", None);
        let iopub_tx = self.channels.iopub_tx.clone();
        self.runtime.block_on(async move {
            let _ = iopub_tx.send(starting).await;
        });

        log::info!(
            "[session {}] Kernel running; channels at shell={} control={} stdin={} iopub={} hb={}",
            self.connection.session_id,
            self.connection_file.info.shell_port,
            self.connection_file.info.control_port,
            self.connection_file.info.stdin_port,
            self.connection_file.info.iopub_port,
            self.connection_file.info.hb_port,
        );
        Ok(())
    }

    /// Register a callback invoked exactly once when the kernel transitions
    /// to Stopped.
    pub fn on_stopped(&mut self, callback: Box<dyn FnOnce() + Send>) {
        self.on_stopped = Some(callback);
    }

    /// The session ID this kernel stamps on outgoing messages.
    pub fn session_id(&self) -> &str {
        &self.connection.session_id
    }

    /// The connection file this kernel is serving.
    pub fn connection_file(&self) -> &ConnectionFile {
        &self.connection_file
    }

    /// Whether the kernel is in the Running state.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// A single bounded-wait check across the control and shell channels.
    ///
    /// Control messages are drained and dispatched first, unconditionally,
    /// so shutdown and interrupt take priority; at most one shell message is
    /// serviced per call, bounding the latency each cycle imposes on the
    /// host thread. Dispatch runs synchronously on the calling thread.
    pub fn poll(&mut self, timeout_hint: Duration) -> Result<PollOutcome, KernelError> {
        if !self.state.is_running() {
            return Ok(PollOutcome::Stopped);
        }

        let Self {
            runtime,
            dispatcher,
            channels,
            ..
        } = self;

        let polled = runtime.block_on(Self::poll_inner(dispatcher, channels, timeout_hint))?;

        match polled {
            Polled::Shutdown => {
                self.stop()?;
                Ok(PollOutcome::Stopped)
            }
            Polled::Dispatched => Ok(PollOutcome::Handled),
            Polled::Idle => Ok(PollOutcome::Idle),
        }
    }

    async fn poll_inner(
        dispatcher: &mut Dispatcher,
        channels: &ServerChannels,
        timeout_hint: Duration,
    ) -> Result<Polled, KernelError> {
        // Control messages first, unconditionally. A shutdown here means any
        // buffered shell request is never serviced.
        while let Ok(envelope) = channels.control_in_rx.try_recv() {
            if Self::dispatch_one(dispatcher, channels, JupyterChannel::Control, envelope).await? {
                return Ok(Polled::Shutdown);
            }
        }

        // At most one shell message per cycle.
        if let Ok(envelope) = channels.shell_in_rx.try_recv() {
            return Self::dispatch_one(dispatcher, channels, JupyterChannel::Shell, envelope)
                .await
                .map(|shutdown| {
                    if shutdown {
                        Polled::Shutdown
                    } else {
                        Polled::Dispatched
                    }
                });
        }

        // Nothing buffered; one bounded wait across both queues, control
        // winning ties.
        tokio::select! {
            biased;
            envelope = channels.control_in_rx.recv() => match envelope {
                Ok(envelope) => {
                    let shutdown = Self::dispatch_one(
                        dispatcher, channels, JupyterChannel::Control, envelope).await?;
                    Ok(if shutdown { Polled::Shutdown } else { Polled::Dispatched })
                }
                Err(_) => Ok(Polled::Idle),
            },
            envelope = channels.shell_in_rx.recv() => match envelope {
                Ok(envelope) => {
                    let shutdown = Self::dispatch_one(
                        dispatcher, channels, JupyterChannel::Shell, envelope).await?;
                    Ok(if shutdown { Polled::Shutdown } else { Polled::Dispatched })
                }
                Err(_) => Ok(Polled::Idle),
            },
            _ = tokio::time::sleep(timeout_hint) => Ok(Polled::Idle),
        }
    }

    async fn dispatch_one(
        dispatcher: &mut Dispatcher,
        channels: &ServerChannels,
        channel: JupyterChannel,
        envelope: InboundEnvelope,
    ) -> Result<bool, KernelError> {
        let result = dispatcher.dispatch(channel, envelope);

        for outbound in result.outbound {
            let envelope = OutboundEnvelope {
                identities: outbound.identities,
                message: outbound.message,
            };
            let sent = match outbound.channel {
                JupyterChannel::Shell => channels.shell_out_tx.send(envelope).await.is_ok(),
                JupyterChannel::Control => channels.control_out_tx.send(envelope).await.is_ok(),
                JupyterChannel::Stdin => channels.stdin_out_tx.send(envelope).await.is_ok(),
                JupyterChannel::IOPub => channels.iopub_tx.send(envelope.message).await.is_ok(),
                JupyterChannel::Heartbeat => {
                    log::error!("Refusing to send reply on heartbeat channel");
                    true
                }
            };
            if !sent {
                log::warn!("Outbound channel closed; dropping reply");
            }
        }

        Ok(result.shutdown)
    }

    /// Publish a message on the iopub channel.
    pub fn publish(&self, message: JupyterMessage) -> Result<(), KernelError> {
        if !self.state.is_running() {
            return Err(KernelError::NotRunning);
        }
        self.channels
            .iopub_tx
            .try_send(message)
            .map_err(|_| KernelError::NotRunning)
    }

    /// Send an input_request on the stdin channel and block for the paired
    /// input_reply, which is synchronous by protocol definition.
    ///
    /// Routed with the identities of the most recent shell request, since
    /// clients use one identity across their request channels.
    pub fn request_input(&mut self, prompt: &str) -> Result<String, KernelError> {
        if !self.state.is_running() {
            return Err(KernelError::NotRunning);
        }
        let (identities, parent) = match self.dispatcher.input_route() {
            Some(route) => route,
            None => return Err(KernelError::NotRunning),
        };
        let message = jupyter_messages::input_request(&self.connection, prompt, parent);

        let Self {
            runtime, channels, ..
        } = self;
        runtime.block_on(async {
            channels
                .stdin_out_tx
                .send(OutboundEnvelope {
                    identities,
                    message,
                })
                .await
                .map_err(|_| KernelError::NotRunning)?;

            match tokio::time::timeout(INPUT_REPLY_TIMEOUT, channels.input_rx.recv()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(KernelError::NotRunning),
                Err(_) => Err(KernelError::InputTimeout),
            }
        })
    }

    /// Stop the kernel: wake every background loop, give in-flight echoes
    /// and publishes a grace delay to drain, join the loops, and notify the
    /// host. Idempotent; duplicate calls are no-ops.
    pub fn stop(&mut self) -> Result<(), KernelError> {
        if !self.state.begin_stop() {
            log::debug!(
                "[session {}] stop() ignored; kernel is {}",
                self.connection.session_id,
                self.state.status()
            );
            return Ok(());
        }

        log::info!("[session {}] Stopping kernel", self.connection.session_id);
        self.stop_event.notify(usize::MAX);

        let tasks = std::mem::take(&mut self.tasks);
        self.runtime.block_on(async {
            tokio::time::sleep(GRACE_DELAY).await;
            for task in tasks {
                match tokio::time::timeout(JOIN_TIMEOUT, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("Background task panicked: {}", err),
                    Err(_) => log::warn!(
                        "Background task did not exit within {:?}; abandoning it",
                        JOIN_TIMEOUT
                    ),
                }
            }
        });

        self.state.finish_stop();
        if let Some(callback) = self.on_stopped.take() {
            callback();
        }
        log::info!("[session {}] Kernel stopped", self.connection.session_id);
        Ok(())
    }
}

enum Polled {
    Dispatched,
    Shutdown,
    Idle,
}

/// Where a channel actor delivers the messages it decodes.
enum ActorSink {
    /// Enqueue for the next poll cycle (shell, control)
    Queue(Sender<InboundEnvelope>),

    /// Extract input_reply values for a pending stdin read (stdin)
    InputValues(Sender<String>),
}

/// A background loop owning one request channel socket: decodes and verifies
/// inbound frames, signs and writes outbound messages.
struct ChannelActor {
    name: &'static str,
    socket: RouterSocket,
    sink: ActorSink,
    outbound_rx: Receiver<OutboundEnvelope>,
    connection: KernelConnection,
    state: Arc<StatusCell>,
    stop_event: Arc<Event>,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            let stop_listener = self.stop_event.listen();
            if self.state.is_stopping() {
                break;
            }
            tokio::select! {
                _ = stop_listener => break,
                outbound = self.outbound_rx.recv() => match outbound {
                    Ok(envelope) => self.write(envelope).await,
                    Err(_) => break,
                },
                inbound = self.socket.recv() => match inbound {
                    Ok(zmq_message) => self.read(zmq_message).await,
                    Err(err) => {
                        log::error!("Error receiving on {} channel: {}", self.name, err);
                        break;
                    }
                }
            }
        }

        // Flush replies that were queued before the stop was signaled, so a
        // shutdown_reply reaches the client before the socket closes, then
        // hold the socket open through the grace delay.
        while let Ok(envelope) = self.outbound_rx.try_recv() {
            self.write(envelope).await;
        }
        tokio::time::sleep(GRACE_DELAY).await;

        log::debug!("Closing {} channel", self.name);
        self.socket.close().await;
    }

    async fn write(&mut self, envelope: OutboundEnvelope) {
        let wire = match WireMessage::from_message(
            &envelope.message,
            envelope.identities,
            &self.connection,
        ) {
            Ok(wire) => wire,
            Err(err) => {
                log::error!("Failed to encode {} message: {}", self.name, err);
                return;
            }
        };
        match zmq_from_frames(wire.into_frames()) {
            Ok(zmq_message) => {
                if let Err(err) = self.socket.send(zmq_message).await {
                    log::error!("Failed to send on {} channel: {}", self.name, err);
                }
            }
            Err(err) => log::error!("Failed to frame {} message: {}", self.name, err),
        }
    }

    async fn read(&mut self, zmq_message: ZmqMessage) {
        let frames: Vec<Vec<u8>> = zmq_message.into_vec().iter().map(|b| b.to_vec()).collect();
        let wire = match WireMessage::from_frames(frames) {
            Ok(wire) => wire,
            Err(err) => {
                log::warn!("Dropping malformed frame set on {} channel: {}", self.name, err);
                return;
            }
        };
        let message = match wire.to_message(&self.connection) {
            Ok(message) => message,
            Err(KernelError::SignatureVerification) => {
                // Dropped, not surfaced to the client
                log::warn!(
                    "Dropping message with bad signature on {} channel",
                    self.name
                );
                return;
            }
            Err(err) => {
                log::warn!("Dropping undecodable message on {} channel: {}", self.name, err);
                return;
            }
        };

        log::trace!(
            "[session {}] {} <- {} ({})",
            self.connection.session_id,
            self.name,
            message.header.msg_type,
            message.header.msg_id
        );

        match &self.sink {
            ActorSink::Queue(tx) => {
                let envelope = InboundEnvelope {
                    identities: wire.identities,
                    message,
                };
                if tx.send(envelope).await.is_err() {
                    log::warn!("Inbound queue closed; dropping {} message", self.name);
                }
            }
            ActorSink::InputValues(tx) => {
                if message.header.msg_type != "input_reply" {
                    log::warn!(
                        "Ignoring unexpected {} message on stdin channel",
                        message.header.msg_type
                    );
                    return;
                }
                match serde_json::from_value::<InputReply>(message.content) {
                    Ok(reply) => {
                        if tx.send(reply.value).await.is_err() {
                            log::warn!("Input queue closed; dropping input reply");
                        }
                    }
                    Err(err) => log::warn!("Malformed input_reply: {}", err),
                }
            }
        }
    }
}

/// A background loop draining the outgoing iopub queue onto the publish
/// socket. The first frame of each published message is its topic, which is
/// the message type.
struct IopubPublisher {
    socket: PubSocket,
    outbound_rx: Receiver<JupyterMessage>,
    connection: KernelConnection,
    state: Arc<StatusCell>,
    stop_event: Arc<Event>,
}

impl IopubPublisher {
    async fn run(mut self) {
        loop {
            let stop_listener = self.stop_event.listen();
            if self.state.is_stopping() {
                break;
            }
            tokio::select! {
                _ = stop_listener => break,
                message = self.outbound_rx.recv() => match message {
                    Ok(message) => self.publish(message).await,
                    Err(_) => break,
                }
            }
        }

        // Flush whatever was queued before the stop was signaled, then hold
        // the socket open through the grace delay.
        while let Ok(message) = self.outbound_rx.try_recv() {
            self.publish(message).await;
        }
        tokio::time::sleep(GRACE_DELAY).await;

        log::debug!("Closing iopub channel");
        self.socket.close().await;
    }

    async fn publish(&mut self, message: JupyterMessage) {
        let topic = message.header.msg_type.clone().into_bytes();
        let wire = match WireMessage::from_message(&message, vec![topic], &self.connection) {
            Ok(wire) => wire,
            Err(err) => {
                log::error!("Failed to encode iopub message: {}", err);
                return;
            }
        };
        match zmq_from_frames(wire.into_frames()) {
            Ok(zmq_message) => {
                if let Err(err) = self.socket.send(zmq_message).await {
                    log::error!("Failed to publish on iopub channel: {}", err);
                }
            }
            Err(err) => log::error!("Failed to frame iopub message: {}", err),
        }
    }
}

/// Convert raw frames into a ZeroMQ multipart message.
fn zmq_from_frames(frames: Vec<Vec<u8>>) -> Result<ZmqMessage, KernelError> {
    let mut frames = frames.into_iter();
    let first = match frames.next() {
        Some(frame) => frame,
        None => {
            return Err(KernelError::MalformedMessage(String::from(
                "empty frame set",
            )))
        }
    };
    let mut message = ZmqMessage::from(Bytes::from(first));
    for frame in frames {
        message.push_back(Bytes::from(frame));
    }
    Ok(message)
}
