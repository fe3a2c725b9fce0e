//! TCP transport for a single controller.
//!
//! A server owns one machine and runs it once. It waits for a controller,
//! closes the listener, then drives three tasks until the run ends: the run
//! loop, a reader that applies inbound commands, and a writer that relays
//! engine events in order.

use crate::config::NetworkConfig;
use crate::error::ServerError;
use crate::session::Session;
use fsmlink_core::{EngineContext, EngineEvent, Interpreter, Machine, Outcome};
use fsmlink_protocol::{encode_line, Envelope, InboundMessage, LineDecoder, OutboundMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

const CONNECTED_MESSAGE: &str = "Successfully connected to FSM.";
const READ_BUFFER_SIZE: usize = 4096;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum time a single write to the controller may take.
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            write_timeout: network.write_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Serves one machine to one controller.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    interpreter: Interpreter,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl Server {
    /// Validates the machine and binds the listener.
    pub async fn bind(config: ServerConfig, machine: Machine) -> Result<Self, ServerError> {
        let (tx, events) = mpsc::unbounded_channel();
        let ctx = EngineContext::new(Arc::new(tx));
        let interpreter = Interpreter::new(machine, ctx)?;

        let listener = TcpListener::bind(config.bind_addr).await?;
        tracing::info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            interpreter,
            events,
        })
    }

    /// Returns the engine context.
    ///
    /// Use it to seed variables before serving, or to stop the engine from
    /// elsewhere (stopping also cancels a pending accept).
    pub fn context(&self) -> Arc<EngineContext> {
        self.interpreter.context().clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for a controller and runs the machine to completion.
    ///
    /// Returns [`Outcome::Stopped`] without running anything if the engine
    /// is stopped before a controller connects.
    pub async fn serve(self) -> Result<Outcome, ServerError> {
        let Server {
            config,
            listener,
            interpreter,
            events,
        } = self;
        let ctx = interpreter.context().clone();

        tracing::info!("Waiting for controller");
        let Some((stream, addr)) = accept_controller(&listener, &ctx).await else {
            tracing::info!("Stopped before a controller connected");
            return Ok(Outcome::Stopped);
        };
        // One controller per run; later connection attempts are refused.
        drop(listener);

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
        }

        let session = Arc::new(Session::new(addr));
        tracing::info!("Controller connected: {} (session {})", addr, session.id);

        let (read_half, write_half) = stream.into_split();
        let (done_tx, done_rx) = oneshot::channel();

        let writer = tokio::spawn(write_events(
            write_half,
            events,
            done_rx,
            ctx.clone(),
            session.clone(),
            config.write_timeout,
        ));
        let reader = tokio::spawn(read_commands(read_half, ctx.clone(), session.clone()));
        let run = tokio::spawn(async move { interpreter.run().await });

        let outcome = run.await;
        if outcome.is_err() {
            ctx.stop();
        }

        let _ = done_tx.send(());
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("[{}] Writer finished with error: {}", addr, e),
            Err(e) => tracing::error!("[{}] Writer task failed: {}", addr, e),
        }
        reader.abort();

        tracing::info!(
            "Session {} closed after {:?}: {} received, {} skipped, {} sent",
            session.id,
            session.age(),
            session.received(),
            session.skipped(),
            session.sent()
        );

        let outcome = outcome?;
        tracing::info!("Run finished: {:?}", outcome);
        Ok(outcome)
    }
}

/// Accepts the first controller, or returns `None` once the engine stops.
async fn accept_controller(
    listener: &TcpListener,
    ctx: &EngineContext,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        tokio::select! {
            biased;
            _ = ctx.stopped() => return None,
            result = listener.accept() => match result {
                Ok(conn) => return Some(conn),
                Err(e) => tracing::error!("Accept error: {}", e),
            },
        }
    }
}

/// Converts an engine event to its wire form.
pub fn outbound_message(event: EngineEvent) -> OutboundMessage {
    match event {
        EngineEvent::Started { start_state } => OutboundMessage::FsmStarted { start_state },
        EngineEvent::EnteredState { name, is_finish } => {
            OutboundMessage::CurrentState { name, is_finish }
        }
        EngineEvent::VariableUpdated { name, value } => {
            OutboundMessage::VariableUpdate { name, value }
        }
        EngineEvent::StateActionExecuted { state } => {
            OutboundMessage::StateActionExecuted { state_name: state }
        }
        EngineEvent::TransitionTaken { from, to, delay } => OutboundMessage::TransitionTaken {
            from_state: from,
            to_state: to,
            delay: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        },
        EngineEvent::TransitionActionExecuted { from, to } => {
            OutboundMessage::TransitionActionExecuted {
                from_state: from,
                to_state: to,
            }
        }
        EngineEvent::Finished { state } => OutboundMessage::FsmFinished {
            finish_state: state,
        },
        EngineEvent::Stuck { state } => OutboundMessage::FsmStuck { state_name: state },
        EngineEvent::Faulted { message } => OutboundMessage::FsmError { message },
        EngineEvent::Stopped { message } => OutboundMessage::FsmStopped { message },
    }
}

/// Relays engine events to the controller until `done` fires and the queue
/// is drained. A failed write stops the engine.
async fn write_events<W>(
    mut writer: W,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    mut done: oneshot::Receiver<()>,
    ctx: Arc<EngineContext>,
    session: Arc<Session>,
    write_timeout: Duration,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let result = async {
        let connected = OutboundMessage::FsmConnected {
            message: CONNECTED_MESSAGE.to_string(),
        };
        send(&mut writer, &connected, &session, write_timeout).await?;

        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        send(&mut writer, &outbound_message(event), &session, write_timeout).await?
                    }
                    None => break,
                },
                _ = &mut done => {
                    while let Ok(event) = events.try_recv() {
                        send(&mut writer, &outbound_message(event), &session, write_timeout).await?;
                    }
                    break;
                }
            }
        }

        writer.shutdown().await?;
        Ok::<(), ServerError>(())
    }
    .await;

    if let Err(ref e) = result {
        tracing::warn!("[{}] Failed to write to controller: {}", session.remote_addr, e);
        ctx.stop();
    }
    result
}

async fn send<W>(
    writer: &mut W,
    message: &OutboundMessage,
    session: &Session,
    write_timeout: Duration,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_line(message)?;
    tracing::debug!("[{}] Sending {}", session.remote_addr, message.type_name());

    tokio::time::timeout(write_timeout, writer.write_all(&bytes))
        .await
        .map_err(|_| ServerError::WriteTimeout(write_timeout))??;
    session.record_sent();
    Ok(())
}

/// Applies controller commands until end-of-stream or a read error, then
/// stops the engine. Malformed and over-long lines are skipped.
async fn read_commands<R>(
    mut reader: R,
    ctx: Arc<EngineContext>,
    session: Arc<Session>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let result = relay_commands(&mut reader, &ctx, &session).await;
    match result {
        Ok(()) => tracing::info!("Controller disconnected: {}", session.remote_addr),
        Err(ref e) => tracing::warn!("[{}] Read error: {}", session.remote_addr, e),
    }
    ctx.stop();
    result
}

async fn relay_commands<R>(
    reader: &mut R,
    ctx: &EngineContext,
    session: &Session,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        tracing::debug!("[{}] Received {} bytes", session.remote_addr, n);
        decoder.extend(&buf[..n]);

        loop {
            match decoder.decode_line::<Envelope>() {
                Ok(Some(envelope)) => apply_command(envelope, ctx, session),
                Ok(None) => break,
                Err(e) => {
                    session.record_skipped();
                    tracing::warn!("[{}] Skipping malformed line: {}", session.remote_addr, e);
                }
            }
        }
    }
}

fn apply_command(envelope: Envelope, ctx: &EngineContext, session: &Session) {
    match InboundMessage::try_from(envelope) {
        Ok(InboundMessage::SetVariable { name, value }) => {
            session.record_received();
            tracing::debug!("[{}] SET_VARIABLE {} = {}", session.remote_addr, name, value);
            ctx.set_variable(name, value);
        }
        Ok(InboundMessage::StopFsm {}) => {
            session.record_received();
            tracing::info!("[{}] Stop requested by controller", session.remote_addr);
            ctx.stop();
        }
        Err(e) => {
            session.record_skipped();
            tracing::warn!("[{}] Ignoring message: {}", session.remote_addr, e);
        }
    }
}
