//! Async connection management for the Manager interface

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::{
    actions::{ActionSender, CoreActions},
    command::{AmiAction, AmiResponse, ResponseStatus},
    config::{AmiConnectOptions, ConnectionProfile},
    constants::SOCKET_BUF_SIZE,
    correlator::{Completion, Correlator, EventRoute},
    dispatcher::{DispatchOutcome, EventSubscriber, HandlerErrorPolicy, SharedDispatcher},
    error::{AmiError, AmiResult},
    message::{AmiMessage, MessageKind},
    protocol::AmiParser,
};

/// Lifecycle of a Manager connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// TCP connect and banner in progress.
    Connecting,
    /// `Login` sent, waiting for the verdict.
    Authenticating,
    /// Logged in; actions may be sent.
    Ready,
    /// Session ended (or never started).
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    /// `true` only in [`ConnectionState::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
        }
    }
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// No connection attempt has completed yet.
    NotStarted,
    /// `Login` was rejected or not answered in time.
    AuthenticationFailed,
    /// Liveness timeout exceeded without any inbound traffic
    HeartbeatExpired,
    /// TCP I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Unframeable data from the server
    ProtocolError(String),
    /// An event handler failed under [`HandlerErrorPolicy::Disconnect`]
    HandlerFailed(String),
    /// Clean EOF on the TCP connection
    ConnectionClosed,
    /// Client called disconnect()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::NotStarted => write!(f, "not started"),
            DisconnectReason::AuthenticationFailed => write!(f, "authentication failed"),
            DisconnectReason::HeartbeatExpired => write!(f, "liveness timeout expired"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::HandlerFailed(msg) => write!(f, "event handler failed: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> AmiResult<TcpStream> {
    let timeout_ms = connect_timeout.as_millis() as u64;
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AmiError::Io(e))
        }
        Err(_) => {
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(AmiError::Timeout { timeout_ms })
        }
    }
}

type Waiter = oneshot::Sender<AmiResult<AmiResponse>>;

/// Shared state between AmiClient and the reader task
struct SharedState {
    correlator: StdMutex<Correlator<Waiter>>,
    /// Action response timeout in milliseconds
    action_timeout_ms: AtomicU64,
    /// Liveness timeout in milliseconds (0 = disabled)
    liveness_timeout_ms: AtomicU64,
    /// Set by disconnect() so the reader reports ClientRequested on EOF
    closing: AtomicBool,
    handler_errors: HandlerErrorPolicy,
}

impl SharedState {
    fn correlator(&self) -> MutexGuard<'_, Correlator<Waiter>> {
        self.correlator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn settle(completions: impl IntoIterator<Item = Completion<Waiter>>) {
    for completion in completions {
        trace!("Settling action {}", completion.action_id);
        let _ = completion
            .waiter
            .send(completion.result);
    }
}

/// Manager client handle (Clone + Send + Sync)
///
/// Any number of actions may be outstanding at once; the reader task routes
/// each response to its caller by `ActionID`. Events go to the handlers
/// registered through [`EventSubscriber`].
///
/// ```rust,no_run
/// use asterisk_manager_tokio::{AmiClient, CoreActions, EventSubscriber};
///
/// # async fn example() -> Result<(), asterisk_manager_tokio::AmiError> {
/// let client = AmiClient::connect("127.0.0.1", 5038, "admin", "amp111").await?;
/// client.register_handler("Hangup", |event| {
///     println!("hangup on {:?}", event.channel());
///     Ok(())
/// });
/// client.ping().await?;
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AmiClient {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    shared: Arc<SharedState>,
    dispatcher: SharedDispatcher,
    state_rx: watch::Receiver<ConnectionState>,
    banner: Arc<str>,
}

impl std::fmt::Debug for AmiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiClient")
            .field("state", &self.state())
            .field("banner", &self.banner)
            .finish()
    }
}

/// Read a single block from the socket into the parser.
///
/// Used for the banner and login exchange on the unsplit stream; the reader
/// loop inlines this logic to handle liveness tracking.
async fn recv_message(
    stream: &mut TcpStream,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    deadline: Instant,
    timeout_ms: u64,
) -> AmiResult<AmiMessage> {
    loop {
        if let Some(message) = parser.parse_message()? {
            trace!("[RECV] Parsed block from buffer: {:?}", message.kind());
            return Ok(message);
        }

        let read_result = tokio::time::timeout_at(deadline, stream.read(read_buffer)).await;
        let bytes_read = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(AmiError::Io(e)),
            Err(_) => return Err(AmiError::Timeout { timeout_ms }),
        };

        trace!("[RECV] Read {} bytes from socket", bytes_read);
        if bytes_read == 0 {
            return Err(AmiError::ConnectionClosed);
        }
        parser.add_data(&read_buffer[..bytes_read])?;
    }
}

/// Wait for the `Asterisk Call Manager/x.y` greeting.
async fn recv_banner(
    stream: &mut TcpStream,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    connect_timeout: Duration,
) -> AmiResult<String> {
    let timeout_ms = connect_timeout.as_millis() as u64;
    let deadline = Instant::now() + connect_timeout;
    while parser
        .banner()
        .is_none()
    {
        let read_result = tokio::time::timeout_at(deadline, stream.read(read_buffer)).await;
        let bytes_read = match read_result {
            Ok(Ok(0)) => return Err(AmiError::ConnectionClosed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(AmiError::Io(e)),
            Err(_) => return Err(AmiError::Timeout { timeout_ms }),
        };
        parser.add_data(&read_buffer[..bytes_read])?;
        if let Some(message) = parser.parse_message()? {
            debug!("[CONNECT] Ignoring {:?} block sent before Login", message.kind());
        }
    }
    let banner = parser
        .banner()
        .unwrap_or_default()
        .to_string();
    debug!("[CONNECT] Server banner: {}", banner);
    Ok(banner)
}

/// Send `Login` and wait for its verdict.
///
/// The `ActionID` comes from the connection's correlator, which also matches
/// the reply. Events that arrive before the response are discarded.
async fn authenticate(
    stream: &mut TcpStream,
    parser: &mut AmiParser,
    read_buffer: &mut [u8],
    correlator: &mut Correlator<Waiter>,
    username: &str,
    secret: &str,
    options: &AmiConnectOptions,
) -> AmiResult<()> {
    let mut login = AmiAction::login(username, secret, options.events);
    let (tx, _rx) = oneshot::channel();
    let action_id = correlator.submit(&mut login, tx, None)?;
    let wire = login.to_wire_format()?;
    debug!(
        "[AUTH] Sending Login ({}) for user {} [REDACTED]",
        action_id, username
    );
    stream
        .write_all(wire.as_bytes())
        .await
        .map_err(AmiError::Io)?;

    let timeout_ms = options
        .connect_timeout
        .as_millis() as u64;
    let deadline = Instant::now() + options.connect_timeout;
    loop {
        let message = match recv_message(stream, parser, read_buffer, deadline, timeout_ms).await {
            Ok(message) => message,
            Err(AmiError::Timeout { timeout_ms }) => {
                correlator.cancel(&action_id);
                return Err(AmiError::auth_failed(format!(
                    "no response to Login within {}ms",
                    timeout_ms
                )));
            }
            Err(e) => return Err(e),
        };
        if message.kind() != MessageKind::Response {
            debug!("[AUTH] Ignoring {:?} block before Login response", message.kind());
            continue;
        }
        let Some(completion) = correlator.on_response(message) else {
            continue;
        };

        return match completion.result {
            Ok(response) if *response.status() == ResponseStatus::Success => {
                debug!("[AUTH] Authentication successful");
                Ok(())
            }
            Ok(response) => Err(AmiError::auth_failed(
                response
                    .message_text()
                    .unwrap_or("Authentication failed")
                    .to_string(),
            )),
            Err(AmiError::ActionFailed { message }) => Err(AmiError::auth_failed(message)),
            Err(AmiError::PermissionDenied) => Err(AmiError::auth_failed("Permission denied")),
            Err(e) => Err(e),
        };
    }
}

/// Background reader loop
async fn reader_loop(
    reader: OwnedReadHalf,
    parser: AmiParser,
    shared: Arc<SharedState>,
    dispatcher: SharedDispatcher,
    state_tx: watch::Sender<ConnectionState>,
) {
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        parser,
        shared.clone(),
        dispatcher,
        &state_tx,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("reader task panicked");
        close(
            &shared,
            &state_tx,
            DisconnectReason::IoError("reader task panicked".to_string()),
        );
    }
}

/// Mark the connection down, then fail every outstanding action.
///
/// The order matters: a sender that registers after the state flips sees
/// `Disconnected`, one that registered before is failed here.
fn close(shared: &SharedState, state_tx: &watch::Sender<ConnectionState>, reason: DisconnectReason) {
    info!("Connection closed: {}", reason);
    let message = reason.to_string();
    state_tx.send_replace(ConnectionState::Disconnected(reason));
    let failed = shared
        .correlator()
        .fail_all(&message);
    if !failed.is_empty() {
        debug!("Failing {} outstanding action(s)", failed.len());
    }
    settle(failed);
}

/// Route one block. Returns the disconnect reason when the connection must close.
fn handle_message(
    message: AmiMessage,
    shared: &SharedState,
    dispatcher: &SharedDispatcher,
) -> Result<(), DisconnectReason> {
    match message.kind() {
        MessageKind::Response => {
            let completion = shared
                .correlator()
                .on_response(message);
            settle(completion);
        }
        MessageKind::Event => {
            let route = shared
                .correlator()
                .on_event(message);
            match route {
                EventRoute::Dispatch(event) => {
                    trace!("[RECV] Event {}", event.name());
                    if let DispatchOutcome::Failed { event, message } = dispatcher.dispatch(&event)
                    {
                        if shared.handler_errors == HandlerErrorPolicy::Disconnect {
                            return Err(DisconnectReason::HandlerFailed(format!(
                                "{}: {}",
                                event, message
                            )));
                        }
                    }
                }
                EventRoute::Collected => {}
                EventRoute::Completed(completion) => settle([completion]),
            }
        }
        MessageKind::Action | MessageKind::Unknown => {
            debug!("Ignoring unexpected {:?} block", message.kind());
        }
    }
    Ok(())
}

async fn reader_loop_inner(
    mut reader: OwnedReadHalf,
    mut parser: AmiParser,
    shared: Arc<SharedState>,
    dispatcher: SharedDispatcher,
    state_tx: &watch::Sender<ConnectionState>,
) {
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    let mut last_recv = Instant::now();

    loop {
        // Drain complete blocks already buffered
        match parser.parse_message() {
            Ok(Some(message)) => {
                if let Err(reason) = handle_message(message, &shared, &dispatcher) {
                    close(&shared, state_tx, reason);
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Parser error: {}", e);
                close(
                    &shared,
                    state_tx,
                    DisconnectReason::ProtocolError(e.to_string()),
                );
                return;
            }
        }

        // Read from socket with 2s timeout (for liveness checking)
        let read_result = timeout(Duration::from_secs(2), reader.read(&mut read_buffer)).await;

        match read_result {
            Ok(Ok(0)) => {
                if parser.has_partial_block() {
                    warn!("Discarding incomplete block at EOF");
                    parser.discard_partial();
                }
                let reason = if shared
                    .closing
                    .load(Ordering::Relaxed)
                {
                    DisconnectReason::ClientRequested
                } else {
                    DisconnectReason::ConnectionClosed
                };
                close(&shared, state_tx, reason);
                return;
            }
            Ok(Ok(n)) => {
                last_recv = Instant::now();
                trace!("[RECV] Read {} bytes from socket", n);
                if let Err(e) = parser.add_data(&read_buffer[..n]) {
                    warn!("Buffer error: {}", e);
                    close(
                        &shared,
                        state_tx,
                        DisconnectReason::ProtocolError(e.to_string()),
                    );
                    return;
                }
            }
            Ok(Err(e)) => {
                warn!("Read error: {}", e);
                let reason = if shared
                    .closing
                    .load(Ordering::Relaxed)
                {
                    DisconnectReason::ClientRequested
                } else {
                    DisconnectReason::IoError(e.to_string())
                };
                close(&shared, state_tx, reason);
                return;
            }
            Err(_) => {
                // Timeout: check liveness
                let threshold_ms = shared
                    .liveness_timeout_ms
                    .load(Ordering::Relaxed);
                if threshold_ms > 0 {
                    let elapsed = last_recv.elapsed();
                    if elapsed > Duration::from_millis(threshold_ms) {
                        warn!(
                            "Liveness timeout: {}ms without traffic (threshold {}ms)",
                            elapsed.as_millis(),
                            threshold_ms
                        );
                        close(&shared, state_tx, DisconnectReason::HeartbeatExpired);
                        return;
                    }
                }
            }
        }
    }
}

impl AmiClient {
    /// Connect and log in with default options.
    pub async fn connect(host: &str, port: u16, username: &str, secret: &str) -> AmiResult<Self> {
        Self::connect_with_options(host, port, username, secret, AmiConnectOptions::default())
            .await
    }

    /// Connect and log in with custom options.
    pub async fn connect_with_options(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
        options: AmiConnectOptions,
    ) -> AmiResult<Self> {
        Self::connect_with_state(host, port, username, secret, options, None).await
    }

    /// Connect using a named profile from [`ManagerConfig`](crate::ManagerConfig).
    pub async fn connect_profile(profile: &ConnectionProfile) -> AmiResult<Self> {
        Self::connect_with_options(
            &profile.host,
            profile.port,
            &profile.username,
            &profile.secret,
            profile.options(),
        )
        .await
    }

    /// Connect while publishing every state transition to `state_tx`.
    ///
    /// Lets callers observe `Connecting` → `Authenticating` → `Ready`, and the
    /// `Disconnected(AuthenticationFailed)` outcome of a rejected login.
    pub async fn connect_observed(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
        options: AmiConnectOptions,
        state_tx: watch::Sender<ConnectionState>,
    ) -> AmiResult<Self> {
        Self::connect_with_state(host, port, username, secret, options, Some(state_tx)).await
    }

    async fn connect_with_state(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
        options: AmiConnectOptions,
        state_tx: Option<watch::Sender<ConnectionState>>,
    ) -> AmiResult<Self> {
        let state_tx = state_tx.unwrap_or_else(|| watch::channel(ConnectionState::Connecting).0);
        state_tx.send_replace(ConnectionState::Connecting);
        info!("Connecting to Asterisk Manager at {}:{}", host, port);

        let mut parser = AmiParser::new().with_malformed_line_policy(options.malformed_lines);
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

        let result = async {
            let mut stream = tcp_connect_with_timeout(host, port, options.connect_timeout).await?;
            let banner = recv_banner(
                &mut stream,
                &mut parser,
                &mut read_buffer,
                options.connect_timeout,
            )
            .await?;
            Ok::<_, AmiError>((stream, banner))
        }
        .await;
        let (mut stream, banner) = match result {
            Ok(pair) => pair,
            Err(e) => {
                let reason = match &e {
                    AmiError::Protocol { message } => DisconnectReason::ProtocolError(message.clone()),
                    AmiError::ConnectionClosed => DisconnectReason::ConnectionClosed,
                    other => DisconnectReason::IoError(other.to_string()),
                };
                state_tx.send_replace(ConnectionState::Disconnected(reason));
                return Err(e);
            }
        };

        state_tx.send_replace(ConnectionState::Authenticating);
        let mut correlator = Correlator::with_unique_prefix();
        if let Err(e) = authenticate(
            &mut stream,
            &mut parser,
            &mut read_buffer,
            &mut correlator,
            username,
            secret,
            &options,
        )
        .await
        {
            warn!("[AUTH] Login failed: {}", e);
            let reason = match &e {
                AmiError::AuthenticationFailed { .. } => DisconnectReason::AuthenticationFailed,
                AmiError::ConnectionClosed => DisconnectReason::ConnectionClosed,
                other => DisconnectReason::IoError(other.to_string()),
            };
            state_tx.send_replace(ConnectionState::Disconnected(reason));
            let _ = stream
                .shutdown()
                .await;
            return Err(e);
        }

        info!("Successfully connected and authenticated ({})", banner);
        Ok(Self::split_and_spawn(
            stream, parser, correlator, state_tx, options, banner,
        ))
    }

    fn split_and_spawn(
        stream: TcpStream,
        parser: AmiParser,
        correlator: Correlator<Waiter>,
        state_tx: watch::Sender<ConnectionState>,
        options: AmiConnectOptions,
        banner: String,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(SharedState {
            correlator: StdMutex::new(correlator),
            action_timeout_ms: AtomicU64::new(
                options
                    .action_timeout
                    .as_millis() as u64,
            ),
            liveness_timeout_ms: AtomicU64::new(
                options
                    .liveness_timeout
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
            ),
            closing: AtomicBool::new(false),
            handler_errors: options.handler_errors,
        });
        let dispatcher = SharedDispatcher::new();

        state_tx.send_replace(ConnectionState::Ready);
        let state_rx = state_tx.subscribe();

        tokio::spawn(reader_loop(
            read_half,
            parser,
            shared.clone(),
            dispatcher.clone(),
            state_tx,
        ));

        AmiClient {
            writer: Arc::new(Mutex::new(write_half)),
            shared,
            dispatcher,
            state_rx,
            banner: banner.into(),
        }
    }

    /// Send an action and wait for its response.
    ///
    /// An `ActionID` is generated unless the action carries one. Several calls
    /// may be in flight at once; the writer lock is only held while the
    /// action is written. Actions declared with
    /// [`expects_event_list`](AmiAction::expects_event_list) resolve once the
    /// completion event arrives, with the list attached.
    pub async fn send_action(&self, mut action: AmiAction) -> AmiResult<AmiResponse> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        let action_id = self
            .shared
            .correlator()
            .submit(&mut action, tx, None)?;

        let wire = match action.to_wire_format() {
            Ok(wire) => wire,
            Err(e) => {
                self.shared
                    .correlator()
                    .cancel(&action_id);
                return Err(e);
            }
        };
        debug!("[SEND] {:?}", action);

        let write_result = {
            let mut writer = self
                .writer
                .lock()
                .await;
            writer
                .write_all(wire.as_bytes())
                .await
        };
        if let Err(e) = write_result {
            self.shared
                .correlator()
                .cancel(&action_id);
            return Err(AmiError::Io(e));
        }

        let timeout_ms = self
            .shared
            .action_timeout_ms
            .load(Ordering::Relaxed);
        match timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(result)) => {
                debug!("[RECV] Response for {}: ok={}", action_id, result.is_ok());
                result
            }
            Ok(Err(_)) => Err(AmiError::connection_lost("reader task ended")),
            Err(_) => {
                self.shared
                    .correlator()
                    .cancel(&action_id);
                warn!(
                    "Action {} ({}) timed out after {}ms",
                    action.name(),
                    action_id,
                    timeout_ms
                );
                Err(AmiError::Timeout { timeout_ms })
            }
        }
    }

    /// Version from the server banner (e.g. `"1.1"`).
    pub fn banner_version(&self) -> &str {
        let banner: &str = &self.banner;
        banner
            .strip_prefix(crate::constants::BANNER_PREFIX)
            .unwrap_or(banner)
            .trim()
    }

    /// Number of actions awaiting a response.
    pub fn pending_actions(&self) -> usize {
        self.shared
            .correlator()
            .len()
    }

    /// Set the per-action response timeout.
    pub fn set_action_timeout(&self, duration: Duration) {
        self.shared
            .action_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Disconnect when nothing arrives for `duration`. Zero disables the check.
    ///
    /// Pair with periodic [`ping`](CoreActions::ping) calls on quiet links.
    pub fn set_liveness_timeout(&self, duration: Duration) {
        self.shared
            .liveness_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// `true` while in [`ConnectionState::Ready`].
    pub fn is_connected(&self) -> bool {
        self.state_rx
            .borrow()
            .is_ready()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx
            .borrow()
            .clone()
    }

    /// Receiver notified on every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx
            .clone()
    }

    /// Wait until the connection is down and return why.
    pub async fn wait_disconnected(&self) -> DisconnectReason {
        let mut rx = self
            .state_rx
            .clone();
        loop {
            let current = rx
                .borrow_and_update()
                .clone();
            if let ConnectionState::Disconnected(reason) = current {
                return reason;
            }
            if rx
                .changed()
                .await
                .is_err()
            {
                return DisconnectReason::ConnectionClosed;
            }
        }
    }

    /// Log off, then close the socket.
    ///
    /// A failed `Logoff` exchange is logged and does not prevent the close.
    pub async fn disconnect(&self) -> AmiResult<()> {
        info!("Client requested disconnect");
        self.shared
            .closing
            .store(true, Ordering::Relaxed);
        if self.is_connected() {
            if let Err(e) = self
                .logoff()
                .await
            {
                debug!("Logoff before disconnect failed: {}", e);
            }
        }
        let mut writer = self
            .writer
            .lock()
            .await;
        match writer
            .shutdown()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(AmiError::Io(e)),
        }
    }
}

impl ActionSender for AmiClient {
    fn send_action(&self, action: AmiAction) -> impl Future<Output = AmiResult<AmiResponse>> + Send {
        AmiClient::send_action(self, action)
    }
}

impl EventSubscriber for AmiClient {
    fn event_dispatcher(&self) -> &SharedDispatcher {
        &self.dispatcher
    }
}
