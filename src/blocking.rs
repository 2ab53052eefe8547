//! Blocking and cooperative Manager session over a std `TcpStream`
//!
//! [`ManagerSession`] serves two kinds of callers. Threaded code calls
//! [`send_action`](ManagerSession::send_action), which blocks until the
//! response arrives and dispatches any events read in the meantime. Code that
//! runs its own poll/select loop registers the socket handle, calls
//! [`pump`](ManagerSession::pump) when it becomes readable, and uses
//! [`submit`](ManagerSession::submit) / [`take_response`](ManagerSession::take_response)
//! so nothing ever blocks.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::{
    command::{AmiAction, AmiResponse, ResponseStatus},
    config::{AmiConnectOptions, ConnectionProfile},
    connection::{ConnectionState, DisconnectReason},
    constants::SOCKET_BUF_SIZE,
    correlator::{Completion, Correlator, EventRoute},
    dispatcher::{DispatchOutcome, EventSubscriber, HandlerErrorPolicy, SharedDispatcher},
    error::{AmiError, AmiResult},
    event::AmiEvent,
    message::{AmiMessage, MessageKind},
    protocol::AmiParser,
};

/// Smallest read timeout handed to the socket; zero means "block forever" there.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Single-threaded Manager session.
pub struct ManagerSession {
    stream: TcpStream,
    parser: AmiParser,
    correlator: Correlator<()>,
    completed: HashMap<String, AmiResult<AmiResponse>>,
    dispatcher: SharedDispatcher,
    state: ConnectionState,
    options: AmiConnectOptions,
    read_buffer: Vec<u8>,
    last_recv: Instant,
    closing: bool,
}

impl std::fmt::Debug for ManagerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerSession")
            .field("state", &self.state)
            .field("banner", &self.parser.banner())
            .field("pending", &self.correlator.len())
            .field("responses_waiting", &self.completed.len())
            .finish()
    }
}

fn connect_stream(host: &str, port: u16, connect_timeout: Duration) -> AmiResult<TcpStream> {
    let mut last_error = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(stream) => {
                debug!("[CONNECT] TCP connection established to {}", addr);
                return Ok(stream);
            }
            Err(e) => {
                warn!("[CONNECT] TCP connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(match last_error {
        Some(e) if e.kind() == ErrorKind::TimedOut => AmiError::Timeout {
            timeout_ms: connect_timeout.as_millis() as u64,
        },
        Some(e) => AmiError::Io(e),
        None => AmiError::validation(format!("{} resolved to no addresses", host)),
    })
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl ManagerSession {
    /// Connect and log in with default options.
    pub fn connect(host: &str, port: u16, username: &str, secret: &str) -> AmiResult<Self> {
        Self::connect_with_options(host, port, username, secret, AmiConnectOptions::default())
    }

    /// Connect and log in with custom options.
    pub fn connect_with_options(
        host: &str,
        port: u16,
        username: &str,
        secret: &str,
        options: AmiConnectOptions,
    ) -> AmiResult<Self> {
        info!("Connecting to Asterisk Manager at {}:{}", host, port);
        let stream = connect_stream(host, port, options.connect_timeout)?;
        let mut session = Self::open(stream, options)?;
        session.login(username, secret)?;
        Ok(session)
    }

    /// Connect using a named profile from [`ManagerConfig`](crate::ManagerConfig).
    pub fn connect_profile(profile: &ConnectionProfile) -> AmiResult<Self> {
        Self::connect_with_options(
            &profile.host,
            profile.port,
            &profile.username,
            &profile.secret,
            profile.options(),
        )
    }

    /// Wrap an already connected stream and read the server banner.
    ///
    /// The session is left in [`ConnectionState::Connecting`]; call
    /// [`login`](Self::login) next.
    pub fn open(stream: TcpStream, options: AmiConnectOptions) -> AmiResult<Self> {
        let parser = AmiParser::new().with_malformed_line_policy(options.malformed_lines);
        let mut session = ManagerSession {
            stream,
            parser,
            correlator: Correlator::with_unique_prefix(),
            completed: HashMap::new(),
            dispatcher: SharedDispatcher::new(),
            state: ConnectionState::Connecting,
            options,
            read_buffer: vec![0u8; SOCKET_BUF_SIZE],
            last_recv: Instant::now(),
            closing: false,
        };

        let deadline = Instant::now() + session.options.connect_timeout;
        while session
            .parser
            .banner()
            .is_none()
        {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let timeout_ms = session
                    .options
                    .connect_timeout
                    .as_millis() as u64;
                session.close(DisconnectReason::IoError("no banner received".to_string()));
                return Err(AmiError::Timeout { timeout_ms });
            }
            session.read_chunk(Some(remaining))?;
        }
        debug!(
            "[CONNECT] Server banner: {}",
            session
                .parser
                .banner()
                .unwrap_or_default()
        );
        Ok(session)
    }

    /// Send `Login` and wait for the verdict.
    ///
    /// On rejection the session stays observable in
    /// `Disconnected(AuthenticationFailed)`.
    pub fn login(&mut self, username: &str, secret: &str) -> AmiResult<()> {
        self.state = ConnectionState::Authenticating;
        debug!("[AUTH] Sending Login for user {} [REDACTED]", username);
        let login = AmiAction::login(username, secret, self.options.events);
        let timeout = self
            .options
            .connect_timeout;

        let result = self
            .submit_with_timeout(login, timeout)
            .and_then(|action_id| self.wait_for(&action_id));
        match result {
            Ok(response) if *response.status() == ResponseStatus::Success => {
                info!("Successfully connected and authenticated");
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Ok(response) => {
                let message = response
                    .message_text()
                    .unwrap_or("Authentication failed")
                    .to_string();
                self.reject_login(message)
            }
            Err(AmiError::ActionFailed { message }) => self.reject_login(message),
            Err(AmiError::PermissionDenied) => self.reject_login("Permission denied".to_string()),
            Err(AmiError::Timeout { timeout_ms }) => {
                self.close(DisconnectReason::AuthenticationFailed);
                Err(AmiError::auth_failed(format!(
                    "no response to Login within {}ms",
                    timeout_ms
                )))
            }
            Err(e) => {
                if !matches!(self.state, ConnectionState::Disconnected(_)) {
                    self.close(DisconnectReason::AuthenticationFailed);
                }
                Err(e)
            }
        }
    }

    fn reject_login(&mut self, message: String) -> AmiResult<()> {
        warn!("[AUTH] Login rejected: {}", message);
        self.close(DisconnectReason::AuthenticationFailed);
        Err(AmiError::auth_failed(message))
    }

    /// Write an action without waiting for its response.
    ///
    /// Returns the `ActionID` to pass to [`take_response`](Self::take_response).
    pub fn submit(&mut self, action: AmiAction) -> AmiResult<String> {
        if !self
            .state
            .is_ready()
        {
            return Err(AmiError::NotConnected);
        }
        let timeout = self
            .options
            .action_timeout;
        self.submit_with_timeout(action, timeout)
    }

    fn submit_with_timeout(&mut self, mut action: AmiAction, timeout: Duration) -> AmiResult<String> {
        let action_id = self
            .correlator
            .submit(&mut action, (), Some(timeout))?;
        let wire = match action.to_wire_format() {
            Ok(wire) => wire,
            Err(e) => {
                self.correlator
                    .cancel(&action_id);
                return Err(e);
            }
        };
        debug!("[SEND] {:?}", action);
        if let Err(e) = self
            .stream
            .write_all(wire.as_bytes())
        {
            self.correlator
                .cancel(&action_id);
            self.close(DisconnectReason::IoError(e.to_string()));
            return Err(AmiError::Io(e));
        }
        Ok(action_id)
    }

    /// Send an action and block until its response (or timeout).
    ///
    /// Events read while waiting are dispatched in wire order.
    pub fn send_action(&mut self, action: AmiAction) -> AmiResult<AmiResponse> {
        let action_id = self.submit(action)?;
        self.wait_for(&action_id)
    }

    fn wait_for(&mut self, action_id: &str) -> AmiResult<AmiResponse> {
        loop {
            if let Some(result) = self
                .completed
                .remove(action_id)
            {
                return result;
            }
            let Some(deadline) = self
                .correlator
                .deadline_of(action_id)
            else {
                return Err(AmiError::connection_lost(format!(
                    "action {} is no longer pending",
                    action_id
                )));
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                if let Err(e) = self.read_chunk(Some(remaining)) {
                    // close() may already have settled this action
                    return match self
                        .completed
                        .remove(action_id)
                    {
                        Some(result) => result,
                        None => Err(e),
                    };
                }
            }
            self.expire_overdue();
        }
    }

    /// Remove and return the settled result for `action_id`, if any.
    pub fn take_response(&mut self, action_id: &str) -> Option<AmiResult<AmiResponse>> {
        self.completed
            .remove(action_id)
    }

    /// Number of settled results not yet taken.
    pub fn responses_waiting(&self) -> usize {
        self.completed
            .len()
    }

    /// Number of submitted actions still waiting for a response.
    pub fn pending_actions(&self) -> usize {
        self.correlator
            .len()
    }

    /// Fail overdue actions with `Timeout`. Returns how many expired.
    pub fn expire_overdue(&mut self) -> usize {
        let expired = self
            .correlator
            .expire(Instant::now());
        let count = expired.len();
        self.store(expired);
        count
    }

    /// Process whatever bytes are already available, without blocking.
    ///
    /// Returns the number of blocks handled. Also expires overdue actions and
    /// enforces the liveness timeout.
    pub fn pump(&mut self) -> AmiResult<usize> {
        if let ConnectionState::Disconnected(reason) = &self.state {
            return Err(AmiError::connection_lost(reason));
        }
        self.stream
            .set_nonblocking(true)?;
        let mut handled = 0;
        let result = loop {
            match self.read_chunk(None) {
                Ok(Some(n)) => handled += n,
                Ok(None) => break Ok(handled),
                Err(e) => break Err(e),
            }
        };
        if !matches!(self.state, ConnectionState::Disconnected(_)) {
            self.stream
                .set_nonblocking(false)?;
        }
        self.expire_overdue();
        self.check_liveness()?;
        result
    }

    /// Read and dispatch until the connection ends.
    ///
    /// Returns `Ok(())` after a client-requested logoff, the closing error
    /// otherwise.
    pub fn serve_forever(&mut self) -> AmiResult<()> {
        loop {
            if let ConnectionState::Disconnected(reason) = &self.state {
                return match reason {
                    DisconnectReason::ClientRequested => Ok(()),
                    other => Err(AmiError::connection_lost(other)),
                };
            }
            let mut wait = Duration::from_secs(2);
            if let Some(deadline) = self
                .correlator
                .next_deadline()
            {
                wait = wait.min(deadline.saturating_duration_since(Instant::now()));
            }
            match self.read_chunk(Some(wait)) {
                Ok(_) => {}
                Err(AmiError::ConnectionClosed) if self.closing => return Ok(()),
                Err(e) => return Err(e),
            }
            self.expire_overdue();
            self.check_liveness()?;
        }
    }

    /// Send `Logoff` and expect `Response: Goodbye`.
    pub fn logoff(&mut self) -> AmiResult<()> {
        self.closing = true;
        let response = self.send_action(AmiAction::logoff())?;
        match response.status() {
            ResponseStatus::Goodbye => {
                self.state = ConnectionState::Disconnected(DisconnectReason::ClientRequested);
                Ok(())
            }
            other => Err(AmiError::UnexpectedResponse {
                status: other.to_string(),
                message: response
                    .message_text()
                    .unwrap_or_default()
                    .to_string(),
            }),
        }
    }

    /// Log off if still logged in, then close the socket.
    pub fn disconnect(&mut self) -> AmiResult<()> {
        info!("Client requested disconnect");
        if self
            .state
            .is_ready()
        {
            if let Err(e) = self.logoff() {
                debug!("Logoff before disconnect failed: {}", e);
            }
        }
        self.close(DisconnectReason::ClientRequested);
        match self
            .stream
            .shutdown(Shutdown::Both)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(AmiError::Io(e)),
        }
    }

    /// Send `Ping` and wait for the reply.
    pub fn ping(&mut self) -> AmiResult<()> {
        self.send_action(AmiAction::ping())
            .map(|_| ())
    }

    /// Run a CLI command and return its output lines.
    pub fn command(&mut self, command: &str) -> AmiResult<Vec<String>> {
        let response = self
            .send_action(AmiAction::command(command))?;
        Ok(response.command_output())
    }

    /// Read a channel or global variable. `None` when unset.
    pub fn getvar(&mut self, channel: Option<&str>, variable: &str) -> AmiResult<Option<String>> {
        let response = self
            .send_action(AmiAction::getvar(channel, variable))?;
        Ok(response.variable_value(variable))
    }

    /// `Status` for all channels (or one), keyed by channel name.
    pub fn status(
        &mut self,
        channel: Option<&str>,
    ) -> AmiResult<std::collections::BTreeMap<String, AmiEvent>> {
        let response = self
            .send_action(AmiAction::status(channel))?;
        Ok(response.channel_status())
    }

    /// Current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// `true` while logged in.
    pub fn is_connected(&self) -> bool {
        self.state
            .is_ready()
    }

    /// Version from the server banner (e.g. `"1.1"`).
    pub fn banner_version(&self) -> Option<&str> {
        self.parser
            .banner_version()
    }

    /// Underlying socket, for registration with an external poller.
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Read once and process complete blocks.
    ///
    /// `None` timeout means the socket is non-blocking. Returns `Ok(None)`
    /// when no data was available, otherwise the number of blocks handled.
    fn read_chunk(&mut self, wait: Option<Duration>) -> AmiResult<Option<usize>> {
        if let Some(wait) = wait {
            self.stream
                .set_read_timeout(Some(wait.max(MIN_READ_TIMEOUT)))?;
        }
        let bytes_read = match self
            .stream
            .read(&mut self.read_buffer)
        {
            Ok(n) => n,
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(Some(0)),
            Err(e) => {
                warn!("Read error: {}", e);
                self.close(DisconnectReason::IoError(e.to_string()));
                return Err(AmiError::Io(e));
            }
        };

        if bytes_read == 0 {
            if self
                .parser
                .has_partial_block()
            {
                warn!("Discarding incomplete block at EOF");
                self.parser
                    .discard_partial();
            }
            let reason = if self.closing {
                DisconnectReason::ClientRequested
            } else {
                DisconnectReason::ConnectionClosed
            };
            self.close(reason);
            return Err(AmiError::ConnectionClosed);
        }

        trace!("[RECV] Read {} bytes from socket", bytes_read);
        self.last_recv = Instant::now();
        let data = &self.read_buffer[..bytes_read];
        if let Err(e) = self
            .parser
            .add_data(data)
        {
            self.close(DisconnectReason::ProtocolError(e.to_string()));
            return Err(e);
        }
        self.process_buffered()
            .map(Some)
    }

    fn process_buffered(&mut self) -> AmiResult<usize> {
        let mut handled = 0;
        loop {
            let message = match self
                .parser
                .parse_message()
            {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(handled),
                Err(e) => {
                    warn!("Parser error: {}", e);
                    self.close(DisconnectReason::ProtocolError(e.to_string()));
                    return Err(e);
                }
            };
            handled += 1;
            self.handle_message(message)?;
        }
    }

    fn handle_message(&mut self, message: AmiMessage) -> AmiResult<()> {
        match message.kind() {
            MessageKind::Response => {
                let completion = self
                    .correlator
                    .on_response(message);
                self.store(completion);
            }
            MessageKind::Event => match self
                .correlator
                .on_event(message)
            {
                EventRoute::Dispatch(event) => {
                    trace!("[RECV] Event {}", event.name());
                    if let DispatchOutcome::Failed { event, message } =
                        self.dispatcher
                            .dispatch(&event)
                    {
                        if self
                            .options
                            .handler_errors
                            == HandlerErrorPolicy::Disconnect
                        {
                            self.close(DisconnectReason::HandlerFailed(format!(
                                "{}: {}",
                                event, message
                            )));
                            return Err(AmiError::HandlerFailed { event, message });
                        }
                    }
                }
                EventRoute::Collected => {}
                EventRoute::Completed(completion) => self.store([completion]),
            },
            MessageKind::Action | MessageKind::Unknown => {
                debug!("Ignoring unexpected {:?} block", message.kind());
            }
        }
        Ok(())
    }

    fn store(&mut self, completions: impl IntoIterator<Item = Completion<()>>) {
        for completion in completions {
            trace!("Settling action {}", completion.action_id);
            self.completed
                .insert(completion.action_id, completion.result);
        }
    }

    fn check_liveness(&mut self) -> AmiResult<()> {
        let Some(threshold) = self
            .options
            .liveness_timeout
        else {
            return Ok(());
        };
        let elapsed = self
            .last_recv
            .elapsed();
        if !threshold.is_zero() && elapsed > threshold {
            warn!(
                "Liveness timeout: {}ms without traffic (threshold {}ms)",
                elapsed.as_millis(),
                threshold.as_millis()
            );
            self.close(DisconnectReason::HeartbeatExpired);
            return Err(AmiError::connection_lost(DisconnectReason::HeartbeatExpired));
        }
        Ok(())
    }

    fn close(&mut self, reason: DisconnectReason) {
        if matches!(self.state, ConnectionState::Disconnected(_)) {
            return;
        }
        info!("Connection closed: {}", reason);
        let failed = self
            .correlator
            .fail_all(&reason.to_string());
        self.store(failed);
        self.state = ConnectionState::Disconnected(reason);
    }
}

impl EventSubscriber for ManagerSession {
    fn event_dispatcher(&self) -> &SharedDispatcher {
        &self.dispatcher
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for ManagerSession {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.stream
            .as_raw_fd()
    }
}

#[cfg(unix)]
impl std::os::fd::AsFd for ManagerSession {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.stream
            .as_fd()
    }
}
