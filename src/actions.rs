//! Core Manager actions: typed constructors, result decoding and the
//! [`CoreActions`] capability available on any [`ActionSender`].

use crate::{
    channel::ExtensionStatus,
    command::{AmiAction, AmiResponse, ResponseStatus},
    constants::{HEADER_ACTION_ID, HEADER_MESSAGE, HEADER_RESPONSE, NULL_VALUE},
    error::{AmiError, AmiResult},
    event::{AmiEvent, AmiEventType},
    headers::ManagerHeader,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

impl AmiAction {
    /// `Login`. With `events == false` the server is asked not to send events.
    pub fn login(username: &str, secret: &str, events: bool) -> Self {
        let action = AmiAction::new("Login")
            .field(ManagerHeader::Username.as_str(), username)
            .field(ManagerHeader::Secret.as_str(), secret);
        if events {
            action
        } else {
            action.field(ManagerHeader::Events.as_str(), "off")
        }
    }

    /// `Logoff`; the server answers `Response: Goodbye` and closes.
    pub fn logoff() -> Self {
        AmiAction::new("Logoff")
    }

    /// `Ping` keepalive.
    pub fn ping() -> Self {
        AmiAction::new("Ping")
    }

    /// `Command`: run a CLI command.
    pub fn command(command: &str) -> Self {
        AmiAction::new("Command").field(ManagerHeader::Command.as_str(), command)
    }

    /// `Events`: `"on"`, `"off"` or a comma-separated class list (`"call,system"`).
    pub fn events(mask: &str) -> Self {
        AmiAction::new("Events").field(ManagerHeader::EventMask.as_str(), mask)
    }

    /// `Hangup` a channel.
    pub fn hangup(channel: &str) -> Self {
        AmiAction::new("Hangup").field(ManagerHeader::Channel.as_str(), channel)
    }

    /// `Getvar`; without a channel, reads a global variable.
    pub fn getvar(channel: Option<&str>, variable: &str) -> Self {
        AmiAction::new("Getvar")
            .field_opt(ManagerHeader::Channel.as_str(), channel)
            .field(ManagerHeader::Variable.as_str(), variable)
    }

    /// `Setvar`; without a channel, sets a global variable.
    pub fn setvar(channel: Option<&str>, variable: &str, value: &str) -> Self {
        AmiAction::new("Setvar")
            .field_opt(ManagerHeader::Channel.as_str(), channel)
            .field(ManagerHeader::Variable.as_str(), variable)
            .field(ManagerHeader::Value.as_str(), value)
    }

    /// `AbsoluteTimeout`: hang the channel up after `timeout`.
    pub fn absolute_timeout(channel: &str, timeout: Duration) -> Self {
        AmiAction::new("AbsoluteTimeout")
            .field(ManagerHeader::Channel.as_str(), channel)
            .field(
                ManagerHeader::Timeout.as_str(),
                timeout
                    .as_secs()
                    .to_string(),
            )
    }

    /// `Monitor`: start recording a channel.
    pub fn monitor(channel: &str, file: &str, format: Option<&str>, mix: bool) -> Self {
        AmiAction::new("Monitor")
            .field(ManagerHeader::Channel.as_str(), channel)
            .field("File", file)
            .field("Format", format.unwrap_or("wav"))
            .field("Mix", if mix { "1" } else { "0" })
    }

    /// `ChangeMonitor`: change the recording file of a monitored channel.
    pub fn change_monitor(channel: &str, file: &str) -> Self {
        AmiAction::new("ChangeMonitor")
            .field(ManagerHeader::Channel.as_str(), channel)
            .field("File", file)
    }

    /// `StopMonitor`.
    pub fn stop_monitor(channel: &str) -> Self {
        AmiAction::new("StopMonitor").field(ManagerHeader::Channel.as_str(), channel)
    }

    /// `ExtensionState`: hint state of `exten@context`.
    pub fn extension_state(exten: &str, context: &str) -> Self {
        AmiAction::new("ExtensionState")
            .field(ManagerHeader::Exten.as_str(), exten)
            .field(ManagerHeader::Context.as_str(), context)
    }

    /// `MailboxCount`: new and old message counts.
    pub fn mailbox_count(mailbox: &str) -> Self {
        AmiAction::new("MailboxCount").field(ManagerHeader::Mailbox.as_str(), mailbox)
    }

    /// `MailboxStatus`: whether messages are waiting.
    pub fn mailbox_status(mailbox: &str) -> Self {
        AmiAction::new("MailboxStatus").field(ManagerHeader::Mailbox.as_str(), mailbox)
    }

    /// `ListCommands`.
    pub fn list_commands() -> Self {
        AmiAction::new("ListCommands")
    }

    /// `ParkedCalls`; one `ParkedCall` event per call.
    pub fn parked_calls() -> Self {
        AmiAction::new("ParkedCalls").expects_event_list(AmiEventType::ParkedCallsComplete.as_str())
    }

    /// `QueueAdd`: add a member interface to a queue.
    pub fn queue_add(queue: &str, interface: &str, penalty: u32) -> Self {
        AmiAction::new("QueueAdd")
            .field(ManagerHeader::Queue.as_str(), queue)
            .field(ManagerHeader::Interface.as_str(), interface)
            .field("Penalty", penalty.to_string())
    }

    /// `QueueRemove`.
    pub fn queue_remove(queue: &str, interface: &str) -> Self {
        AmiAction::new("QueueRemove")
            .field(ManagerHeader::Queue.as_str(), queue)
            .field(ManagerHeader::Interface.as_str(), interface)
    }

    /// `QueueStatus`; `QueueParams`, `QueueMember` and `QueueEntry` events.
    pub fn queue_status() -> Self {
        AmiAction::new("QueueStatus")
            .expects_event_list(AmiEventType::QueueStatusComplete.as_str())
            .or_completed_by(AmiEventType::QueueStatusEnd.as_str())
    }

    /// `Redirect` a channel (and optionally its bridged peer) to `exten@context:priority`.
    pub fn redirect(
        channel: &str,
        context: &str,
        exten: &str,
        priority: u32,
        extra_channel: Option<&str>,
    ) -> Self {
        AmiAction::new("Redirect")
            .field(ManagerHeader::Channel.as_str(), channel)
            .field_opt(ManagerHeader::ExtraChannel.as_str(), extra_channel)
            .field(ManagerHeader::Context.as_str(), context)
            .field(ManagerHeader::Exten.as_str(), exten)
            .field(ManagerHeader::Priority.as_str(), priority.to_string())
    }

    /// `SetCDRUserField`.
    pub fn set_cdr_user_field(channel: &str, user_field: &str, append: bool) -> Self {
        let action = AmiAction::new("SetCDRUserField")
            .field(ManagerHeader::Channel.as_str(), channel)
            .field("UserField", user_field);
        if append {
            action.field("Append", "true")
        } else {
            action
        }
    }

    /// `Status`; one `Status` event per channel.
    pub fn status(channel: Option<&str>) -> Self {
        AmiAction::new("Status")
            .field_opt(ManagerHeader::Channel.as_str(), channel)
            .expects_event_list(AmiEventType::StatusComplete.as_str())
    }
}

/// Where an originated call is connected once the channel answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginateTarget {
    /// Continue in the dialplan.
    Extension {
        /// Dialplan context.
        context: String,
        /// Extension.
        exten: String,
        /// Priority.
        priority: u32,
    },
    /// Run a single application.
    Application {
        /// Application name (e.g. `Playback`).
        application: String,
        /// Application arguments.
        data: Option<String>,
    },
}

/// `Originate` builder.
///
/// ```
/// use asterisk_manager_tokio::Originate;
/// use std::time::Duration;
///
/// let action = Originate::extension("SIP/100", "default", "200", 1)
///     .caller_id("Reception <100>")
///     .timeout(Duration::from_secs(30))
///     .variable("CAMPAIGN", "spring")
///     .run_async(true)
///     .into_action();
/// assert_eq!(action.get("Timeout"), Some("30000"));
/// assert_eq!(action.get("Async"), Some("true"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Originate {
    channel: String,
    target: OriginateTarget,
    timeout: Option<Duration>,
    caller_id: Option<String>,
    variables: Vec<(String, String)>,
    account: Option<String>,
    run_async: bool,
}

impl Originate {
    /// Dial `channel`, then continue at `exten@context:priority`.
    pub fn extension(channel: &str, context: &str, exten: &str, priority: u32) -> Self {
        Self::new(
            channel,
            OriginateTarget::Extension {
                context: context.to_string(),
                exten: exten.to_string(),
                priority,
            },
        )
    }

    /// Dial `channel`, then run `application(data)`.
    pub fn application(channel: &str, application: &str, data: Option<&str>) -> Self {
        Self::new(
            channel,
            OriginateTarget::Application {
                application: application.to_string(),
                data: data.map(str::to_string),
            },
        )
    }

    /// Dial `channel` toward an explicit target.
    pub fn new(channel: &str, target: OriginateTarget) -> Self {
        Self {
            channel: channel.to_string(),
            target,
            timeout: None,
            caller_id: None,
            variables: Vec::new(),
            account: None,
            run_async: false,
        }
    }

    /// How long to wait for the channel to answer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Caller ID presented on the dialed channel.
    pub fn caller_id(mut self, caller_id: &str) -> Self {
        self.caller_id = Some(caller_id.to_string());
        self
    }

    /// Channel variable; each one becomes its own `Variable` field.
    pub fn variable(mut self, name: &str, value: &str) -> Self {
        self.variables
            .push((name.to_string(), value.to_string()));
        self
    }

    /// CDR account code.
    pub fn account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    /// Answer immediately and report the outcome through events.
    pub fn run_async(mut self, run_async: bool) -> Self {
        self.run_async = run_async;
        self
    }

    /// Build the `Originate` action.
    pub fn into_action(self) -> AmiAction {
        let mut action = AmiAction::new("Originate").field(ManagerHeader::Channel.as_str(), self.channel);
        action = match self.target {
            OriginateTarget::Extension {
                context,
                exten,
                priority,
            } => action
                .field(ManagerHeader::Context.as_str(), context)
                .field(ManagerHeader::Exten.as_str(), exten)
                .field(ManagerHeader::Priority.as_str(), priority.to_string()),
            OriginateTarget::Application { application, data } => action
                .field("Application", application)
                .field_opt("Data", data),
        };
        if let Some(timeout) = self.timeout {
            action = action.field(
                ManagerHeader::Timeout.as_str(),
                timeout
                    .as_millis()
                    .to_string(),
            );
        }
        action = action
            .field_opt("CallerID", self.caller_id)
            .field_opt("Account", self.account);
        for (name, value) in self.variables {
            action = action.field(ManagerHeader::Variable.as_str(), format!("{}={}", name, value));
        }
        if self.run_async {
            action = action.field("Async", "true");
        }
        action
    }
}

impl From<Originate> for AmiAction {
    fn from(originate: Originate) -> Self {
        originate.into_action()
    }
}

/// Result of `MailboxCount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxCount {
    /// Unheard messages.
    pub new_messages: u32,
    /// Saved messages.
    pub old_messages: u32,
}

/// Members and callers of one queue from `QueueStatus`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// The queue's `QueueParams` event.
    pub params: Option<AmiEvent>,
    /// `QueueMember` events by member location.
    pub members: BTreeMap<String, AmiEvent>,
    /// `QueueEntry` events (waiting callers), in position order.
    pub entries: Vec<AmiEvent>,
}

fn parse_count(response: &AmiResponse, name: &str) -> AmiResult<u32> {
    let raw = response
        .header(name)
        .ok_or_else(|| AmiError::protocol_error(format!("response missing {}", name)))?;
    raw.trim()
        .parse()
        .map_err(|_| AmiError::protocol_error(format!("invalid {}: {:?}", name, raw)))
}

impl AmiResponse {
    /// Variable value of a `Getvar` reply. `(null)` means unset.
    ///
    /// Reads the `Value` field, or a field named after the variable as 1.x
    /// servers send it.
    pub fn variable_value(&self, variable: &str) -> Option<String> {
        let value = self
            .header(ManagerHeader::Value)
            .or_else(|| self.header(variable))?;
        if value == NULL_VALUE {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Decode a `MailboxCount` reply.
    pub fn mailbox_count(&self) -> AmiResult<MailboxCount> {
        Ok(MailboxCount {
            new_messages: parse_count(self, "NewMessages")?,
            old_messages: parse_count(self, "OldMessages")?,
        })
    }

    /// Decode a `MailboxStatus` reply.
    pub fn mailbox_waiting(&self) -> AmiResult<bool> {
        Ok(parse_count(self, "Waiting")? != 0)
    }

    /// Decode an `ExtensionState` reply.
    pub fn extension_status(&self) -> AmiResult<ExtensionStatus> {
        let raw = self
            .header("Status")
            .ok_or_else(|| AmiError::protocol_error("response missing Status"))?;
        raw.trim()
            .parse::<i32>()
            .ok()
            .and_then(ExtensionStatus::from_code)
            .ok_or_else(|| AmiError::protocol_error(format!("invalid extension status {:?}", raw)))
    }

    /// Command names and descriptions from a `ListCommands` reply.
    pub fn command_list(&self) -> BTreeMap<String, String> {
        self.message()
            .iter()
            .filter(|(k, _)| {
                ![HEADER_RESPONSE, HEADER_ACTION_ID, HEADER_MESSAGE]
                    .iter()
                    .any(|skip| skip.eq_ignore_ascii_case(k))
            })
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// `Status` events by channel name.
    pub fn channel_status(&self) -> BTreeMap<String, AmiEvent> {
        self.events()
            .iter()
            .filter_map(|event| {
                event
                    .channel()
                    .map(|channel| (channel.to_string(), event.clone()))
            })
            .collect()
    }

    /// `QueueStatus` events grouped by queue name.
    pub fn queue_status(&self) -> BTreeMap<String, QueueStatus> {
        let mut queues: BTreeMap<String, QueueStatus> = BTreeMap::new();
        for event in self.events() {
            let Some(queue) = event.header(ManagerHeader::Queue) else {
                continue;
            };
            let entry = queues
                .entry(queue.to_string())
                .or_default();
            match event.event_type() {
                Some(AmiEventType::QueueParams) => entry.params = Some(event.clone()),
                Some(AmiEventType::QueueMember) => {
                    let key = event
                        .header(ManagerHeader::Location)
                        .or_else(|| event.header(ManagerHeader::Interface))
                        .or_else(|| event.header("Name"))
                        .unwrap_or_default()
                        .to_string();
                    entry
                        .members
                        .insert(key, event.clone());
                }
                Some(AmiEventType::QueueEntry) => entry
                    .entries
                    .push(event.clone()),
                _ => {}
            }
        }
        queues
    }
}

/// Anything that can send an action and await its settled response.
///
/// The response has already been through [`AmiResponse::into_result`]: an
/// `Ok` is `Success`, `Follows` or `Goodbye`.
pub trait ActionSender: Sync {
    /// Send `action` and wait for its response (and event list, if any).
    fn send_action(&self, action: AmiAction)
        -> impl Future<Output = AmiResult<AmiResponse>> + Send;
}

/// Typed wrappers for the core Manager actions.
///
/// Implemented for every [`ActionSender`]; bring the trait into scope to use
/// them.
pub trait CoreActions: ActionSender {
    /// `Ping`.
    fn ping(&self) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::ping())
                .await
                .map(|_| ())
        }
    }

    /// `Logoff`, requiring `Response: Goodbye`.
    fn logoff(&self) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            let response = self
                .send_action(AmiAction::logoff())
                .await?;
            match response.status() {
                ResponseStatus::Goodbye => Ok(()),
                other => Err(AmiError::UnexpectedResponse {
                    status: other.to_string(),
                    message: response
                        .message_text()
                        .unwrap_or_default()
                        .to_string(),
                }),
            }
        }
    }

    /// `Command`: CLI output lines.
    fn command(&self, command: &str) -> impl Future<Output = AmiResult<Vec<String>>> + Send {
        async move {
            let response = self
                .send_action(AmiAction::command(command))
                .await?;
            Ok(response.command_output())
        }
    }

    /// `Events`: change the event mask. Succeeds once the server accepts it.
    fn events(&self, mask: &str) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::events(mask))
                .await
                .map(|_| ())
        }
    }

    /// `Getvar`: `None` when unset.
    fn getvar(
        &self,
        channel: Option<&str>,
        variable: &str,
    ) -> impl Future<Output = AmiResult<Option<String>>> + Send {
        async move {
            let response = self
                .send_action(AmiAction::getvar(channel, variable))
                .await?;
            Ok(response.variable_value(variable))
        }
    }

    /// `Setvar`.
    fn setvar(
        &self,
        channel: Option<&str>,
        variable: &str,
        value: &str,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::setvar(channel, variable, value))
                .await
                .map(|_| ())
        }
    }

    /// `Hangup`.
    fn hangup(&self, channel: &str) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::hangup(channel))
                .await
                .map(|_| ())
        }
    }

    /// `Originate`.
    fn originate(&self, originate: Originate) -> impl Future<Output = AmiResult<AmiResponse>> + Send {
        async move {
            self.send_action(originate.into_action())
                .await
        }
    }

    /// `Redirect`.
    fn redirect(
        &self,
        channel: &str,
        context: &str,
        exten: &str,
        priority: u32,
        extra_channel: Option<&str>,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::redirect(
                channel,
                context,
                exten,
                priority,
                extra_channel,
            ))
            .await
            .map(|_| ())
        }
    }

    /// `AbsoluteTimeout`.
    fn absolute_timeout(
        &self,
        channel: &str,
        timeout: Duration,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::absolute_timeout(channel, timeout))
                .await
                .map(|_| ())
        }
    }

    /// `Monitor`.
    fn monitor(
        &self,
        channel: &str,
        file: &str,
        format: Option<&str>,
        mix: bool,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::monitor(channel, file, format, mix))
                .await
                .map(|_| ())
        }
    }

    /// `ChangeMonitor`.
    fn change_monitor(&self, channel: &str, file: &str) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::change_monitor(channel, file))
                .await
                .map(|_| ())
        }
    }

    /// `StopMonitor`.
    fn stop_monitor(&self, channel: &str) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::stop_monitor(channel))
                .await
                .map(|_| ())
        }
    }

    /// `ExtensionState`.
    fn extension_state(
        &self,
        exten: &str,
        context: &str,
    ) -> impl Future<Output = AmiResult<ExtensionStatus>> + Send {
        async move {
            self.send_action(AmiAction::extension_state(exten, context))
                .await?
                .extension_status()
        }
    }

    /// `MailboxCount`.
    fn mailbox_count(&self, mailbox: &str) -> impl Future<Output = AmiResult<MailboxCount>> + Send {
        async move {
            self.send_action(AmiAction::mailbox_count(mailbox))
                .await?
                .mailbox_count()
        }
    }

    /// `MailboxStatus`: whether messages are waiting.
    fn mailbox_status(&self, mailbox: &str) -> impl Future<Output = AmiResult<bool>> + Send {
        async move {
            self.send_action(AmiAction::mailbox_status(mailbox))
                .await?
                .mailbox_waiting()
        }
    }

    /// `ListCommands`.
    fn list_commands(&self) -> impl Future<Output = AmiResult<BTreeMap<String, String>>> + Send {
        async move {
            Ok(self
                .send_action(AmiAction::list_commands())
                .await?
                .command_list())
        }
    }

    /// `ParkedCalls`: one event per parked call.
    fn parked_calls(&self) -> impl Future<Output = AmiResult<Vec<AmiEvent>>> + Send {
        async move {
            Ok(self
                .send_action(AmiAction::parked_calls())
                .await?
                .into_events())
        }
    }

    /// `QueueAdd`.
    fn queue_add(
        &self,
        queue: &str,
        interface: &str,
        penalty: u32,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::queue_add(queue, interface, penalty))
                .await
                .map(|_| ())
        }
    }

    /// `QueueRemove`.
    fn queue_remove(&self, queue: &str, interface: &str) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::queue_remove(queue, interface))
                .await
                .map(|_| ())
        }
    }

    /// `QueueStatus`, grouped by queue.
    fn queue_status(
        &self,
    ) -> impl Future<Output = AmiResult<BTreeMap<String, QueueStatus>>> + Send {
        async move {
            Ok(self
                .send_action(AmiAction::queue_status())
                .await?
                .queue_status())
        }
    }

    /// `SetCDRUserField`.
    fn set_cdr_user_field(
        &self,
        channel: &str,
        user_field: &str,
        append: bool,
    ) -> impl Future<Output = AmiResult<()>> + Send {
        async move {
            self.send_action(AmiAction::set_cdr_user_field(channel, user_field, append))
                .await
                .map(|_| ())
        }
    }

    /// `Status`: channel states by channel name.
    fn status(
        &self,
        channel: Option<&str>,
    ) -> impl Future<Output = AmiResult<BTreeMap<String, AmiEvent>>> + Send {
        async move {
            Ok(self
                .send_action(AmiAction::status(channel))
                .await?
                .channel_status())
        }
    }
}

impl<T: ActionSender> CoreActions for T {}
