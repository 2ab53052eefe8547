//! Manager event types and structures

use crate::{
    channel::{ChannelState, ExtensionStatus},
    constants::{HEADER_ACTION_ID, HEADER_EVENT_LIST},
    error::{AmiError, AmiResult},
    headers::ManagerHeader,
    message::{AmiMessage, MessageKind},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned when parsing an unknown event name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventTypeError(pub String);

impl fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}

define_wire_enum! {
    error_type: ParseEventTypeError,
    /// Well-known event names.
    ///
    /// Servers emit many more; unknown names still reach handlers and the
    /// fallback as plain strings. Handler registration always matches the
    /// exact wire name, this enum is only a convenience.
    pub enum AmiEventType {
        FullyBooted => "FullyBooted",
        Shutdown => "Shutdown",
        Reload => "Reload",
        Newchannel => "Newchannel",
        Newstate => "Newstate",
        Newexten => "Newexten",
        Newcallerid => "Newcallerid",
        Rename => "Rename",
        Hangup => "Hangup",
        HangupRequest => "HangupRequest",
        Link => "Link",
        Unlink => "Unlink",
        Bridge => "Bridge",
        BridgeEnter => "BridgeEnter",
        BridgeLeave => "BridgeLeave",
        Dial => "Dial",
        DialBegin => "DialBegin",
        DialEnd => "DialEnd",
        VarSet => "VarSet",
        Dtmf => "DTMF",
        ExtensionStatus => "ExtensionStatus",
        PeerStatus => "PeerStatus",
        Alarm => "Alarm",
        AlarmClear => "AlarmClear",
        Agentcallbacklogin => "Agentcallbacklogin",
        Agentcallbacklogoff => "Agentcallbacklogoff",
        Agentlogin => "Agentlogin",
        Agentlogoff => "Agentlogoff",
        AgentCalled => "AgentCalled",
        MeetmeJoin => "MeetmeJoin",
        MeetmeLeave => "MeetmeLeave",
        MessageWaiting => "MessageWaiting",
        Join => "Join",
        Leave => "Leave",
        QueueCallerJoin => "QueueCallerJoin",
        QueueCallerLeave => "QueueCallerLeave",
        ParkedCall => "ParkedCall",
        ParkedCallsComplete => "ParkedCallsComplete",
        Cdr => "Cdr",
        QueueParams => "QueueParams",
        QueueMember => "QueueMember",
        QueueEntry => "QueueEntry",
        QueueStatusComplete => "QueueStatusComplete",
        QueueStatusEnd => "QueueStatusEnd",
        Status => "Status",
        StatusComplete => "StatusComplete",
    }
}

/// An unsolicited (or list-member) message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiEvent {
    message: AmiMessage,
}

impl AmiEvent {
    /// Wrap a message that carries an `Event` field.
    pub fn from_message(message: AmiMessage) -> AmiResult<Self> {
        if message.kind() != MessageKind::Event {
            return Err(AmiError::protocol_error("message is not an event"));
        }
        Ok(Self { message })
    }

    /// Build an event from a name and fields.
    pub fn new<I, K, V>(name: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut message = AmiMessage::new();
        message.push(ManagerHeader::Event.as_str(), name);
        for (k, v) in fields {
            message.push(k, v);
        }
        Self { message }
    }

    /// Event name exactly as received.
    pub fn name(&self) -> &str {
        self.message
            .event_name()
            .unwrap_or_default()
    }

    /// Parsed event type, if recognized.
    pub fn event_type(&self) -> Option<AmiEventType> {
        self.name()
            .parse()
            .ok()
    }

    /// Check whether this event matches the given type.
    pub fn is_event_type(&self, event_type: AmiEventType) -> bool {
        self.event_type() == Some(event_type)
    }

    /// Look up a field by name (ASCII case-insensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.message
            .get(name)
    }

    /// Every value of a repeated field.
    pub fn header_all(&self, name: impl AsRef<str>) -> Vec<&str> {
        self.message
            .get_all(name)
    }

    /// Underlying message.
    pub fn message(&self) -> &AmiMessage {
        &self.message
    }

    /// Consume into the underlying message.
    pub fn into_message(self) -> AmiMessage {
        self.message
    }

    /// `ActionID` of the action whose list this event belongs to.
    pub fn action_id(&self) -> Option<&str> {
        self.header(HEADER_ACTION_ID)
    }

    /// `true` for the `EventList: Complete` marker event.
    pub fn is_list_complete(&self) -> bool {
        self.header(HEADER_EVENT_LIST)
            .is_some_and(|v| v.eq_ignore_ascii_case("Complete"))
    }

    /// `Privilege` field (e.g. `call,all`).
    pub fn privilege(&self) -> Option<&str> {
        self.header(ManagerHeader::Privilege)
    }

    /// `Channel` field (e.g. `SIP/100-00000001`).
    pub fn channel(&self) -> Option<&str> {
        self.header(ManagerHeader::Channel)
    }

    /// `Uniqueid` field.
    pub fn unique_id(&self) -> Option<&str> {
        self.header(ManagerHeader::Uniqueid)
    }

    /// `CallerIDNum`, falling back to the 1.x `CallerID` field.
    pub fn caller_id_number(&self) -> Option<&str> {
        self.header(ManagerHeader::CallerIdNum)
            .or_else(|| self.header("CallerID"))
    }

    /// `CallerIDName` field.
    pub fn caller_id_name(&self) -> Option<&str> {
        self.header(ManagerHeader::CallerIdName)
    }

    /// Numeric hangup `Cause` (Q.850).
    pub fn hangup_cause(&self) -> Option<u16> {
        self.header(ManagerHeader::Cause)?
            .trim()
            .parse()
            .ok()
    }

    /// `Cause-txt` field (e.g. `Normal Clearing`).
    pub fn hangup_cause_text(&self) -> Option<&str> {
        self.header(ManagerHeader::CauseTxt)
    }

    /// Channel state from `ChannelState`, falling back to the 1.x `State` field.
    pub fn channel_state(&self) -> Option<ChannelState> {
        self.header(ManagerHeader::ChannelState)
            .and_then(ChannelState::from_field)
            .or_else(|| {
                self.header(ManagerHeader::State)
                    .and_then(ChannelState::from_field)
            })
    }

    /// Hint state of an `ExtensionStatus` event.
    pub fn extension_status(&self) -> Option<ExtensionStatus> {
        let code: i32 = self
            .header("Status")?
            .trim()
            .parse()
            .ok()?;
        ExtensionStatus::from_code(code)
    }
}

impl TryFrom<AmiMessage> for AmiEvent {
    type Error = AmiError;

    fn try_from(message: AmiMessage) -> Result<Self, Self::Error> {
        Self::from_message(message)
    }
}
