//! Action encoding and response handling

use crate::{
    constants::{
        HEADER_ACTION, HEADER_ACTION_ID, HEADER_MESSAGE, LINE_TERMINATOR,
        MESSAGE_PERMISSION_DENIED,
    },
    error::{AmiError, AmiResult},
    event::AmiEvent,
    headers::ManagerHeader,
    message::{validate_no_newlines, write_field, AmiMessage},
};
use std::fmt;

/// A client-to-server request.
///
/// Fields keep insertion order; repeated names (e.g. several `Variable`
/// fields on `Originate`) are sent as separate lines. Nothing is validated
/// until [`to_wire_format`](Self::to_wire_format).
///
/// ```
/// use asterisk_manager_tokio::AmiAction;
///
/// let wire = AmiAction::new("Hangup")
///     .with_action_id("42")
///     .field("Channel", "SIP/100-00000001")
///     .to_wire_format()
///     .unwrap();
/// assert_eq!(
///     wire,
///     "Action: Hangup\r\nActionID: 42\r\nChannel: SIP/100-00000001\r\n\r\n"
/// );
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct AmiAction {
    name: String,
    action_id: Option<String>,
    fields: Vec<(String, String)>,
    completion_events: Vec<String>,
}

impl AmiAction {
    /// New action with the given `Action` name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action_id: None,
            fields: Vec::new(),
            completion_events: Vec::new(),
        }
    }

    /// Use a caller-chosen `ActionID` instead of a generated one.
    pub fn with_action_id(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    /// Append a field. An `ActionID` field sets the action id instead.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(name, value);
        self
    }

    /// Append a field only when `value` is `Some`.
    pub fn field_opt(self, name: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// In-place variant of [`field`](Self::field).
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if name.eq_ignore_ascii_case(HEADER_ACTION_ID) {
            self.action_id = Some(value.into());
        } else {
            self.fields
                .push((name, value.into()));
        }
    }

    /// The response is followed by a list of events ending with `completion_event`
    /// (or any event carrying `EventList: Complete`).
    ///
    /// The caller receives the response only after the list is complete, with
    /// the member events attached.
    pub fn expects_event_list(mut self, completion_event: impl Into<String>) -> Self {
        self.completion_events = vec![completion_event.into()];
        self
    }

    /// Accept `completion_event` as another name for the list terminator.
    ///
    /// Has no effect unless [`expects_event_list`](Self::expects_event_list)
    /// was called first.
    pub fn or_completed_by(mut self, completion_event: impl Into<String>) -> Self {
        if !self
            .completion_events
            .is_empty()
        {
            self.completion_events
                .push(completion_event.into());
        }
        self
    }

    /// `Action` name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assigned `ActionID`, if any.
    pub fn action_id(&self) -> Option<&str> {
        self.action_id
            .as_deref()
    }

    pub(crate) fn set_action_id(&mut self, action_id: impl Into<String>) {
        self.action_id = Some(action_id.into());
    }

    /// Fields other than `Action` and `ActionID`, in order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First value of the named field.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Name of the event that terminates this action's event list.
    pub fn completion_event(&self) -> Option<&str> {
        self.completion_events
            .first()
            .map(String::as_str)
    }

    /// Every event name accepted as the list terminator.
    pub fn completion_events(&self) -> &[String] {
        &self.completion_events
    }

    /// Convert to wire format.
    ///
    /// Rejects CR/LF anywhere in names or values, empty field names, and an
    /// explicit `Action` field (the action name is set through [`new`](Self::new)).
    pub fn to_wire_format(&self) -> AmiResult<String> {
        validate_no_newlines(&self.name, "action name")?;
        if self
            .name
            .trim()
            .is_empty()
        {
            return Err(AmiError::validation("action name must not be empty"));
        }

        let mut out = String::new();
        write_field(&mut out, HEADER_ACTION, &self.name)?;
        if let Some(id) = &self.action_id {
            write_field(&mut out, HEADER_ACTION_ID, id)?;
        }
        for (name, value) in &self.fields {
            if name.eq_ignore_ascii_case(HEADER_ACTION) {
                return Err(AmiError::validation(
                    "Action must be set through the action name",
                ));
            }
            write_field(&mut out, name, value)?;
        }
        out.push_str(LINE_TERMINATOR);
        Ok(out)
    }

    /// The action as a generic message.
    pub fn to_message(&self) -> AmiMessage {
        let mut message = AmiMessage::new();
        message.push(HEADER_ACTION, self.name.as_str());
        if let Some(id) = &self.action_id {
            message.push(HEADER_ACTION_ID, id.as_str());
        }
        for (k, v) in &self.fields {
            message.push(k.as_str(), v.as_str());
        }
        message
    }
}

impl fmt::Debug for AmiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = ManagerHeader::Secret.as_str();
        let fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(secret) {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("AmiAction")
            .field("name", &self.name)
            .field("action_id", &self.action_id)
            .field("fields", &fields)
            .field("completion_events", &self.completion_events)
            .finish()
    }
}

/// `Response` field classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseStatus {
    /// `Response: Success`
    Success,
    /// `Response: Error`
    Error,
    /// `Response: Follows`, with a free-text payload.
    Follows,
    /// `Response: Goodbye`, the answer to `Logoff`.
    Goodbye,
    /// Any other value (or none).
    Other(String),
}

impl ResponseStatus {
    /// Classify a `Response` value (ASCII case-insensitive).
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("Success") {
            ResponseStatus::Success
        } else if value.eq_ignore_ascii_case("Error") {
            ResponseStatus::Error
        } else if value.eq_ignore_ascii_case("Follows") {
            ResponseStatus::Follows
        } else if value.eq_ignore_ascii_case("Goodbye") {
            ResponseStatus::Goodbye
        } else {
            ResponseStatus::Other(value.to_string())
        }
    }

    /// Wire text.
    pub fn as_str(&self) -> &str {
        match self {
            ResponseStatus::Success => "Success",
            ResponseStatus::Error => "Error",
            ResponseStatus::Follows => "Follows",
            ResponseStatus::Goodbye => "Goodbye",
            ResponseStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server reply to an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmiResponse {
    message: AmiMessage,
    status: ResponseStatus,
    events: Vec<AmiEvent>,
}

impl AmiResponse {
    /// `ResponseStatus` is derived from the `Response` field.
    pub fn new(message: AmiMessage) -> Self {
        let status = ResponseStatus::parse(
            message
                .response_status()
                .unwrap_or_default(),
        );
        Self {
            message,
            status,
            events: Vec::new(),
        }
    }

    /// Classified `Response` field.
    pub fn status(&self) -> &ResponseStatus {
        &self.status
    }

    /// `true` for `Success` and `Follows`.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            ResponseStatus::Success | ResponseStatus::Follows
        )
    }

    /// `Message` field, if present.
    pub fn message_text(&self) -> Option<&str> {
        self.message
            .get(HEADER_MESSAGE)
    }

    /// `ActionID` echoed by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.message
            .action_id()
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

    /// Free-text payload of a `Follows` response.
    pub fn payload(&self) -> Option<&[String]> {
        self.message
            .payload()
    }

    /// Output lines of a `Command` action.
    ///
    /// Older servers answer with a `Follows` payload; newer ones send
    /// `Response: Success` with one `Output` field per line.
    pub fn command_output(&self) -> Vec<String> {
        match self.payload() {
            Some(lines) => lines.to_vec(),
            None => self
                .header_all(ManagerHeader::Output)
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Events collected for an event-list action, completion event excluded.
    pub fn events(&self) -> &[AmiEvent] {
        &self.events
    }

    /// Consume into the collected events.
    pub fn into_events(self) -> Vec<AmiEvent> {
        self.events
    }

    pub(crate) fn push_event(&mut self, event: AmiEvent) {
        self.events
            .push(event);
    }

    /// Convert to `Result`, mapping error statuses to [`AmiError`].
    ///
    /// `Success`, `Follows` and `Goodbye` pass through. `Error` becomes
    /// [`AmiError::PermissionDenied`] for the server's "Permission denied"
    /// reply and [`AmiError::ActionFailed`] otherwise. Anything else is
    /// [`AmiError::UnexpectedResponse`].
    ///
    /// ```
    /// # use asterisk_manager_tokio::{AmiMessage, AmiResponse, AmiError};
    /// let msg = AmiMessage::from_fields([("Response", "Error"), ("Message", "No such channel")]);
    /// let err = AmiResponse::new(msg).into_result().unwrap_err();
    /// assert!(matches!(err, AmiError::ActionFailed { .. }));
    /// ```
    pub fn into_result(self) -> AmiResult<Self> {
        match &self.status {
            ResponseStatus::Success | ResponseStatus::Follows | ResponseStatus::Goodbye => Ok(self),
            ResponseStatus::Error => {
                let message = self
                    .message_text()
                    .unwrap_or_default()
                    .to_string();
                if message.eq_ignore_ascii_case(MESSAGE_PERMISSION_DENIED) {
                    Err(AmiError::PermissionDenied)
                } else {
                    Err(AmiError::ActionFailed { message })
                }
            }
            ResponseStatus::Other(status) => Err(AmiError::UnexpectedResponse {
                status: status.clone(),
                message: self
                    .message_text()
                    .unwrap_or_default()
                    .to_string(),
            }),
        }
    }
}
