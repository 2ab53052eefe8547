//! Ordered, case-insensitive Manager message model and its wire encoding.

use crate::{
    constants::{
        FOLLOWS_SENTINEL, HEADER_ACTION, HEADER_ACTION_ID, HEADER_EVENT, HEADER_RESPONSE,
        LINE_TERMINATOR,
    },
    error::{AmiError, AmiResult},
};
use serde::{Deserialize, Serialize};

/// How a decoded block is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Carries a `Response` field (reply to an action).
    Response,
    /// Carries an `Event` field and no `Response` field.
    Event,
    /// Carries an `Action` field (client to server).
    Action,
    /// None of the classifying fields are present.
    Unknown,
}

/// One Manager block: fields in wire order plus an optional free-text payload.
///
/// Field names compare ASCII case-insensitively but keep their original
/// casing for re-emission. Repeated names (`Variable`, `Output`, ...) are kept
/// as separate entries in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiMessage {
    fields: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Vec<String>>,
}

impl AmiMessage {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, keeping their order.
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            payload: None,
        }
    }

    /// First value of the named field.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the named field, in arrival order.
    pub fn get_all(&self, name: impl AsRef<str>) -> Vec<&str> {
        let name = name.as_ref();
        self.fields
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether the named field is present.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.get(name)
            .is_some()
    }

    /// Append a field, keeping any existing values with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields
            .push((name.into(), value.into()));
    }

    /// Replace every occurrence of the named field with a single value.
    ///
    /// The value takes the position of the first occurrence, or is appended.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(&name))
        {
            Some(first) => {
                self.fields[first].1 = value;
                let mut index = 0;
                self.fields
                    .retain(|(k, _)| {
                        let keep = index <= first || !k.eq_ignore_ascii_case(&name);
                        index += 1;
                        keep
                    });
            }
            None => self.push(name, value),
        }
    }

    /// Remove every occurrence of the named field, returning the values.
    pub fn remove(&mut self, name: impl AsRef<str>) -> Vec<String> {
        let name = name.as_ref();
        let mut removed = Vec::new();
        self.fields
            .retain(|(k, v)| {
                if k.eq_ignore_ascii_case(name) {
                    removed.push(v.clone());
                    false
                } else {
                    true
                }
            });
        removed
    }

    /// All fields in wire order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Iterate `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields
            .len()
    }

    /// `true` when there are no fields and no payload.
    pub fn is_empty(&self) -> bool {
        self.fields
            .is_empty()
            && self
                .payload
                .is_none()
    }

    /// Free-text lines of a `Response: Follows` block.
    pub fn payload(&self) -> Option<&[String]> {
        self.payload
            .as_deref()
    }

    /// Attach a free-text payload.
    pub fn set_payload(&mut self, lines: Vec<String>) {
        self.payload = Some(lines);
    }

    /// Classify by the presence of `Response`, `Event` or `Action`.
    pub fn kind(&self) -> MessageKind {
        if self.contains(HEADER_RESPONSE) {
            MessageKind::Response
        } else if self.contains(HEADER_EVENT) {
            MessageKind::Event
        } else if self.contains(HEADER_ACTION) {
            MessageKind::Action
        } else {
            MessageKind::Unknown
        }
    }

    /// `ActionID` field.
    pub fn action_id(&self) -> Option<&str> {
        self.get(HEADER_ACTION_ID)
    }

    /// `Response` field (`Success`, `Error`, `Follows`, ...).
    pub fn response_status(&self) -> Option<&str> {
        self.get(HEADER_RESPONSE)
    }

    /// `Event` field.
    pub fn event_name(&self) -> Option<&str> {
        self.get(HEADER_EVENT)
    }

    /// Serialize into a CRLF block terminated by a blank line.
    ///
    /// A payload is emitted after the fields, followed by the
    /// `--END COMMAND--` sentinel line.
    pub fn to_wire_format(&self) -> AmiResult<String> {
        let mut out = String::new();
        for (name, value) in &self.fields {
            write_field(&mut out, name, value)?;
        }
        if let Some(lines) = &self.payload {
            for line in lines {
                validate_no_newlines(line, "payload line")?;
                if line
                    .trim_end()
                    .ends_with(FOLLOWS_SENTINEL)
                {
                    return Err(AmiError::validation(
                        "payload line must not end with the command sentinel",
                    ));
                }
                out.push_str(line);
                out.push_str(LINE_TERMINATOR);
            }
            out.push_str(FOLLOWS_SENTINEL);
            out.push_str(LINE_TERMINATOR);
        }
        out.push_str(LINE_TERMINATOR);
        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AmiMessage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_fields(iter)
    }
}

/// Reject text that would break CRLF framing.
pub(crate) fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::validation(format!(
            "{} must not contain CR or LF",
            context
        )));
    }
    Ok(())
}

/// Reject field names that cannot round-trip through `Key: Value` framing.
pub(crate) fn validate_field_name(name: &str) -> AmiResult<()> {
    validate_no_newlines(name, "field name")?;
    if name
        .trim()
        .is_empty()
    {
        return Err(AmiError::validation("field name must not be empty"));
    }
    if name.contains(':') {
        return Err(AmiError::validation(format!(
            "field name {:?} must not contain ':'",
            name
        )));
    }
    if name.trim() != name {
        return Err(AmiError::validation(format!(
            "field name {:?} must not have surrounding whitespace",
            name
        )));
    }
    Ok(())
}

/// Append one validated `Name: Value` line.
pub(crate) fn write_field(out: &mut String, name: &str, value: &str) -> AmiResult<()> {
    validate_field_name(name)?;
    validate_no_newlines(value, name)?;
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str(LINE_TERMINATOR);
    Ok(())
}

/// Split a `Name: Value` line. `None` when there is no colon or no name.
pub(crate) fn decode_field_line(line: &str) -> Option<(String, String)> {
    let colon = line.find(':')?;
    let name = line[..colon].trim();
    if name.is_empty() {
        return None;
    }
    let value = line[colon + 1..].trim();
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hangup() -> AmiMessage {
        AmiMessage::from_fields([
            ("Event", "Hangup"),
            ("Channel", "SIP/100-1"),
            ("Cause", "16"),
        ])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let msg = hangup();
        assert_eq!(msg.get("channel"), Some("SIP/100-1"));
        assert_eq!(msg.get("CAUSE"), Some("16"));
        assert_eq!(msg.get("Missing"), None);
        assert_eq!(msg.event_name(), Some("Hangup"));
    }

    #[test]
    fn test_original_casing_preserved() {
        let msg = AmiMessage::from_fields([("actionid", "7")]);
        assert_eq!(msg.action_id(), Some("7"));
        assert_eq!(msg.fields()[0].0, "actionid");
        assert_eq!(
            msg.to_wire_format()
                .unwrap(),
            "actionid: 7\r\n\r\n"
        );
    }

    #[test]
    fn test_repeated_fields_accumulate() {
        let mut msg = AmiMessage::new();
        msg.push("Action", "Originate");
        msg.push("Variable", "a=1");
        msg.push("Variable", "b=2");
        msg.push("variable", "c=3");
        assert_eq!(msg.get_all("Variable"), vec!["a=1", "b=2", "c=3"]);
        assert_eq!(msg.get("Variable"), Some("a=1"));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn test_set_replaces_all_occurrences_in_place() {
        let mut msg = AmiMessage::from_fields([
            ("A", "1"),
            ("X", "old1"),
            ("B", "2"),
            ("x", "old2"),
        ]);
        msg.set("X", "new");
        assert_eq!(
            msg.iter()
                .collect::<Vec<_>>(),
            vec![("A", "1"), ("X", "new"), ("B", "2")]
        );

        msg.set("C", "3");
        assert_eq!(msg.get("C"), Some("3"));
        assert_eq!(msg.len(), 4);
    }

    #[test]
    fn test_remove_returns_values() {
        let mut msg = AmiMessage::from_fields([("V", "1"), ("K", "k"), ("v", "2")]);
        assert_eq!(msg.remove("v"), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(msg.len(), 1);
        assert!(msg
            .remove("v")
            .is_empty());
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(hangup().kind(), MessageKind::Event);
        assert_eq!(
            AmiMessage::from_fields([("Response", "Success")]).kind(),
            MessageKind::Response
        );
        assert_eq!(
            AmiMessage::from_fields([("Event", "X"), ("Response", "Success")]).kind(),
            MessageKind::Response,
            "a Response field wins over Event"
        );
        assert_eq!(
            AmiMessage::from_fields([("Action", "Ping")]).kind(),
            MessageKind::Action
        );
        assert_eq!(
            AmiMessage::from_fields([("Foo", "bar")]).kind(),
            MessageKind::Unknown
        );
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(
            hangup()
                .to_wire_format()
                .unwrap(),
            "Event: Hangup\r\nChannel: SIP/100-1\r\nCause: 16\r\n\r\n"
        );
    }

    #[test]
    fn test_wire_format_with_payload() {
        let mut msg = AmiMessage::from_fields([("Response", "Follows"), ("Privilege", "Command")]);
        msg.set_payload(vec!["line one".into(), String::new(), "line: three".into()]);
        assert_eq!(
            msg.to_wire_format()
                .unwrap(),
            "Response: Follows\r\nPrivilege: Command\r\nline one\r\n\r\nline: three\r\n--END COMMAND--\r\n\r\n"
        );
    }

    #[test]
    fn test_crlf_in_value_rejected() {
        let msg = AmiMessage::from_fields([("Action", "Ping\r\nAction: Logoff")]);
        let err = msg
            .to_wire_format()
            .unwrap_err();
        assert!(matches!(err, AmiError::Validation { .. }));

        let msg = AmiMessage::from_fields([("Channel", "SIP/1\n")]);
        assert!(msg
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn test_bad_field_names_rejected() {
        for name in ["", "  ", "Bad:Name", "Bad\nName", " Padded"] {
            let msg = AmiMessage::from_fields([(name, "v")]);
            assert!(
                msg.to_wire_format()
                    .is_err(),
                "name {:?} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_decode_field_line() {
        assert_eq!(
            decode_field_line("Response: Success"),
            Some(("Response".into(), "Success".into()))
        );
        assert_eq!(
            decode_field_line("Message: Channel: SIP/1 is busy"),
            Some(("Message".into(), "Channel: SIP/1 is busy".into()))
        );
        assert_eq!(
            decode_field_line("AccountCode:"),
            Some(("AccountCode".into(), String::new()))
        );
        assert_eq!(decode_field_line("no separator here"), None);
        assert_eq!(decode_field_line(": orphan value"), None);
    }
}
