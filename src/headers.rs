//! Typed names for well-known Manager fields.

/// Error returned when parsing an unrecognized field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseManagerHeaderError(pub String);

impl std::fmt::Display for ParseManagerHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown manager header: {}", self.0)
    }
}

impl std::error::Error for ParseManagerHeaderError {}

define_wire_enum! {
    error_type: ParseManagerHeaderError,
    /// Field names that recur across Manager actions, responses and events.
    ///
    /// Usable anywhere a field name is accepted, e.g.
    /// [`AmiMessage::get()`](crate::AmiMessage::get).
    pub enum ManagerHeader {
        Action => "Action",
        ActionId => "ActionID",
        Response => "Response",
        Event => "Event",
        Message => "Message",
        Privilege => "Privilege",
        EventList => "EventList",
        Username => "Username",
        Secret => "Secret",
        Events => "Events",
        EventMask => "EventMask",
        Channel => "Channel",
        ExtraChannel => "ExtraChannel",
        Context => "Context",
        Exten => "Exten",
        Priority => "Priority",
        Variable => "Variable",
        Value => "Value",
        Uniqueid => "Uniqueid",
        Cause => "Cause",
        CauseTxt => "Cause-txt",
        CallerIdNum => "CallerIDNum",
        CallerIdName => "CallerIDName",
        State => "State",
        ChannelState => "ChannelState",
        ChannelStateDesc => "ChannelStateDesc",
        Queue => "Queue",
        Interface => "Interface",
        Location => "Location",
        Output => "Output",
        Timeout => "Timeout",
        Command => "Command",
        Mailbox => "Mailbox",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_wire_names() {
        assert_eq!(ManagerHeader::ActionId.to_string(), "ActionID");
        assert_eq!(ManagerHeader::CauseTxt.to_string(), "Cause-txt");
        assert_eq!(ManagerHeader::CallerIdNum.to_string(), "CallerIDNum");
    }

    #[test]
    fn as_ref_str() {
        let h: &str = ManagerHeader::Response.as_ref();
        assert_eq!(h, "Response");
    }

    #[test]
    fn from_str_case_insensitive() {
        assert_eq!(
            "actionid".parse::<ManagerHeader>(),
            Ok(ManagerHeader::ActionId)
        );
        assert_eq!(
            "ACTIONID".parse::<ManagerHeader>(),
            Ok(ManagerHeader::ActionId)
        );
        assert_eq!(
            "cause-TXT".parse::<ManagerHeader>(),
            Ok(ManagerHeader::CauseTxt)
        );
    }

    #[test]
    fn from_str_unknown() {
        let err = "X-Not-A-Manager-Field".parse::<ManagerHeader>();
        assert_eq!(
            err.unwrap_err()
                .to_string(),
            "unknown manager header: X-Not-A-Manager-Field"
        );
    }

    #[test]
    fn all_variants_parse_back() {
        for v in ManagerHeader::ALL {
            let parsed: ManagerHeader = v
                .as_str()
                .parse()
                .unwrap();
            assert_eq!(parsed, *v);
        }
    }
}
