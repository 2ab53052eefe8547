//! Channel-related data types carried in Manager events and responses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Channel state from `enum ast_channel_state`.
///
/// Modern servers send it as a number in `ChannelState` with the text in
/// `ChannelStateDesc`; 1.x servers send only the text, in `State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ChannelState {
    Down = 0,
    Reserved = 1,
    OffHook = 2,
    Dialing = 3,
    Ring = 4,
    Ringing = 5,
    Up = 6,
    Busy = 7,
    DialingOffhook = 8,
    PreRing = 9,
}

impl ChannelState {
    /// Parse from the numeric `ChannelState` field.
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Down),
            1 => Some(Self::Reserved),
            2 => Some(Self::OffHook),
            3 => Some(Self::Dialing),
            4 => Some(Self::Ring),
            5 => Some(Self::Ringing),
            6 => Some(Self::Up),
            7 => Some(Self::Busy),
            8 => Some(Self::DialingOffhook),
            9 => Some(Self::PreRing),
            _ => None,
        }
    }

    /// Integer discriminant matching `enum ast_channel_state`.
    pub fn as_number(&self) -> u8 {
        *self as u8
    }

    /// Parse either representation: a number or the state text.
    pub fn from_field(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.parse::<u8>() {
            Ok(n) => Self::from_number(n),
            Err(_) => value
                .parse()
                .ok(),
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Down => "Down",
            Self::Reserved => "Rsrvd",
            Self::OffHook => "OffHook",
            Self::Dialing => "Dialing",
            Self::Ring => "Ring",
            Self::Ringing => "Ringing",
            Self::Up => "Up",
            Self::Busy => "Busy",
            Self::DialingOffhook => "Dialing Offhook",
            Self::PreRing => "Pre-ring",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an invalid channel state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelStateError(pub String);

impl fmt::Display for ParseChannelStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel state: {}", self.0)
    }
}

impl std::error::Error for ParseChannelStateError {}

impl FromStr for ChannelState {
    type Err = ParseChannelStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "down" => Ok(Self::Down),
            "rsrvd" | "reserved" => Ok(Self::Reserved),
            "offhook" => Ok(Self::OffHook),
            "dialing" => Ok(Self::Dialing),
            "ring" => Ok(Self::Ring),
            "ringing" => Ok(Self::Ringing),
            "up" => Ok(Self::Up),
            "busy" => Ok(Self::Busy),
            "dialing offhook" => Ok(Self::DialingOffhook),
            "pre-ring" => Ok(Self::PreRing),
            _ => Err(ParseChannelStateError(s.to_string())),
        }
    }
}

/// Hint state returned by `ExtensionState` and carried in `ExtensionStatus` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum ExtensionStatus {
    Removed,
    Deactivated,
    Idle,
    InUse,
    Busy,
    Unavailable,
    Ringing,
    InUseRinging,
    OnHold,
    InUseOnHold,
}

impl ExtensionStatus {
    /// Parse the numeric `Status` field (a bit set for the combined states).
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -2 => Some(Self::Removed),
            -1 => Some(Self::Deactivated),
            0 => Some(Self::Idle),
            1 => Some(Self::InUse),
            2 => Some(Self::Busy),
            4 => Some(Self::Unavailable),
            8 => Some(Self::Ringing),
            9 => Some(Self::InUseRinging),
            16 => Some(Self::OnHold),
            17 => Some(Self::InUseOnHold),
            _ => None,
        }
    }

    /// Numeric code as sent by the server.
    pub fn code(&self) -> i32 {
        match self {
            Self::Removed => -2,
            Self::Deactivated => -1,
            Self::Idle => 0,
            Self::InUse => 1,
            Self::Busy => 2,
            Self::Unavailable => 4,
            Self::Ringing => 8,
            Self::InUseRinging => 9,
            Self::OnHold => 16,
            Self::InUseOnHold => 17,
        }
    }
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Removed => "Removed",
            Self::Deactivated => "Deactivated",
            Self::Idle => "Idle",
            Self::InUse => "InUse",
            Self::Busy => "Busy",
            Self::Unavailable => "Unavailable",
            Self::Ringing => "Ringing",
            Self::InUseRinging => "InUse&Ringing",
            Self::OnHold => "Hold",
            Self::InUseOnHold => "InUse&Hold",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::Up.to_string(), "Up");
        assert_eq!(ChannelState::Reserved.to_string(), "Rsrvd");
        assert_eq!(ChannelState::DialingOffhook.to_string(), "Dialing Offhook");
        assert_eq!(ChannelState::PreRing.to_string(), "Pre-ring");
    }

    #[test]
    fn test_channel_state_from_str_case_insensitive() {
        assert_eq!("UP".parse::<ChannelState>(), Ok(ChannelState::Up));
        assert_eq!("ringing".parse::<ChannelState>(), Ok(ChannelState::Ringing));
        assert_eq!(
            "Dialing Offhook".parse::<ChannelState>(),
            Ok(ChannelState::DialingOffhook)
        );
    }

    #[test]
    fn test_channel_state_from_str_unknown() {
        let err = "Exploded"
            .parse::<ChannelState>()
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown channel state: Exploded");
    }

    #[test]
    fn test_channel_state_number_round_trip() {
        for n in 0..=9u8 {
            let state = ChannelState::from_number(n).unwrap();
            assert_eq!(state.as_number(), n);
        }
        assert_eq!(ChannelState::from_number(10), None);
    }

    #[test]
    fn test_channel_state_display_parses_back() {
        for n in 0..=9u8 {
            let state = ChannelState::from_number(n).unwrap();
            assert_eq!(
                state
                    .to_string()
                    .parse::<ChannelState>(),
                Ok(state)
            );
        }
    }

    #[test]
    fn test_channel_state_from_field() {
        assert_eq!(ChannelState::from_field("6"), Some(ChannelState::Up));
        assert_eq!(ChannelState::from_field(" Ring "), Some(ChannelState::Ring));
        assert_eq!(ChannelState::from_field("42"), None);
        assert_eq!(ChannelState::from_field(""), None);
    }

    #[test]
    fn test_extension_status_codes() {
        assert_eq!(ExtensionStatus::from_code(0), Some(ExtensionStatus::Idle));
        assert_eq!(ExtensionStatus::from_code(9), Some(ExtensionStatus::InUseRinging));
        assert_eq!(ExtensionStatus::from_code(3), None);
        assert_eq!(ExtensionStatus::Unavailable.code(), 4);
        assert_eq!(ExtensionStatus::OnHold.to_string(), "Hold");
    }
}
