//! AMI stream framing: banner, CRLF blocks and `Response: Follows` payloads

use crate::{
    buffer::AmiBuffer,
    constants::{BANNER_PREFIX, FOLLOWS_SENTINEL, HEADER_ACTION_ID, HEADER_RESPONSE},
    error::{AmiError, AmiResult},
    message::{decode_field_line, AmiMessage},
};
use tracing::{debug, warn};

/// What to do with a line inside a block that has no `:` separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedLinePolicy {
    /// Skip the line, count it and log a warning.
    #[default]
    Drop,
    /// Fail the parse with [`AmiError::Protocol`].
    Reject,
}

/// Fields that may precede the free-text lines of a `Response: Follows` block.
const FOLLOWS_HEADERS: &[&str] = &[HEADER_ACTION_ID, "Privilege"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    AwaitingBanner,
    Fields,
    Payload,
}

/// Incremental AMI parser.
///
/// Feed it bytes with [`add_data`](Self::add_data) and pull complete blocks
/// with [`parse_message`](Self::parse_message). Bytes may arrive in arbitrary
/// chunks; a block is only returned once its terminating blank line (or
/// `--END COMMAND--` sentinel) has been seen.
#[derive(Debug)]
pub struct AmiParser {
    buffer: AmiBuffer,
    state: ParseState,
    current: AmiMessage,
    payload: Vec<String>,
    banner: Option<String>,
    policy: MalformedLinePolicy,
    malformed_lines: u64,
}

impl AmiParser {
    /// Parser for a fresh connection; the first line must be the server banner.
    pub fn new() -> Self {
        Self {
            buffer: AmiBuffer::new(),
            state: ParseState::AwaitingBanner,
            current: AmiMessage::new(),
            payload: Vec::new(),
            banner: None,
            policy: MalformedLinePolicy::default(),
            malformed_lines: 0,
        }
    }

    /// Parser that starts directly at block framing.
    pub fn without_banner() -> Self {
        Self {
            state: ParseState::Fields,
            ..Self::new()
        }
    }

    /// Builder-style malformed line policy.
    pub fn with_malformed_line_policy(mut self, policy: MalformedLinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Change the malformed line policy.
    pub fn set_malformed_line_policy(&mut self, policy: MalformedLinePolicy) {
        self.policy = policy;
    }

    /// Full banner line, once received.
    pub fn banner(&self) -> Option<&str> {
        self.banner
            .as_deref()
    }

    /// Protocol version announced in the banner (`"1.1"`, `"7.0.3"`, ...).
    pub fn banner_version(&self) -> Option<&str> {
        self.banner
            .as_deref()
            .and_then(|b| b.strip_prefix(BANNER_PREFIX))
            .map(str::trim)
    }

    /// Lines dropped under [`MalformedLinePolicy::Drop`].
    pub fn malformed_line_count(&self) -> u64 {
        self.malformed_lines
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        self.buffer
            .extend_from_slice(data);
        self.buffer
            .check_size_limits()?;
        Ok(())
    }

    /// `true` when a block has started but not finished, or bytes are buffered.
    pub fn has_partial_block(&self) -> bool {
        self.state == ParseState::Payload
            || !self
                .current
                .is_empty()
            || !self
                .buffer
                .is_empty()
    }

    /// Throw away any incomplete block and buffered bytes.
    pub fn discard_partial(&mut self) {
        self.buffer
            .clear();
        self.current = AmiMessage::new();
        self.payload
            .clear();
        if self.state == ParseState::Payload {
            self.state = ParseState::Fields;
        }
    }

    /// Try to parse a complete block from the buffer.
    ///
    /// The banner is consumed transparently and never returned as a block.
    pub fn parse_message(&mut self) -> AmiResult<Option<AmiMessage>> {
        let result = self.next_block();
        self.buffer
            .compact();
        result
    }

    fn next_block(&mut self) -> AmiResult<Option<AmiMessage>> {
        while let Some(raw) = self
            .buffer
            .extract_line()
        {
            let mut line = String::from_utf8_lossy(&raw).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }

            match self.state {
                ParseState::AwaitingBanner => {
                    if line
                        .trim()
                        .is_empty()
                    {
                        continue;
                    }
                    if !line.starts_with(BANNER_PREFIX) {
                        return Err(AmiError::protocol_error(format!(
                            "expected Manager banner, got {:?}",
                            line
                        )));
                    }
                    debug!("[RECV] banner: {}", line);
                    self.banner = Some(line);
                    self.state = ParseState::Fields;
                }
                ParseState::Fields => {
                    if line
                        .trim()
                        .is_empty()
                    {
                        if self
                            .current
                            .is_empty()
                        {
                            continue;
                        }
                        return Ok(Some(std::mem::take(&mut self.current)));
                    }
                    self.field_line(&line)?;
                }
                ParseState::Payload => {
                    if let Some(message) = self.payload_line(line) {
                        return Ok(Some(message));
                    }
                }
            }
        }
        Ok(None)
    }

    fn field_line(&mut self, line: &str) -> AmiResult<()> {
        match decode_field_line(line) {
            Some((name, value)) => {
                let follows = name.eq_ignore_ascii_case(HEADER_RESPONSE)
                    && value.eq_ignore_ascii_case("Follows");
                self.current
                    .push(name, value);
                if follows {
                    self.state = ParseState::Payload;
                }
                Ok(())
            }
            None => match self.policy {
                MalformedLinePolicy::Drop => {
                    self.malformed_lines += 1;
                    warn!("Dropping malformed line in block: {:?}", line);
                    Ok(())
                }
                MalformedLinePolicy::Reject => {
                    self.current = AmiMessage::new();
                    Err(AmiError::protocol_error(format!(
                        "malformed line in block: {:?}",
                        line
                    )))
                }
            },
        }
    }

    fn payload_line(&mut self, line: String) -> Option<AmiMessage> {
        if let Some(prefix) = line
            .trim_end()
            .strip_suffix(FOLLOWS_SENTINEL)
        {
            if !prefix.is_empty() {
                self.payload
                    .push(prefix.to_string());
            }
            let mut message = std::mem::take(&mut self.current);
            message.set_payload(std::mem::take(&mut self.payload));
            self.state = ParseState::Fields;
            return Some(message);
        }

        if self
            .payload
            .is_empty()
        {
            if let Some((name, value)) = decode_field_line(&line) {
                if FOLLOWS_HEADERS
                    .iter()
                    .any(|h| h.eq_ignore_ascii_case(&name))
                {
                    self.current
                        .push(name, value);
                    return None;
                }
            }
        }
        self.payload
            .push(line);
        None
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new()
    }
}
