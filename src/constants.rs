//! Protocol constants and configuration values

/// Default Asterisk Manager Interface TCP port
pub const DEFAULT_AMI_PORT: u16 = 5038;

/// Socket buffer size for reading from TCP stream (64KB) - standard TCP receive window
pub const SOCKET_BUF_SIZE: usize = 65536;

/// Buffer allocation size (64KB) - used for both initial allocation and growth increments
pub const BUF_CHUNK: usize = 64 * 1024;

/// Maximum length of a single protocol line (1MB).
/// `Command` output arrives line by line, so even `core show help` stays far below this.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Maximum total buffer size (16MB) - safety limit to prevent runaway memory
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Protocol line terminator
pub const LINE_TERMINATOR: &str = "\r\n";

/// Greeting prefix sent by the server as the first line of every connection
pub const BANNER_PREFIX: &str = "Asterisk Call Manager/";

/// Sentinel terminating the free-text payload of a `Response: Follows` block
pub const FOLLOWS_SENTINEL: &str = "--END COMMAND--";

/// Protocol framing field names.
pub const HEADER_ACTION: &str = "Action";
/// Correlation token echoed by the server.
pub const HEADER_ACTION_ID: &str = "ActionID";
/// Response status field.
pub const HEADER_RESPONSE: &str = "Response";
/// Event name field.
pub const HEADER_EVENT: &str = "Event";
/// Human-readable text accompanying a response.
pub const HEADER_MESSAGE: &str = "Message";
/// Marker sent on the last event of an event list (`EventList: Complete`).
pub const HEADER_EVENT_LIST: &str = "EventList";

/// Server reply text for actions the login is not authorized to run
pub const MESSAGE_PERMISSION_DENIED: &str = "Permission denied";

/// Value Asterisk uses for unset channel variables
pub const NULL_VALUE: &str = "(null)";

/// Connection timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default action response timeout in milliseconds (5 seconds)
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 5000;
