//! Receive buffer for line-oriented framing

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE, MAX_LINE_LENGTH},
    error::{AmiError, AmiResult},
};

/// Growable byte buffer with a read cursor.
///
/// Bytes before `position` have been consumed; [`compact`](Self::compact)
/// drops them once enough have accumulated.
#[derive(Debug)]
pub(crate) struct AmiBuffer {
    data: Vec<u8>,
    position: usize,
}

impl AmiBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::with_capacity(BUF_CHUNK),
            position: 0,
        }
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        if self.data.capacity() - self.data.len() < bytes.len() {
            self.data
                .reserve(bytes.len().max(BUF_CHUNK));
        }
        self.data
            .extend_from_slice(bytes);
    }

    /// Unconsumed byte count.
    pub(crate) fn len(&self) -> usize {
        self.data.len() - self.position
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject runaway input: an unterminated line past `MAX_LINE_LENGTH`, or
    /// more than `MAX_BUFFER_SIZE` buffered overall.
    pub(crate) fn check_size_limits(&self) -> AmiResult<()> {
        if self.len() > MAX_BUFFER_SIZE {
            return Err(AmiError::protocol_error(format!(
                "receive buffer exceeded {} bytes",
                MAX_BUFFER_SIZE
            )));
        }
        let pending = &self.data[self.position..];
        if pending.len() > MAX_LINE_LENGTH && !pending[..=MAX_LINE_LENGTH].contains(&b'\n') {
            return Err(AmiError::protocol_error(format!(
                "line exceeds {} bytes without terminator",
                MAX_LINE_LENGTH
            )));
        }
        Ok(())
    }

    /// Take the next LF-terminated line, without the terminator.
    ///
    /// A trailing CR is left in place for the caller to strip.
    pub(crate) fn extract_line(&mut self) -> Option<Vec<u8>> {
        let pending = &self.data[self.position..];
        let newline = pending
            .iter()
            .position(|&b| b == b'\n')?;
        let line = pending[..newline].to_vec();
        self.position += newline + 1;
        Some(line)
    }

    /// Drop all unconsumed bytes.
    pub(crate) fn clear(&mut self) {
        self.data
            .clear();
        self.position = 0;
    }

    /// Reclaim consumed space once it dominates the allocation.
    pub(crate) fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        if self.position == self.data.len() {
            self.clear();
        } else if self.position >= BUF_CHUNK || self.position * 2 >= self.data.len() {
            self.data
                .drain(..self.position);
            self.position = 0;
        }
    }
}

impl Default for AmiBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_lines() {
        let mut buf = AmiBuffer::new();
        buf.extend_from_slice(b"Response: Success\r\nPing: Pong\r\npartial");

        assert_eq!(buf.extract_line(), Some(b"Response: Success\r".to_vec()));
        assert_eq!(buf.extract_line(), Some(b"Ping: Pong\r".to_vec()));
        assert_eq!(buf.extract_line(), None);
        assert_eq!(buf.len(), "partial".len());

        buf.extend_from_slice(b" line\n");
        assert_eq!(buf.extract_line(), Some(b"partial line".to_vec()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_compact_keeps_unconsumed_bytes() {
        let mut buf = AmiBuffer::new();
        buf.extend_from_slice(b"one\ntwo\nthr");
        buf.extract_line();
        buf.extract_line();
        buf.compact();
        assert_eq!(buf.len(), 3);
        buf.extend_from_slice(b"ee\n");
        assert_eq!(buf.extract_line(), Some(b"three".to_vec()));
    }

    #[test]
    fn test_overlong_line_rejected() {
        let mut buf = AmiBuffer::new();
        buf.extend_from_slice(&vec![b'x'; MAX_LINE_LENGTH + 2]);
        assert!(buf
            .check_size_limits()
            .is_err());
    }

    #[test]
    fn test_long_buffer_with_newline_accepted() {
        let mut buf = AmiBuffer::new();
        let mut data = vec![b'x'; 100];
        data.push(b'\n');
        buf.extend_from_slice(&data);
        assert!(buf
            .check_size_limits()
            .is_ok());
    }
}
