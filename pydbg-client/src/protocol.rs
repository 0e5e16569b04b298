// Debugger wire protocol definitions and frame encoding
//
// The protocol has no generic frame header: a message is a 4-byte token followed
// by the fields that token implies. All integers are 32-bit little-endian.
// Outbound strings are always UTF-8 with a 4-byte length prefix; inbound strings
// additionally carry a one-byte encoding flag (see reader.rs).

use crate::commands::{string_flags, Token};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use thiserror::Error;

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Debug, Error)]
pub enum DebugError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown message token {0:?}")]
    UnknownToken(Token),

    #[error("String payload not delivered within {0:?}")]
    PayloadTimeout(Duration),

    #[error("Unknown breakpoint {0}")]
    UnknownBreakpoint(i32),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Why an attach handshake did not produce a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachErrorKind {
    Timeout,
    VersionMismatch,
    Failed,
}

#[derive(Debug, Error)]
pub enum AttachError {
    #[error("Timed out after {0:?} waiting for the debuggee to connect")]
    Timeout(Duration),

    #[error("Unsupported interpreter version: {0}")]
    VersionMismatch(String),

    #[error("Attach failed: {0}")]
    Failed(String),
}

impl AttachError {
    pub fn kind(&self) -> AttachErrorKind {
        match self {
            AttachError::Timeout(_) => AttachErrorKind::Timeout,
            AttachError::VersionMismatch(_) => AttachErrorKind::VersionMismatch,
            AttachError::Failed(_) => AttachErrorKind::Failed,
        }
    }
}

impl From<std::io::Error> for AttachError {
    fn from(e: std::io::Error) -> Self {
        AttachError::Failed(e.to_string())
    }
}

/// An outbound message: token plus the fields that follow it
#[derive(Debug, Clone)]
pub struct CommandFrame {
    pub token: Token,
    pub data: BytesMut,
}

impl CommandFrame {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            data: BytesMut::new(),
        }
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.data.put_i32_le(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_i32(if value { 1 } else { 0 })
    }

    pub fn put_string(&mut self, value: &str) -> &mut Self {
        put_string(&mut self.data, value);
        self
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.token.len() + self.data.len());
        buf.put_slice(&self.token);
        buf.put_slice(&self.data);
        buf.freeze()
    }
}

/// Write an outbound string: 4-byte length, then UTF-8 bytes
pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_i32_le(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

/// Write a string the way the debuggee does: encoding flag, then length and bytes.
/// `None` is sent as the bare null flag.
pub fn put_tagged_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        None => buf.put_u8(string_flags::NULL),
        Some(s) if s.is_ascii() => {
            buf.put_u8(string_flags::ASCII);
            put_string(buf, s);
        }
        Some(s) => {
            buf.put_u8(string_flags::UTF8);
            put_string(buf, s);
        }
    }
}
