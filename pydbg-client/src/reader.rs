// Helpers for reading wire primitives straight off the socket
//
// Inbound messages are parsed field by field by the handler that owns the token,
// so the reader works on the stream itself rather than on a buffered frame.

use crate::commands::{string_flags, Token};
use crate::protocol::{DebugError, DebugResult};
use std::io::ErrorKind;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest string payload we are willing to allocate for (16MB)
const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

pub struct WireReader<R> {
    inner: R,
    payload_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    /// `payload_timeout` bounds how long a declared string body may take to arrive.
    /// `None` waits as long as the socket stays open.
    pub fn new(inner: R, payload_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            payload_timeout,
        }
    }

    /// Read the 4-byte token that starts every message
    pub async fn read_token(&mut self) -> DebugResult<Token> {
        let mut token = [0u8; 4];
        self.fill(&mut token).await?;
        Ok(token)
    }

    /// Read a little-endian i32
    pub async fn read_i32(&mut self) -> DebugResult<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf).await?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read an i32 flag; only 1 counts as set
    pub async fn read_flag(&mut self) -> DebugResult<bool> {
        Ok(self.read_i32().await? == 1)
    }

    /// Read a flagged string. `N` is a null string with no length,
    /// `U` is UTF-8 and `A` is one byte per character.
    pub async fn read_string(&mut self) -> DebugResult<Option<String>> {
        let mut flag = [0u8; 1];
        self.fill(&mut flag).await?;

        let utf8 = match flag[0] {
            string_flags::NULL => return Ok(None),
            string_flags::UTF8 => true,
            string_flags::ASCII => false,
            other => {
                return Err(DebugError::Protocol(format!(
                    "Invalid string flag: {:#x}",
                    other
                )))
            }
        };

        let len = self.read_i32().await?;
        let len = usize::try_from(len)
            .map_err(|_| DebugError::Protocol(format!("Negative string length: {}", len)))?;

        if len > MAX_STRING_LEN {
            return Err(DebugError::Protocol(format!(
                "String too large: {} bytes (max: {} bytes)",
                len, MAX_STRING_LEN
            )));
        }

        let bytes = self.read_payload(len).await?;

        if utf8 {
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| DebugError::Protocol(format!("Invalid UTF-8 in string: {}", e)))
        } else {
            Ok(Some(bytes.into_iter().map(char::from).collect()))
        }
    }

    /// Read a string, treating null as empty
    pub async fn read_string_or_empty(&mut self) -> DebugResult<String> {
        Ok(self.read_string().await?.unwrap_or_default())
    }

    async fn read_payload(&mut self, len: usize) -> DebugResult<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        let payload_timeout = self.payload_timeout;
        match payload_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fill(&mut bytes))
                .await
                .map_err(|_| DebugError::PayloadTimeout(limit))??,
            None => self.fill(&mut bytes).await?,
        }
        Ok(bytes)
    }

    async fn fill(&mut self, buf: &mut [u8]) -> DebugResult<()> {
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(DebugError::ConnectionClosed),
            Err(e) => Err(DebugError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::put_tagged_string;
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    async fn decode(value: Option<&str>) -> Option<String> {
        let mut buf = BytesMut::new();
        put_tagged_string(&mut buf, value);
        let mut reader = WireReader::new(&buf[..], None);
        reader.read_string().await.unwrap()
    }

    #[tokio::test]
    async fn test_string_round_trip() {
        assert_eq!(decode(Some("")).await.as_deref(), Some(""));
        assert_eq!(decode(Some("hello world")).await.as_deref(), Some("hello world"));
        assert_eq!(decode(Some("naïve 中文 🦀")).await.as_deref(), Some("naïve 中文 🦀"));
        assert_eq!(decode(None).await, None);
    }

    #[tokio::test]
    async fn test_ascii_flag_is_one_byte_per_char() {
        let data = [b'A', 2, 0, 0, 0, b'x', 0xe9];
        let mut reader = WireReader::new(&data[..], None);
        assert_eq!(reader.read_string().await.unwrap().as_deref(), Some("xé"));
    }

    #[tokio::test]
    async fn test_read_i32_little_endian() {
        let data = [0x78, 0x56, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff];
        let mut reader = WireReader::new(&data[..], None);
        assert_eq!(reader.read_i32().await.unwrap(), 0x12345678);
        assert_eq!(reader.read_i32().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_short_read_is_connection_closed() {
        let data = [1u8, 2, 3];
        let mut reader = WireReader::new(&data[..], None);
        assert!(matches!(
            reader.read_i32().await,
            Err(DebugError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_invalid_flag() {
        let data = [b'Q', 0, 0, 0, 0];
        let mut reader = WireReader::new(&data[..], None);
        assert!(matches!(
            reader.read_string().await,
            Err(DebugError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_length() {
        let data = [b'U', 0xff, 0xff, 0xff, 0xff];
        let mut reader = WireReader::new(&data[..], None);
        assert!(matches!(
            reader.read_string().await,
            Err(DebugError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_undelivered_payload_times_out() {
        let (client, mut server) = tokio::io::duplex(64);
        // Advertise 10 bytes, deliver 3, keep the stream open
        server.write_all(&[b'U', 10, 0, 0, 0, b'a', b'b', b'c']).await.unwrap();

        let limit = Duration::from_millis(50);
        let mut reader = WireReader::new(client, Some(limit));
        assert!(matches!(
            reader.read_string().await,
            Err(DebugError::PayloadTimeout(d)) if d == limit
        ));
        drop(server);
    }
}
