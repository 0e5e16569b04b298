// Scripted debuggee for integration tests
//
// Speaks the debuggee side of the wire over a loopback socket: flagged strings
// going out, plain length-prefixed strings coming in.

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use pydbg_client::protocol::put_tagged_string;
use pydbg_client::{
    DebugConnection, DebugEvent, DebugListener, ExceptionHandlerSource, NoHandlerInfo,
    SessionConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;

/// How long a test waits for something that should happen promptly
pub const PROMPT: Duration = Duration::from_secs(2);

/// One inbound message, built field by field
pub struct Message {
    buf: BytesMut,
}

impl Message {
    pub fn new(token: &[u8; 4]) -> Self {
        let mut buf = BytesMut::new();
        buf.put_slice(token);
        Self { buf }
    }

    pub fn int(mut self, value: i32) -> Self {
        self.buf.put_i32_le(value);
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        put_tagged_string(&mut self.buf, Some(value));
        self
    }

    pub fn null(mut self) -> Self {
        put_tagged_string(&mut self.buf, None);
        self
    }

    /// repr, type name and expandable flag
    pub fn value(self, repr: &str, type_name: &str, expandable: bool) -> Self {
        self.string(repr).string(type_name).int(expandable as i32)
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.buf.put_slice(bytes);
        self
    }
}

pub struct MockDebuggee {
    stream: TcpStream,
}

impl MockDebuggee {
    pub async fn send(&mut self, message: Message) {
        self.stream.write_all(&message.buf).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn read_token(&mut self) -> [u8; 4] {
        let mut token = [0u8; 4];
        tokio::time::timeout(PROMPT, self.stream.read_exact(&mut token))
            .await
            .expect("no command from the session")
            .unwrap();
        token
    }

    pub async fn expect_token(&mut self, expected: &[u8; 4]) {
        let token = self.read_token().await;
        assert_eq!(
            &token,
            expected,
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&token)
        );
    }

    pub async fn read_i32(&mut self) -> i32 {
        let mut buf = [0u8; 4];
        self.stream.read_exact(&mut buf).await.unwrap();
        i32::from_le_bytes(buf)
    }

    pub async fn read_string(&mut self) -> String {
        let len = self.read_i32().await as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    /// True once the session has closed its end
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(
            tokio::time::timeout(PROMPT, self.stream.read(&mut buf)).await,
            Ok(Ok(0)) | Ok(Err(_))
        )
    }
}

/// Bind a listener, connect a mock debuggee to it and attach a session
pub async fn attach(config: SessionConfig) -> (DebugConnection, MockDebuggee) {
    attach_with(config, Arc::new(NoHandlerInfo)).await
}

pub async fn attach_with(
    config: SessionConfig,
    handler_source: Arc<dyn ExceptionHandlerSource>,
) -> (DebugConnection, MockDebuggee) {
    let listener = DebugListener::bind("127.0.0.1:0", config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session_id = DebugListener::new_session_id();

    let debuggee = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = BytesMut::new();
        put_tagged_string(&mut buf, Some(&session_id.to_string()));
        stream.write_all(&buf).await.unwrap();
        MockDebuggee { stream }
    });

    let conn = DebugConnection::attach(&listener, session_id, "2.7", handler_source)
        .await
        .unwrap();
    (conn, debuggee.await.unwrap())
}

pub async fn next_event(events: &mut UnboundedReceiver<DebugEvent>) -> DebugEvent {
    tokio::time::timeout(PROMPT, events.recv())
        .await
        .expect("no event")
        .expect("event channel closed")
}
