// Debuggee attach listener
//
// The debuggee connects back to us. Its first message is the session id it was
// launched with, as a flagged string; connections presenting another id belong to
// some other session and are dropped while we keep waiting.

use crate::config::SessionConfig;
use crate::protocol::{AttachError, DebugError};
use crate::reader::WireReader;
use crate::types::LanguageVersion;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct DebugListener {
    listener: TcpListener,
    config: SessionConfig,
}

impl DebugListener {
    /// Bind to `addr`; port 0 picks an ephemeral port
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: SessionConfig,
    ) -> Result<Self, AttachError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening for debuggees on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, AttachError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Fresh id to hand to a debuggee at launch
    pub fn new_session_id() -> Uuid {
        Uuid::new_v4()
    }

    /// Wait up to the attach timeout for the debuggee that identifies itself as
    /// `session_id`. `version_tag` is the interpreter version it was launched
    /// with, e.g. `"2.7"`.
    pub async fn accept(
        &self,
        session_id: Uuid,
        version_tag: &str,
    ) -> Result<(TcpStream, LanguageVersion), AttachError> {
        let version = LanguageVersion::parse(version_tag)
            .ok_or_else(|| AttachError::VersionMismatch(version_tag.to_string()))?;

        let limit = self.config.attach_timeout();
        let stream = tokio::time::timeout(limit, self.wait_for(session_id))
            .await
            .map_err(|_| AttachError::Timeout(limit))??;

        info!("Debuggee attached to session {} ({})", session_id, version);
        Ok((stream, version))
    }

    async fn wait_for(&self, session_id: Uuid) -> Result<TcpStream, AttachError> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            debug!("Connection from {}", peer);
            stream.set_nodelay(true).ok();

            let presented = {
                let mut reader = WireReader::new(&mut stream, self.config.payload_read_timeout());
                reader.read_string().await
            };

            match presented {
                Ok(Some(id)) if Uuid::parse_str(id.trim()).ok() == Some(session_id) => {
                    return Ok(stream);
                }
                Ok(id) => {
                    warn!("Dropping {}: presented session {:?}", peer, id);
                }
                Err(DebugError::ConnectionClosed) => {
                    debug!("{} disconnected before identifying itself", peer);
                }
                Err(e) => return Err(AttachError::Failed(e.to_string())),
            }
        }
    }
}
