// Session configuration
//
// Every field has a default, so an empty JSON object (or no file at all) gives a
// working session. Timeouts are in milliseconds.

use crate::pathmap::PathMapping;
use crate::protocol::{DebugError, DebugResult};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long `get_thread_frames` waits for the frame list
    pub frame_timeout_ms: u64,

    /// How long `set_line_number` waits for the debuggee's verdict
    pub set_line_timeout_ms: u64,

    /// How long the listener waits for the debuggee to connect and identify itself
    pub attach_timeout_ms: u64,

    /// Deadline for a declared string body to arrive. Unset means wait for as
    /// long as the socket stays open.
    pub payload_read_timeout_ms: Option<u64>,

    /// Outbound frames that may queue before callers wait on the writer
    pub command_queue_capacity: usize,

    /// Local <-> remote path pairs, applied in order
    pub path_mappings: Vec<PathMapping>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 2000,
            set_line_timeout_ms: 2000,
            attach_timeout_ms: 20_000,
            payload_read_timeout_ms: None,
            command_queue_capacity: 32,
            path_mappings: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> DebugResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| DebugError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> DebugResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    fn validate(&self) -> DebugResult<()> {
        if self.command_queue_capacity == 0 {
            return Err(DebugError::Config(
                "command_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn set_line_timeout(&self) -> Duration {
        Duration::from_millis(self.set_line_timeout_ms)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }

    pub fn payload_read_timeout(&self) -> Option<Duration> {
        self.payload_read_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.frame_timeout(), Duration::from_secs(2));
        assert_eq!(config.set_line_timeout(), Duration::from_secs(2));
        assert_eq!(config.attach_timeout(), Duration::from_secs(20));
        assert_eq!(config.payload_read_timeout(), None);
        assert_eq!(config.command_queue_capacity, 32);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{
                "frame_timeout_ms": 500,
                "payload_read_timeout_ms": 10000,
                "path_mappings": [{ "local": "/home/me/app", "remote": "/srv/app" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.frame_timeout(), Duration::from_millis(500));
        assert_eq!(config.payload_read_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.set_line_timeout_ms, 2000);
        assert_eq!(config.path_mappings.len(), 1);
        assert_eq!(config.path_mappings[0].remote, "/srv/app");
    }

    #[test]
    fn test_rejects_zero_queue() {
        let err = SessionConfig::from_json_str(r#"{ "command_queue_capacity": 0 }"#).unwrap_err();
        assert!(matches!(err, DebugError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(
            SessionConfig::from_json_str("{ nope"),
            Err(DebugError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "attach_timeout_ms": 1500 }}"#).unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.attach_timeout(), Duration::from_millis(1500));
    }
}
