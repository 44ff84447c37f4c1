//! Length-prefixed JSON framing for launcher commands.
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┐
//! │ Length (4 bytes) │ Payload (variable)                   │
//! │ Little-endian u32│ UTF-8 JSON {"requestId","command"}   │
//! └──────────────────┴──────────────────────────────────────┘
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length prefix size.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest command payload accepted from a companion.
pub const MAX_COMMAND_SIZE: usize = 64 * 1024;

/// Launcher channel errors.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Payload is not a valid command.
    #[error("invalid command payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Declared payload length exceeds [`MAX_COMMAND_SIZE`].
    #[error("command too large: {size} bytes (max {max})")]
    TooLarge {
        /// Declared length.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// No companion is connected.
    #[error("no companion connected")]
    NotConnected,
}

/// One command exchanged with the companion launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LauncherCommand {
    /// Sender-assigned request id.
    pub request_id: u32,
    /// Command name.
    pub command: String,
}

impl LauncherCommand {
    /// Create a command.
    pub fn new(request_id: u32, command: impl Into<String>) -> Self {
        Self {
            request_id,
            command: command.into(),
        }
    }

    /// Encode as a length-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>, LauncherError> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_COMMAND_SIZE {
            return Err(LauncherError::TooLarge {
                size: json.len(),
                max: MAX_COMMAND_SIZE,
            });
        }
        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + json.len());
        frame.extend_from_slice(&(json.len() as u32).to_le_bytes());
        frame.extend_from_slice(&json);
        Ok(frame)
    }
}

#[derive(Debug)]
enum ReadState {
    Header { buf: [u8; LENGTH_PREFIX_SIZE], filled: usize },
    Body { buf: Vec<u8>, filled: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header {
            buf: [0; LENGTH_PREFIX_SIZE],
            filled: 0,
        }
    }
}

/// Incremental frame decoder.
///
/// Bytes may arrive split at any position; the read position is kept across
/// calls to [`CommandReader::push`].
#[derive(Debug, Default)]
pub struct CommandReader {
    state: ReadState,
    discarded: u64,
}

impl CommandReader {
    /// Create a reader waiting for a length prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a frame is partially read.
    pub fn is_mid_frame(&self) -> bool {
        !matches!(self.state, ReadState::Header { filled: 0, .. })
    }

    /// Number of complete frames skipped because their payload was not a
    /// valid command.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Consume `data`, returning every command completed by it.
    ///
    /// A frame whose payload is not a valid command is logged and skipped;
    /// decoding continues with the next frame. An oversized length prefix is
    /// fatal for the stream.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<LauncherCommand>, LauncherError> {
        let mut commands = Vec::new();

        while !data.is_empty() {
            match &mut self.state {
                ReadState::Header { buf, filled } => {
                    let take = (LENGTH_PREFIX_SIZE - *filled).min(data.len());
                    buf[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];

                    if *filled == LENGTH_PREFIX_SIZE {
                        let size = u32::from_le_bytes(*buf) as usize;
                        if size > MAX_COMMAND_SIZE {
                            self.state = ReadState::default();
                            return Err(LauncherError::TooLarge {
                                size,
                                max: MAX_COMMAND_SIZE,
                            });
                        }
                        self.state = ReadState::Body {
                            buf: vec![0; size],
                            filled: 0,
                        };
                    }
                }
                ReadState::Body { buf, filled } => {
                    let take = (buf.len() - *filled).min(data.len());
                    buf[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];
                }
            }

            if let ReadState::Body { buf, filled } = &self.state {
                if *filled == buf.len() {
                    match serde_json::from_slice(buf) {
                        Ok(command) => commands.push(command),
                        Err(e) => {
                            self.discarded += 1;
                            tracing::warn!(
                                error = %e,
                                len = buf.len(),
                                "discarding malformed launcher command"
                            );
                        }
                    }
                    self.state = ReadState::default();
                }
            }
        }
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = LauncherCommand::new(1, "start").encode().unwrap();
        let json = br#"{"requestId":1,"command":"start"}"#;
        assert_eq!(&frame[..4], &(json.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], json);
    }

    #[test]
    fn test_partial_reads_resume() {
        let frame = LauncherCommand::new(7, "stop").encode().unwrap();
        let mut reader = CommandReader::new();

        // Split inside the header, then inside the body.
        assert!(reader.push(&frame[..2]).unwrap().is_empty());
        assert!(reader.is_mid_frame());
        assert!(reader.push(&frame[2..10]).unwrap().is_empty());
        let commands = reader.push(&frame[10..]).unwrap();

        assert_eq!(commands, vec![LauncherCommand::new(7, "stop")]);
        assert!(!reader.is_mid_frame());
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut bytes = LauncherCommand::new(1, "start").encode().unwrap();
        bytes.extend(LauncherCommand::new(2, "stop").encode().unwrap());
        bytes.extend(&LauncherCommand::new(3, "x").encode().unwrap()[..3]);

        let mut reader = CommandReader::new();
        let commands = reader.push(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![LauncherCommand::new(1, "start"), LauncherCommand::new(2, "stop")]
        );
        assert!(reader.is_mid_frame());
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = LauncherCommand::new(42, "reconnect").encode().unwrap();
        let mut reader = CommandReader::new();
        let mut commands = Vec::new();
        for byte in &frame {
            commands.extend(reader.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(commands, vec![LauncherCommand::new(42, "reconnect")]);
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let mut reader = CommandReader::new();
        let prefix = ((MAX_COMMAND_SIZE + 1) as u32).to_le_bytes();
        assert!(matches!(
            reader.push(&prefix),
            Err(LauncherError::TooLarge { .. })
        ));
    }

    fn garbage_frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_bad_json_keeps_alignment() {
        let good = LauncherCommand::new(5, "start").encode().unwrap();

        let mut reader = CommandReader::new();
        assert!(reader.push(&garbage_frame(b"{nope}")).unwrap().is_empty());
        assert_eq!(reader.discarded(), 1);
        assert!(!reader.is_mid_frame());
        assert_eq!(reader.push(&good).unwrap(), vec![LauncherCommand::new(5, "start")]);
    }

    #[test]
    fn test_bad_json_mid_chunk_skips_only_that_frame() {
        let mut bytes = LauncherCommand::new(1, "start").encode().unwrap();
        bytes.extend(garbage_frame(b"{bad json}"));
        bytes.extend(LauncherCommand::new(3, "stop").encode().unwrap());

        let mut reader = CommandReader::new();
        let commands = reader.push(&bytes).unwrap();
        assert_eq!(
            commands,
            vec![LauncherCommand::new(1, "start"), LauncherCommand::new(3, "stop")]
        );
        assert_eq!(reader.discarded(), 1);
        assert!(!reader.is_mid_frame());
    }
}
