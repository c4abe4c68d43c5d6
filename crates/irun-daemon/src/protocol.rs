//! Wire protocol spoken with the device-resident agent
//!
//! Every message starts with a fixed header:
//!
//! ```text
//! ┌──────────────────┬────────────────┬────────────────┐
//! │ magic (u64, BE)  │ version (i32)  │ kind (i32)     │
//! └──────────────────┴────────────────┴────────────────┘
//! ```
//!
//! A patches message continues with a patch count, then for every patch a
//! UTF string path and a byte array (i32 length + raw bytes), and ends with
//! the [`UpdateMode`] id. UTF strings are a u16 byte length followed by
//! Java's modified UTF-8, which the agent reads with `readUTF`: NUL takes two
//! bytes and characters outside the BMP are written as surrogate pairs. The agent answers patches and
//! ping messages with a single boolean byte.

use irun_core::prelude::*;
use irun_core::{ApplicationPatch, UpdateMode};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Magic identifier at the start of every message
pub const PROTOCOL_IDENTIFIER: u64 = 0x3510_7124;

/// Protocol version; the agent rejects anything else
pub const PROTOCOL_VERSION: i32 = 4;

/// Upper bound for any length-prefixed payload accepted by the decoder
pub const MAX_PAYLOAD_LEN: usize = 512 * 1024 * 1024;

/// Upper bound for the patch count accepted by the decoder
const MAX_PATCH_COUNT: usize = 4096;

/// Message kind identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Patches,
    Ping,
    RestartActivity,
    ShowToast,
    Eof,
}

impl MessageKind {
    pub fn id(self) -> i32 {
        match self {
            MessageKind::Patches => 1,
            MessageKind::Ping => 2,
            MessageKind::RestartActivity => 5,
            MessageKind::ShowToast => 6,
            MessageKind::Eof => 7,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(MessageKind::Patches),
            2 => Some(MessageKind::Ping),
            5 => Some(MessageKind::RestartActivity),
            6 => Some(MessageKind::ShowToast),
            7 => Some(MessageKind::Eof),
            _ => None,
        }
    }
}

/// A complete message sent to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    Patches {
        patches: Vec<ApplicationPatch>,
        mode: UpdateMode,
    },
    /// Liveness probe; the agent replies whether the app is in the foreground
    Ping,
    RestartActivity,
    ShowToast {
        text: String,
    },
    Eof,
}

impl AgentMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            AgentMessage::Patches { .. } => MessageKind::Patches,
            AgentMessage::Ping => MessageKind::Ping,
            AgentMessage::RestartActivity => MessageKind::RestartActivity,
            AgentMessage::ShowToast { .. } => MessageKind::ShowToast,
            AgentMessage::Eof => MessageKind::Eof,
        }
    }

    /// Whether the agent answers this message with a boolean byte
    pub fn expects_reply(&self) -> bool {
        matches!(self, AgentMessage::Patches { .. } | AgentMessage::Ping)
    }

    /// Short description for logging
    pub fn description(&self) -> &'static str {
        match self {
            AgentMessage::Patches { .. } => "patches",
            AgentMessage::Ping => "ping",
            AgentMessage::RestartActivity => "restart activity",
            AgentMessage::ShowToast { .. } => "show toast",
            AgentMessage::Eof => "eof",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a message into one buffer.
///
/// Fails before producing any bytes if a path or payload cannot be framed.
pub fn encode_message(message: &AgentMessage) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len_hint(message));
    out.extend_from_slice(&PROTOCOL_IDENTIFIER.to_be_bytes());
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out.extend_from_slice(&message.kind().id().to_be_bytes());

    match message {
        AgentMessage::Patches { patches, mode } => {
            write_len(&mut out, patches.len())?;
            for patch in patches {
                write_utf(&mut out, patch.path())?;
                write_len(&mut out, patch.len())?;
                out.extend_from_slice(patch.data());
            }
            out.extend_from_slice(&mode.id().to_be_bytes());
        }
        AgentMessage::ShowToast { text } => write_utf(&mut out, text)?,
        AgentMessage::Ping | AgentMessage::RestartActivity | AgentMessage::Eof => {}
    }

    Ok(out)
}

/// Encode a patches message
pub fn encode_patches(patches: &[ApplicationPatch], mode: UpdateMode) -> Result<Vec<u8>> {
    encode_message(&AgentMessage::Patches {
        patches: patches.to_vec(),
        mode,
    })
}

fn encoded_len_hint(message: &AgentMessage) -> usize {
    let header = 8 + 4 + 4;
    match message {
        AgentMessage::Patches { patches, .. } => {
            header
                + 8
                + patches
                    .iter()
                    .map(|p| 2 + p.path().len() + 4 + p.len())
                    .sum::<usize>()
        }
        AgentMessage::ShowToast { text } => header + 2 + text.len(),
        _ => header,
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = i32::try_from(len)
        .map_err(|_| Error::protocol(format!("length {} does not fit the wire format", len)))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_utf(out: &mut Vec<u8>, value: &str) -> Result<()> {
    let encoded = to_modified_utf8(value);
    let len = u16::try_from(encoded.len()).map_err(|_| {
        Error::protocol(format!(
            "string of {} bytes is too long for the wire format",
            encoded.len()
        ))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&encoded);
    Ok(())
}

/// Encode UTF-16 code units the way `DataOutput.writeUTF` does
fn to_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Read one complete message from `reader`.
///
/// Used by the agent side (and the mock agent in tests). Rejects a bad magic
/// identifier or version before reading anything else.
pub async fn read_message<R>(reader: &mut R) -> Result<AgentMessage>
where
    R: AsyncRead + Unpin,
{
    let magic = reader.read_u64().await.map_err(truncated)?;
    if magic != PROTOCOL_IDENTIFIER {
        return Err(Error::protocol_mismatch(format!(
            "unexpected magic identifier {:#x}",
            magic
        )));
    }

    let version = reader.read_i32().await.map_err(truncated)?;
    if version != PROTOCOL_VERSION {
        return Err(Error::protocol_mismatch(format!(
            "agent speaks version {}, got {}",
            PROTOCOL_VERSION, version
        )));
    }

    let kind_id = reader.read_i32().await.map_err(truncated)?;
    let kind = MessageKind::from_id(kind_id)
        .ok_or_else(|| Error::protocol(format!("unknown message kind {}", kind_id)))?;

    match kind {
        MessageKind::Patches => {
            let count = read_len(reader, MAX_PATCH_COUNT).await?;
            let mut patches = Vec::with_capacity(count);
            for _ in 0..count {
                let path = read_utf(reader).await?;
                let len = read_len(reader, MAX_PAYLOAD_LEN).await?;
                let mut data = vec![0u8; len];
                reader.read_exact(&mut data).await.map_err(truncated)?;
                patches.push(ApplicationPatch::new(path, data));
            }
            let mode_id = reader.read_i32().await.map_err(truncated)?;
            let mode = UpdateMode::from_id(mode_id)
                .ok_or_else(|| Error::protocol(format!("unknown update mode {}", mode_id)))?;
            Ok(AgentMessage::Patches { patches, mode })
        }
        MessageKind::Ping => Ok(AgentMessage::Ping),
        MessageKind::RestartActivity => Ok(AgentMessage::RestartActivity),
        MessageKind::ShowToast => {
            let text = read_utf(reader).await?;
            Ok(AgentMessage::ShowToast { text })
        }
        MessageKind::Eof => Ok(AgentMessage::Eof),
    }
}

/// Decode a message held entirely in memory
pub async fn decode_message(bytes: &[u8]) -> Result<AgentMessage> {
    let mut reader = bytes;
    read_message(&mut reader).await
}

/// Interpret the agent's one-byte reply
pub fn decode_reply(byte: u8) -> bool {
    byte != 0
}

async fn read_len<R>(reader: &mut R, max: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_i32().await.map_err(truncated)?;
    let len = usize::try_from(len)
        .map_err(|_| Error::protocol(format!("negative length {}", len)))?;
    if len > max {
        return Err(Error::protocol(format!(
            "length {} exceeds limit {}",
            len, max
        )));
    }
    Ok(len)
}

async fn read_utf<R>(reader: &mut R) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await.map_err(truncated)? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(truncated)?;
    from_modified_utf8(&buf)
}

/// Decode what [`to_modified_utf8`] produces
fn from_modified_utf8(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(first) = iter.next() {
        let unit = match first {
            0x01..=0x7F => u16::from(first),
            0xC0..=0xDF => {
                let second = continuation(iter.next())?;
                (u16::from(first & 0x1F) << 6) | second
            }
            0xE0..=0xEF => {
                let second = continuation(iter.next())?;
                let third = continuation(iter.next())?;
                (u16::from(first & 0x0F) << 12) | (second << 6) | third
            }
            _ => {
                return Err(Error::protocol(format!(
                    "invalid modified UTF-8 byte {:#04x}",
                    first
                )))
            }
        };
        units.push(unit);
    }
    String::from_utf16(&units).map_err(|e| Error::protocol(format!("invalid UTF string: {}", e)))
}

fn continuation(byte: Option<u8>) -> Result<u16> {
    match byte {
        Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
        _ => Err(Error::protocol("truncated modified UTF-8 sequence")),
    }
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::protocol("truncated message")
    } else {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irun_core::{RELOAD_DEX_PATCH, RESOURCES_PATCH, RESTART_DEX_PATCH};

    fn sample_patches() -> Vec<ApplicationPatch> {
        vec![
            ApplicationPatch::new(RESTART_DEX_PATCH, vec![0xDE, 0xAD]),
            ApplicationPatch::new(RELOAD_DEX_PATCH, vec![0xBE, 0xEF, 0x01]),
            ApplicationPatch::new(RESOURCES_PATCH, Vec::new()),
        ]
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode_message(&AgentMessage::Ping).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 0x35, 0x10, 0x71, 0x24]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 4]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 2]);
    }

    #[test]
    fn test_patches_layout() {
        let patches = vec![ApplicationPatch::new("ab", vec![7, 8, 9])];
        let bytes = encode_patches(&patches, UpdateMode::WarmSwap).unwrap();

        let body = &bytes[16..];
        assert_eq!(&body[0..4], &[0, 0, 0, 1], "patch count");
        assert_eq!(&body[4..6], &[0, 2], "path length");
        assert_eq!(&body[6..8], b"ab");
        assert_eq!(&body[8..12], &[0, 0, 0, 3], "data length");
        assert_eq!(&body[12..15], &[7, 8, 9]);
        assert_eq!(&body[15..19], &[0, 0, 0, 2], "update mode id");
        assert_eq!(body.len(), 19);
    }

    #[tokio::test]
    async fn test_patches_round_trip_preserves_order() {
        let patches = sample_patches();
        let bytes = encode_patches(&patches, UpdateMode::WarmSwap).unwrap();

        match decode_message(&bytes).await.unwrap() {
            AgentMessage::Patches {
                patches: decoded,
                mode,
            } => {
                assert_eq!(mode, UpdateMode::WarmSwap);
                let pairs: Vec<(&str, &[u8])> =
                    decoded.iter().map(|p| (p.path(), p.data())).collect();
                let expected: Vec<(&str, &[u8])> =
                    patches.iter().map(|p| (p.path(), p.data())).collect();
                assert_eq!(pairs, expected);
            }
            other => panic!("expected patches, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_update_mode_survives_encoding() {
        for mode in UpdateMode::ALL {
            let bytes = encode_patches(&[], mode).unwrap();
            let decoded = decode_message(&bytes).await.unwrap();
            assert_eq!(
                decoded,
                AgentMessage::Patches {
                    patches: Vec::new(),
                    mode
                }
            );
        }
    }

    #[tokio::test]
    async fn test_toast_round_trip() {
        let message = AgentMessage::ShowToast {
            text: "Applied changes ✓".to_string(),
        };
        let bytes = encode_message(&message).unwrap();
        assert_eq!(decode_message(&bytes).await.unwrap(), message);
    }

    #[test]
    fn test_strings_use_modified_utf8() {
        // NUL is two bytes, never a raw zero
        assert_eq!(to_modified_utf8("a\0b"), vec![b'a', 0xC0, 0x80, b'b']);
        // U+1F600 is the surrogate pair D83D DE00, three bytes each
        assert_eq!(
            to_modified_utf8("\u{1F600}"),
            vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]
        );
        // BMP characters match standard UTF-8
        assert_eq!(to_modified_utf8("é✓"), "é✓".as_bytes());
    }

    #[tokio::test]
    async fn test_toast_with_emoji_and_nul() {
        let message = AgentMessage::ShowToast {
            text: "Done \u{1F680}\0".to_string(),
        };
        let bytes = encode_message(&message).unwrap();

        // u16 length, then 5 ASCII bytes, 6 for the surrogate pair, 2 for NUL
        assert_eq!(&bytes[16..18], &[0, 13]);
        assert!(!bytes[18..].contains(&0));
        assert_eq!(decode_message(&bytes).await.unwrap(), message);
    }

    #[test]
    fn test_rejects_raw_nul_and_broken_sequences() {
        assert!(from_modified_utf8(&[b'a', 0x00]).is_err());
        assert!(from_modified_utf8(&[0xE2, 0x9C]).is_err());
        assert!(from_modified_utf8(&[0xC3, b'a']).is_err());
    }

    #[tokio::test]
    async fn test_rejects_bad_magic() {
        let mut bytes = encode_message(&AgentMessage::Ping).unwrap();
        bytes[7] ^= 0xFF;
        let err = decode_message(&bytes).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_rejects_other_version() {
        let mut bytes = encode_message(&AgentMessage::Ping).unwrap();
        bytes[11] = 3;
        let err = decode_message(&bytes).await.unwrap_err();
        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_rejects_unknown_kind() {
        let mut bytes = encode_message(&AgentMessage::Ping).unwrap();
        bytes[15] = 42;
        let err = decode_message(&bytes).await.unwrap_err();
        assert!(err.to_string().contains("unknown message kind 42"));
    }

    #[tokio::test]
    async fn test_rejects_truncated_input() {
        let bytes = encode_patches(&sample_patches(), UpdateMode::HotSwap).unwrap();
        let err = decode_message(&bytes[..bytes.len() - 2]).await.unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_length() {
        let mut bytes = encode_message(&AgentMessage::Ping).unwrap();
        bytes[15] = 1; // patches
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&1u16.to_be_bytes());
        bytes.push(b'x');
        bytes.extend_from_slice(&i32::MAX.to_be_bytes());
        let err = decode_message(&bytes).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[tokio::test]
    async fn test_reads_from_chunked_stream() {
        let bytes = encode_patches(&sample_patches(), UpdateMode::HotSwap).unwrap();
        let (first, rest) = bytes.split_at(10);
        let mut stream = tokio_test::io::Builder::new()
            .read(first)
            .read(rest)
            .build();

        let message = read_message(&mut stream).await.unwrap();
        assert_eq!(message.kind(), MessageKind::Patches);
    }

    #[test]
    fn test_rejects_overlong_path() {
        let path = "p".repeat(u16::MAX as usize + 1);
        let err = encode_patches(&[ApplicationPatch::new(path, Vec::new())], UpdateMode::HotSwap)
            .unwrap_err();
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_reply_values() {
        assert!(decode_reply(1));
        assert!(decode_reply(0xFF));
        assert!(!decode_reply(0));
    }

    #[test]
    fn test_expects_reply() {
        assert!(AgentMessage::Ping.expects_reply());
        assert!(AgentMessage::Patches {
            patches: Vec::new(),
            mode: UpdateMode::HotSwap
        }
        .expects_reply());
        assert!(!AgentMessage::RestartActivity.expects_reply());
        assert!(!AgentMessage::Eof.expects_reply());
    }

    #[test]
    fn test_message_kind_ids() {
        for kind in [
            MessageKind::Patches,
            MessageKind::Ping,
            MessageKind::RestartActivity,
            MessageKind::ShowToast,
            MessageKind::Eof,
        ] {
            assert_eq!(MessageKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(MessageKind::Patches.id(), 1);
        assert_eq!(MessageKind::Ping.id(), 2);
    }
}
