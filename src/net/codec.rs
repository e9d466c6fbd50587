//! Length-prefixed binary framing and the message type registry
//!
//! A frame is `type: u16 | length: u32 | payload[length]`, big-endian.
//! Payloads are MessagePack documents encoded with field names.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::error;

use super::protocol::{Message, MsgType};

/// Largest payload accepted from a peer
pub const MAX_FRAME_BYTES: u32 = 1279;

/// Size of the `type | length` header
pub const HEADER_LEN: usize = 6;

/// Framing and payload errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid frame length: 0")]
    EmptyFrame,

    #[error("invalid frame length: {0} (too big, max {MAX_FRAME_BYTES})")]
    FrameTooBig(u32),

    #[error("unknown message type: {0}")]
    UnknownType(u16),

    #[error("payload decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("payload encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("outbound payload of {0} bytes does not fit a frame")]
    PayloadOverflow(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Peer went away, as opposed to sending garbage
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CodecError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof
            || e.kind() == std::io::ErrorKind::ConnectionReset
            || e.kind() == std::io::ErrorKind::ConnectionAborted)
    }
}

type Decoder = fn(&[u8]) -> Result<Message, CodecError>;

struct Entry {
    name: &'static str,
    decode: Decoder,
}

/// Maps wire type codes to payload decoders
///
/// Built once at startup and shared by reference; there is no global table.
pub struct MessageRegistry {
    entries: HashMap<u16, Entry>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry holding the full protocol table
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for msg_type in MsgType::ALL {
            let decode: Decoder = match msg_type {
                MsgType::Ping => |b| Ok(Message::Ping(from_payload(b)?)),
                MsgType::Pong => |b| Ok(Message::Pong(from_payload(b)?)),
                MsgType::Join => |b| Ok(Message::Join(from_payload(b)?)),
                MsgType::Joined => |b| Ok(Message::Joined(from_payload(b)?)),
                MsgType::Stay => |b| Ok(Message::Stay(from_payload(b)?)),
                MsgType::Leave => |b| Ok(Message::Leave(from_payload(b)?)),
                MsgType::GameState => |b| Ok(Message::GameState(from_payload(b)?)),
                MsgType::Move => |b| Ok(Message::Move(from_payload(b)?)),
                MsgType::Build => |b| Ok(Message::Build(from_payload(b)?)),
                MsgType::Repair => |b| Ok(Message::Repair(from_payload(b)?)),
                MsgType::Attack => |b| Ok(Message::Attack(from_payload(b)?)),
                MsgType::Operate => |b| Ok(Message::Operate(from_payload(b)?)),
            };
            registry.register(msg_type.code(), msg_type.name(), decode);
        }
        registry
    }

    /// Register a decoder for a type code
    ///
    /// Registering the same name twice is a no-op. Two names on one code is a
    /// programming error; the first registration wins.
    pub fn register(&mut self, code: u16, name: &'static str, decode: Decoder) {
        if let Some(existing) = self.entries.get(&code) {
            if existing.name != name {
                debug_assert!(false, "message type {code} registered twice");
                error!(
                    code,
                    existing = existing.name,
                    rejected = name,
                    "Message type code collision"
                );
            }
            return;
        }
        self.entries.insert(code, Entry { name, decode });
    }

    pub fn is_registered(&self, code: u16) -> bool {
        self.entries.contains_key(&code)
    }

    /// Decode a payload of the given type
    pub fn decode(&self, code: u16, payload: &[u8]) -> Result<Message, CodecError> {
        let entry = self
            .entries
            .get(&code)
            .ok_or(CodecError::UnknownType(code))?;
        (entry.decode)(payload)
    }

    /// Encode a message into a complete frame
    pub fn encode(&self, msg: &Message) -> Result<Bytes, CodecError> {
        encode_frame(msg)
    }

    /// Read one frame from the stream and decode it
    ///
    /// The declared length is validated before the payload buffer exists.
    pub async fn read_message<R>(&self, reader: &mut R) -> Result<Message, CodecError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;
        let code = u16::from_be_bytes([header[0], header[1]]);
        let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
        check_length(length)?;

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload).await?;
        self.decode(code, &payload)
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_length(length: u32) -> Result<(), CodecError> {
    if length == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if length > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooBig(length));
    }
    Ok(())
}

fn from_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(payload)?)
}

fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Serialize a message with its frame header
pub fn encode_frame(msg: &Message) -> Result<Bytes, CodecError> {
    let payload = match msg {
        Message::Ping(m) => to_payload(m)?,
        Message::Pong(m) => to_payload(m)?,
        Message::Join(m) => to_payload(m)?,
        Message::Joined(m) => to_payload(m)?,
        Message::Stay(m) => to_payload(m)?,
        Message::Leave(m) => to_payload(m)?,
        Message::GameState(m) => to_payload(m)?,
        Message::Move(m) => to_payload(m)?,
        Message::Build(m) => to_payload(m)?,
        Message::Repair(m) => to_payload(m)?,
        Message::Attack(m) => to_payload(m)?,
        Message::Operate(m) => to_payload(m)?,
    };
    let length =
        u32::try_from(payload.len()).map_err(|_| CodecError::PayloadOverflow(payload.len()))?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u16(msg.msg_type().code());
    frame.put_u32(length);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}
