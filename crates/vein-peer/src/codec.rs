use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::CodecError;
use crate::packet::{Correlation, Packet};

const MAX_TYPE_LEN: usize = u16::MAX as usize;
const MAX_USERNAME_LEN: usize = u16::MAX as usize;
const UUID_LEN: usize = 16;

const MARKER_NONE: u8 = 0;
const MARKER_REQUEST: u8 = 1;
const MARKER_REPLY: u8 = 2;

/// Turns packets into frame payloads and back.
///
/// A connection treats any decode failure as a protocol error and closes.
pub trait PacketCodec: Send + Sync + 'static {
    /// Encode a packet into one frame payload.
    fn encode(&self, packet: &Packet) -> Result<Bytes, CodecError>;

    /// Decode one frame payload into a packet.
    fn decode(&self, bytes: Bytes) -> Result<Packet, CodecError>;
}

/// Default big-endian binary packet codec.
///
/// ```text
/// ┌──────────┬──────┬──────────┬──────────┬──────┬────────┬────────────┬─────────┐
/// │ type len │ type │ sender   │ user len │ user │ marker │ corr. id   │ payload │
/// │ (2B BE)  │ utf8 │ (16B)    │ (2B BE)  │ utf8 │ (1B)   │ (16B, opt) │ (rest)  │
/// └──────────┴──────┴──────────┴──────────┴──────┴────────┴────────────┴─────────┘
/// ```
///
/// Marker: 0 = uncorrelated, 1 = request, 2 = reply. The correlation id is
/// present only when the marker is non-zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

impl PacketCodec for BinaryCodec {
    fn encode(&self, packet: &Packet) -> Result<Bytes, CodecError> {
        if packet.packet_type.is_empty() {
            return Err(CodecError::EmptyType);
        }
        check_len("type", packet.packet_type.len(), MAX_TYPE_LEN)?;
        check_len("username", packet.sender_username.len(), MAX_USERNAME_LEN)?;

        let mut dst = BytesMut::with_capacity(
            2 + packet.packet_type.len()
                + UUID_LEN
                + 2
                + packet.sender_username.len()
                + 1
                + UUID_LEN
                + packet.payload.len(),
        );
        dst.put_u16(packet.packet_type.len() as u16);
        dst.put_slice(packet.packet_type.as_bytes());
        dst.put_slice(packet.sender_id.as_bytes());
        dst.put_u16(packet.sender_username.len() as u16);
        dst.put_slice(packet.sender_username.as_bytes());
        match packet.correlation {
            None => dst.put_u8(MARKER_NONE),
            Some(Correlation::Request(id)) => {
                dst.put_u8(MARKER_REQUEST);
                dst.put_slice(id.as_bytes());
            }
            Some(Correlation::Reply(id)) => {
                dst.put_u8(MARKER_REPLY);
                dst.put_slice(id.as_bytes());
            }
        }
        dst.put_slice(&packet.payload);
        Ok(dst.freeze())
    }

    fn decode(&self, mut src: Bytes) -> Result<Packet, CodecError> {
        let packet_type = read_string(&mut src, "type")?;
        if packet_type.is_empty() {
            return Err(CodecError::EmptyType);
        }
        let sender_id = read_uuid(&mut src, "sender id")?;
        let sender_username = read_string(&mut src, "username")?;

        ensure(&src, 1, "correlation marker")?;
        let correlation = match src.get_u8() {
            MARKER_NONE => None,
            MARKER_REQUEST => Some(Correlation::Request(read_uuid(&mut src, "correlation id")?)),
            MARKER_REPLY => Some(Correlation::Reply(read_uuid(&mut src, "correlation id")?)),
            other => return Err(CodecError::InvalidCorrelationMarker(other)),
        };

        Ok(Packet {
            packet_type,
            sender_id,
            sender_username,
            correlation,
            payload: src,
        })
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), CodecError> {
    if len > max {
        return Err(CodecError::FieldTooLong { field, len, max });
    }
    Ok(())
}

fn ensure(src: &Bytes, needed: usize, field: &'static str) -> Result<(), CodecError> {
    if src.remaining() < needed {
        return Err(CodecError::Truncated { field });
    }
    Ok(())
}

fn read_string(src: &mut Bytes, field: &'static str) -> Result<String, CodecError> {
    ensure(src, 2, field)?;
    let len = src.get_u16() as usize;
    ensure(src, len, field)?;
    let raw = src.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn read_uuid(src: &mut Bytes, field: &'static str) -> Result<Uuid, CodecError> {
    ensure(src, UUID_LEN, field)?;
    let mut raw = [0u8; UUID_LEN];
    src.copy_to_slice(&mut raw);
    Ok(Uuid::from_bytes(raw))
}
