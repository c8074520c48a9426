//! Wire framing for the multiplexer filter: `u8 frame_type | u32 channel_id
//! | u32 len | payload`. Carries `NEW_CHANNEL(sub_endpoint, service)` plus
//! OOB control data (WINCH, remote-forward registration) over the same
//! inner byte stream once multiplexed.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_core::SparkError;

pub const HEADER_LEN: usize = 1 + 4 + 4;

/// Channel id reserved for control-plane traffic (OOB frames); real
/// channels are allocated starting at 1.
pub const CONTROL_CHANNEL_ID: u32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameType {
    Open = 1,
    Data = 2,
    Close = 3,
    Oob = 4,
}

impl FrameType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(FrameType::Open),
            2 => Some(FrameType::Data),
            3 => Some(FrameType::Close),
            4 => Some(FrameType::Oob),
            _ => None,
        }
    }
}

pub fn encode_frame(frame_type: FrameType, channel_id: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(frame_type as u8);
    buf.put_u32(channel_id);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Pulls one complete frame off the front of `buf`, if enough bytes have
/// accumulated; leaves `buf` untouched (no partial consumption) otherwise.
pub fn try_decode_frame(buf: &mut BytesMut) -> spark_core::Result<Option<(FrameType, u32, Bytes)>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let frame_type_byte = buf[0];
    let channel_id = u32::from_be_bytes(buf[1..5].try_into().unwrap());
    let len = u32::from_be_bytes(buf[5..9].try_into().unwrap()) as usize;
    if buf.len() < HEADER_LEN + len {
        return Ok(None);
    }
    let frame_type = FrameType::from_u8(frame_type_byte)
        .ok_or_else(|| SparkError::Invalid(format!("unknown mux frame type {frame_type_byte}")))?;
    buf.advance(HEADER_LEN);
    let payload = buf.split_to(len).freeze();
    Ok(Some((frame_type, channel_id, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_frame() {
        let encoded = encode_frame(FrameType::Data, 7, b"hello");
        let mut buf = BytesMut::from(&encoded[..]);
        let (frame_type, channel_id, payload) = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame_type, FrameType::Data);
        assert_eq!(channel_id, 7);
        assert_eq!(&payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn returns_none_on_partial_header() {
        let mut buf = BytesMut::from(&b"\x02\x00\x00"[..]);
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
        // The partial bytes must be left untouched for the next feed.
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn returns_none_on_partial_payload_and_decodes_once_complete() {
        let encoded = encode_frame(FrameType::Open, 3, b"login");
        let mut buf = BytesMut::from(&encoded[..encoded.len() - 2]);
        assert!(try_decode_frame(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[encoded.len() - 2..]);
        let (frame_type, channel_id, payload) = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame_type, FrameType::Open);
        assert_eq!(channel_id, 3);
        assert_eq!(&payload[..], b"login");
    }

    #[test]
    fn decodes_two_back_to_back_frames_from_one_feed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(FrameType::Data, 1, b"a"));
        buf.extend_from_slice(&encode_frame(FrameType::Data, 1, b"b"));
        let (_, _, first) = try_decode_frame(&mut buf).unwrap().unwrap();
        let (_, _, second) = try_decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"a");
        assert_eq!(&second[..], b"b");
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_unknown_frame_type() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xFF);
        buf.put_u32(0);
        buf.put_u32(0);
        assert!(try_decode_frame(&mut buf).is_err());
    }
}
