//! Wire framing for the identity handshake exchanged once, at the front of
//! the stream, before `certauth` hands control to its own user: `u8
//! frame_type | ...`. Unlike `spark-filter-mux`'s framing this carries no
//! ongoing multiplexing — exactly one request and one response are ever
//! decoded per endpoint, after which the filter becomes a transparent
//! pass-through and this module is no longer consulted.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use spark_core::SparkError;

const REQUEST: u8 = 1;
const RESPONSE: u8 = 2;

pub enum AuthFrame {
    Request { username: String, password: Option<String> },
    Response { ok: bool },
}

pub fn encode_request(username: &str, password: Option<&str>) -> Bytes {
    let username = username.as_bytes();
    let password = password.map(str::as_bytes);
    let mut buf = BytesMut::with_capacity(1 + 2 + username.len() + 1 + 2 + password.map_or(0, <[u8]>::len));
    buf.put_u8(REQUEST);
    buf.put_u16(username.len() as u16);
    buf.put_slice(username);
    match password {
        Some(password) => {
            buf.put_u8(1);
            buf.put_u16(password.len() as u16);
            buf.put_slice(password);
        }
        None => buf.put_u8(0),
    }
    buf.freeze()
}

pub fn encode_response(ok: bool) -> Bytes {
    Bytes::from(vec![RESPONSE, u8::from(ok)])
}

/// Pulls exactly one frame off the front of `buf`, if enough bytes have
/// accumulated; leaves `buf` untouched otherwise. Consumes only the bytes
/// belonging to the frame — any trailing bytes (pass-through data arriving
/// in the same read as the handshake frame) are left in `buf` for the
/// caller to forward on.
pub fn try_decode(buf: &mut BytesMut) -> spark_core::Result<Option<AuthFrame>> {
    if buf.is_empty() {
        return Ok(None);
    }
    match buf[0] {
        REQUEST => {
            if buf.len() < 3 {
                return Ok(None);
            }
            let username_len = u16::from_be_bytes(buf[1..3].try_into().unwrap()) as usize;
            if buf.len() < 3 + username_len + 1 {
                return Ok(None);
            }
            let has_password = buf[3 + username_len];
            let total = if has_password != 0 {
                if buf.len() < 3 + username_len + 1 + 2 {
                    return Ok(None);
                }
                let password_len =
                    u16::from_be_bytes(buf[3 + username_len + 1..3 + username_len + 3].try_into().unwrap()) as usize;
                3 + username_len + 1 + 2 + password_len
            } else {
                3 + username_len + 1
            };
            if buf.len() < total {
                return Ok(None);
            }
            buf.advance(1);
            let username = String::from_utf8_lossy(&buf.split_to(username_len)).into_owned();
            let has_password = buf.get_u8();
            let password = if has_password != 0 {
                let password_len = buf.get_u16() as usize;
                Some(String::from_utf8_lossy(&buf.split_to(password_len)).into_owned())
            } else {
                None
            };
            Ok(Some(AuthFrame::Request { username, password }))
        }
        RESPONSE => {
            if buf.len() < 2 {
                return Ok(None);
            }
            buf.advance(1);
            let ok = buf.get_u8() != 0;
            Ok(Some(AuthFrame::Response { ok }))
        }
        other => Err(SparkError::Invalid(format!("unknown certauth frame type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request_with_password() {
        let encoded = encode_request("alice", Some("hunter2"));
        let mut buf = BytesMut::from(&encoded[..]);
        match try_decode(&mut buf).unwrap().unwrap() {
            AuthFrame::Request { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_deref(), Some("hunter2"));
            }
            _ => panic!("expected Request"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trips_a_request_without_password() {
        let encoded = encode_request("bob", None);
        let mut buf = BytesMut::from(&encoded[..]);
        match try_decode(&mut buf).unwrap().unwrap() {
            AuthFrame::Request { username, password } => {
                assert_eq!(username, "bob");
                assert!(password.is_none());
            }
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn leaves_trailing_pass_through_bytes_after_the_frame() {
        let mut encoded = BytesMut::from(&encode_response(true)[..]);
        encoded.extend_from_slice(b"plaintext follows");
        match try_decode(&mut encoded).unwrap().unwrap() {
            AuthFrame::Response { ok } => assert!(ok),
            _ => panic!("expected Response"),
        }
        assert_eq!(&encoded[..], b"plaintext follows");
    }

    #[test]
    fn returns_none_on_partial_request() {
        let encoded = encode_request("carol", Some("xyz"));
        let mut buf = BytesMut::from(&encoded[..encoded.len() - 2]);
        assert!(try_decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_frame_type() {
        let mut buf = BytesMut::from(&b"\xFF"[..]);
        assert!(try_decode(&mut buf).is_err());
    }
}
