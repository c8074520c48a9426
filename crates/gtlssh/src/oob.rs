//! Out-of-band frame encoders shared by [`crate::winch`] and
//! [`crate::portfwd`]. Both ride the mux control channel via
//! `MuxEndpoint::write(buf, aux=["oob"])`; this module only builds the byte
//! layouts, leaving the actual send to the caller.

/// The 11-byte WINCH frame: `'w' | u16 len=8 | u16 rows | u16 cols | u16
/// xpixel | u16 ypixel`.
pub fn encode_winch(rows: u16, cols: u16, xpixel: u16, ypixel: u16) -> [u8; 11] {
    let mut buf = [0u8; 11];
    buf[0] = b'w';
    buf[1..3].copy_from_slice(&8u16.to_be_bytes());
    buf[3..5].copy_from_slice(&rows.to_be_bytes());
    buf[5..7].copy_from_slice(&cols.to_be_bytes());
    buf[7..9].copy_from_slice(&xpixel.to_be_bytes());
    buf[9..11].copy_from_slice(&ypixel.to_be_bytes());
    buf
}

/// The remote-port-forward registration frame: `'r' | ' ' | ' ' | u16
/// body_len | service(4 ascii) | accepter_str | '\0'`, with bytes 1-2
/// overwritten to the big-endian length of everything from `service` on.
/// The exact layout expected by a real peer implementation is
/// under-specified upstream; this choice keeps the shape consistent with
/// the WINCH frame's own "tag then declared-length body" convention.
pub fn encode_remote_forward(service: &str, accepter_str: &str) -> Vec<u8> {
    debug_assert_eq!(service.len(), 4, "service ids are always 4 ascii digits");
    let mut buf = Vec::with_capacity(3 + 4 + accepter_str.len() + 1);
    buf.push(b'r');
    buf.push(b' ');
    buf.push(b' ');
    buf.extend_from_slice(service.as_bytes());
    buf.extend_from_slice(accepter_str.as_bytes());
    buf.push(0);
    let body_len = (buf.len() - 3) as u16;
    buf[1..3].copy_from_slice(&body_len.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winch_frame_layout() {
        let f = encode_winch(24, 80, 640, 480);
        assert_eq!(f[0], b'w');
        assert_eq!(u16::from_be_bytes([f[1], f[2]]), 8);
        assert_eq!(u16::from_be_bytes([f[3], f[4]]), 24);
        assert_eq!(u16::from_be_bytes([f[5], f[6]]), 80);
    }

    #[test]
    fn remote_forward_frame_layout() {
        let f = encode_remote_forward("0001", "tcp,localhost,2000");
        assert_eq!(f[0], b'r');
        assert_eq!(&f[3..7], b"0001");
        let body_len = u16::from_be_bytes([f[1], f[2]]);
        assert_eq!(body_len as usize, f.len() - 3);
        assert_eq!(*f.last().unwrap(), 0);
    }
}
