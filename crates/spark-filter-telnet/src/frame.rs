//! Byte-level telnet scanning: IAC byte-stuffing of in-band data plus
//! negotiation (`WILL`/`WONT`/`DO`/`DONT`) and subnegotiation (`SB ... SE`)
//! commands, grounded on the classic telnet option-negotiation shape that
//! RFC 2217's COM-PORT-OPTION layers on top of.
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const IAC: u8 = 255;
pub const SB: u8 = 250;
pub const SE: u8 = 240;
pub const WILL: u8 = 251;
pub const WONT: u8 = 252;
pub const DO: u8 = 253;
pub const DONT: u8 = 254;

/// The COM-PORT-OPTION negotiated for RFC 2217 line/modem control.
pub const COM_PORT_OPTION: u8 = 44;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    Data(Bytes),
    Will(u8),
    Wont(u8),
    Do(u8),
    Dont(u8),
    Subneg(u8, Bytes),
}

pub fn encode_negotiation(cmd: u8, option: u8) -> Bytes {
    Bytes::from(vec![IAC, cmd, option])
}

pub fn encode_subneg(option: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len() + 2);
    buf.put_u8(IAC);
    buf.put_u8(SB);
    buf.put_u8(option);
    buf.put_slice(payload);
    buf.put_u8(IAC);
    buf.put_u8(SE);
    buf.freeze()
}

/// Doubles every literal `0xFF` byte in outbound in-band data, the telnet
/// byte-stuffing rule that lets `0xFF` appear in the data stream without
/// being mistaken for the start of a command.
pub fn escape_data(data: &[u8]) -> Bytes {
    if !data.contains(&IAC) {
        return Bytes::copy_from_slice(data);
    }
    let mut buf = BytesMut::with_capacity(data.len() + 4);
    for &b in data {
        buf.put_u8(b);
        if b == IAC {
            buf.put_u8(IAC);
        }
    }
    buf.freeze()
}

/// Scans as much of `buf` as forms complete telnet units (plain-data runs,
/// negotiation commands, subnegotiations), consuming those bytes and
/// returning the events they produced. A trailing incomplete command (an
/// `IAC` with no command byte yet, or an unterminated `SB ... SE`) is left
/// in `buf` for the next call once more bytes have arrived.
///
/// Subnegotiation payloads are assumed not to contain a doubled `IAC`
/// themselves — real RFC 2217 COM-PORT-OPTION payloads are short fixed
/// command/value pairs, never raw data, so this holds for every
/// subnegotiation this filter generates or consumes.
pub fn scan(buf: &mut BytesMut) -> Vec<TelnetEvent> {
    let mut events = Vec::new();
    let len = buf.len();
    let mut i = 0;
    let mut run_start = 0;
    let mut consumed = 0;

    while i < len {
        if buf[i] != IAC {
            i += 1;
            continue;
        }
        if i > run_start {
            events.push(TelnetEvent::Data(Bytes::copy_from_slice(&buf[run_start..i])));
        }
        if i + 1 >= len {
            break;
        }
        let cmd = buf[i + 1];
        match cmd {
            IAC => {
                events.push(TelnetEvent::Data(Bytes::copy_from_slice(&buf[i..i + 1])));
                i += 2;
            }
            WILL | WONT | DO | DONT => {
                if i + 2 >= len {
                    break;
                }
                let option = buf[i + 2];
                events.push(match cmd {
                    WILL => TelnetEvent::Will(option),
                    WONT => TelnetEvent::Wont(option),
                    DO => TelnetEvent::Do(option),
                    _ => TelnetEvent::Dont(option),
                });
                i += 3;
            }
            SB => match find_iac_se(&buf[i + 2..len]) {
                Some(se_offset) => {
                    let option = buf[i + 2];
                    let payload = Bytes::copy_from_slice(&buf[i + 3..i + 2 + se_offset]);
                    events.push(TelnetEvent::Subneg(option, payload));
                    i = i + 2 + se_offset + 2;
                }
                None => break,
            },
            _ => {
                // NOP, DM, AYT, GA, and friends: not meaningful here, drop.
                i += 2;
            }
        }
        run_start = i;
        consumed = i;
    }

    if i >= len && run_start < len {
        events.push(TelnetEvent::Data(Bytes::copy_from_slice(&buf[run_start..len])));
        consumed = len;
    }

    buf.advance(consumed);
    events
}

/// Looks for `IAC SE` within `slice`, whose first byte is the subnegotiation
/// option id (never itself `IAC`, since option ids used here are small
/// constants); returns the offset of the `IAC` byte if found.
fn find_iac_se(slice: &[u8]) -> Option<usize> {
    let mut j = 1;
    while j + 1 < slice.len() {
        if slice[j] == IAC && slice[j + 1] == SE {
            return Some(j);
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_data_with_no_iac_passes_through_whole() {
        let mut buf = BytesMut::from(&b"hello world"[..]);
        let events = scan(&mut buf);
        assert_eq!(events, vec![TelnetEvent::Data(Bytes::from_static(b"hello world"))]);
        assert!(buf.is_empty());
    }

    #[test]
    fn escaped_iac_byte_round_trips_as_data() {
        let escaped = escape_data(&[1, 2, IAC, 3]);
        assert_eq!(&escaped[..], &[1, 2, IAC, IAC, 3]);
        let mut buf = BytesMut::from(&escaped[..]);
        let events = scan(&mut buf);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(Bytes::from_static(&[1, 2])),
                TelnetEvent::Data(Bytes::from_static(&[IAC])),
                TelnetEvent::Data(Bytes::from_static(&[3])),
            ]
        );
    }

    #[test]
    fn decodes_a_will_command_surrounded_by_data() {
        let mut buf = BytesMut::from(&b"abc"[..]);
        buf.extend_from_slice(&encode_negotiation(WILL, COM_PORT_OPTION));
        buf.extend_from_slice(b"def");
        let events = scan(&mut buf);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(Bytes::from_static(b"abc")),
                TelnetEvent::Will(COM_PORT_OPTION),
                TelnetEvent::Data(Bytes::from_static(b"def")),
            ]
        );
    }

    #[test]
    fn incomplete_negotiation_is_left_for_the_next_call() {
        let mut buf = BytesMut::from(&[IAC, WILL][..]);
        let events = scan(&mut buf);
        assert!(events.is_empty());
        assert_eq!(&buf[..], &[IAC, WILL]);
        buf.put_u8(COM_PORT_OPTION);
        let events = scan(&mut buf);
        assert_eq!(events, vec![TelnetEvent::Will(COM_PORT_OPTION)]);
    }

    #[test]
    fn decodes_a_subnegotiation() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_subneg(COM_PORT_OPTION, &[5, 5]));
        let events = scan(&mut buf);
        assert_eq!(events, vec![TelnetEvent::Subneg(COM_PORT_OPTION, Bytes::from_static(&[5, 5]))]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_subnegotiation_waits_for_the_terminator() {
        let full = encode_subneg(COM_PORT_OPTION, &[5, 5]);
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(scan(&mut buf).is_empty());
        buf.extend_from_slice(&full[full.len() - 1..]);
        let events = scan(&mut buf);
        assert_eq!(events, vec![TelnetEvent::Subneg(COM_PORT_OPTION, Bytes::from_static(&[5, 5]))]);
    }
}
