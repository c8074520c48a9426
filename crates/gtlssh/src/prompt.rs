//! Interactive prompts that bypass stdin/stdout in favor of the controlling
//! terminal directly, the way `getpassword()` does: password entry must work
//! even when stdin/stdout are themselves the redirected program stream.
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::AsFd;

use nix::sys::termios::{self, LocalFlags, SetArg};

use crate::error::{ClientError, Result};

/// Prompts for a password on `/dev/tty` with echo disabled, restoring the
/// terminal's prior settings no matter how the read ends.
pub fn read_password(prompt: &str) -> Result<String> {
    let mut tty = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
    let original =
        termios::tcgetattr(tty.as_fd()).map_err(|e| ClientError::Config(format!("tcgetattr: {e}")))?;
    let mut raw = original.clone();
    raw.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &raw)
        .map_err(|e| ClientError::Config(format!("tcsetattr: {e}")))?;

    let result = (|| -> Result<String> {
        tty.write_all(prompt.as_bytes())?;
        tty.flush()?;
        let mut pw = String::new();
        let mut byte = [0u8; 1];
        loop {
            if tty.read(&mut byte)? == 0 {
                break;
            }
            match byte[0] {
                b'\r' | b'\n' => break,
                c => pw.push(c as char),
            }
        }
        tty.write_all(b"\n")?;
        Ok(pw)
    })();

    let _ = termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &original);
    result
}

/// A repeated `(y/n)` prompt on the real terminal (never stdin, which may be
/// the program's own data stream), used for TOFU certificate decisions.
pub fn confirm(question: &str) -> Result<bool> {
    let mut tty = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
    loop {
        tty.write_all(question.as_bytes())?;
        tty.write_all(b" (y/n): ")?;
        tty.flush()?;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if tty.read(&mut byte)? == 0 {
                return Err(ClientError::Config("unable to read input, giving up".to_string()));
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
        match line.first() {
            Some(b'y') => return Ok(true),
            Some(b'n') => return Ok(false),
            _ => continue,
        }
    }
}
