//! Raw-mode toggling for the local controlling terminal during an
//! interactive session, restored on drop regardless of how the session ends.
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

use crate::error::Result;

/// Holds a raw fd rather than a borrowed one: the guard regularly outlives
/// the `std::io::Stdin`/`Stdout` handle it was constructed from, and stdin's
/// fd 0 stays valid for the life of the process regardless of how many such
/// handles come and go.
pub struct RawModeGuard {
    fd: RawFd,
    original: Termios,
}

impl RawModeGuard {
    /// Puts `fd` into raw-ish mode: no local echo, no canonical line
    /// buffering, no signal-generating control characters — the terminal
    /// discipline an interactive remote shell needs so keystrokes pass
    /// through untouched.
    pub fn enable(fd: BorrowedFd<'_>) -> Result<Self> {
        let original = termios::tcgetattr(fd).map_err(|e| crate::error::ClientError::Config(format!("tcgetattr: {e}")))?;
        let mut raw = original.clone();
        raw.local_flags.remove(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG | LocalFlags::IEXTEN);
        raw.input_flags.remove(
            termios::InputFlags::IXON
                | termios::InputFlags::ICRNL
                | termios::InputFlags::BRKINT
                | termios::InputFlags::INPCK
                | termios::InputFlags::ISTRIP,
        );
        raw.output_flags.remove(termios::OutputFlags::OPOST);
        termios::tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(|e| crate::error::ClientError::Config(format!("tcsetattr: {e}")))?;
        Ok(Self { fd: fd.as_raw_fd(), original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let _ = termios::tcsetattr(fd, SetArg::TCSANOW, &self.original);
    }
}

pub fn is_tty(fd: BorrowedFd<'_>) -> bool {
    nix::unistd::isatty(fd).unwrap_or(false)
}
