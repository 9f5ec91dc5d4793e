//! Terminal handling for raw mode I/O.
//!
//! Provides:
//! - Raw terminal mode setup/restore
//! - Terminal size detection
//! - Async stdin/stdout streams

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::unix::AsyncFd;
use tracing::{debug, warn};

use wisp_core::{Error, Result};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

/// Original terminal settings to restore on exit.
static ORIGINAL_TERMIOS: Mutex<Option<libc::termios>> = Mutex::new(None);

/// Flag indicating if we're in raw mode.
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Guard that restores terminal settings on drop.
pub struct RawModeGuard {
    fd: RawFd,
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    ///
    /// Returns a guard that restores normal mode on drop.
    pub fn enter() -> Result<Self> {
        let fd = io::stdin().as_raw_fd();

        let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
        let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
        if result != 0 {
            return Err(Error::Terminal {
                message: format!("tcgetattr failed: {}", io::Error::last_os_error()),
            });
        }

        let original = unsafe { termios.assume_init() };

        if let Ok(mut guard) = ORIGINAL_TERMIOS.lock() {
            *guard = Some(original);
        }

        let mut raw = original;

        // Input flags: disable break signal, CR->NL mapping, parity checking,
        // 8th bit stripping, and XON/XOFF flow control
        raw.c_iflag &= !(libc::BRKINT | libc::ICRNL | libc::INPCK | libc::ISTRIP | libc::IXON);

        // Output flags: disable output processing
        raw.c_oflag &= !libc::OPOST;

        // Control flags: set 8-bit characters
        raw.c_cflag |= libc::CS8;

        // Local flags: disable echo, canonical mode, signals, and extended input
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::IEXTEN | libc::ISIG);

        // Control characters: read returns after 1 byte, no timeout
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        let result = unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw) };
        if result != 0 {
            return Err(Error::Terminal {
                message: format!("tcsetattr failed: {}", io::Error::last_os_error()),
            });
        }

        RAW_MODE_ACTIVE.store(true, Ordering::SeqCst);
        debug!("Entered raw terminal mode");

        Ok(Self { fd })
    }

    /// Check if raw mode is currently active.
    pub fn is_active() -> bool {
        RAW_MODE_ACTIVE.load(Ordering::SeqCst)
    }

    /// Restore terminal to original mode.
    fn restore(&self) {
        if let Ok(mut guard) = ORIGINAL_TERMIOS.lock()
            && let Some(original) = guard.take()
        {
            let result = unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &original) };
            if result != 0 {
                warn!("Failed to restore terminal settings");
            } else {
                debug!("Restored terminal settings");
            }
        }
        RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Restore terminal settings without a guard (for fatal-error paths).
pub fn restore_terminal() {
    let fd = io::stdin().as_raw_fd();
    if let Ok(guard) = ORIGINAL_TERMIOS.lock()
        && let Some(ref original) = *guard
    {
        unsafe {
            libc::tcsetattr(fd, libc::TCSAFLUSH, original);
        }
    }
    RAW_MODE_ACTIVE.store(false, Ordering::SeqCst);
}

/// Get the current terminal size.
pub fn get_terminal_size() -> Result<WindowSize> {
    let fd = io::stdout().as_raw_fd();

    let mut winsize = std::mem::MaybeUninit::<libc::winsize>::uninit();
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, winsize.as_mut_ptr()) };

    if result != 0 {
        // Default to 80x24 if we can't get size
        return Ok(WindowSize { cols: 80, rows: 24 });
    }

    let winsize = unsafe { winsize.assume_init() };

    Ok(WindowSize {
        cols: winsize.ws_col,
        rows: winsize.ws_row,
    })
}

/// Async stdin reader using AsyncFd for true async I/O.
///
/// Uses tokio's AsyncFd to poll stdin without blocking threads, so the read
/// can be cancelled when the select! loop exits.
pub struct StdinReader {
    async_fd: AsyncFd<RawFd>,
    fd: RawFd,
}

impl StdinReader {
    /// Create a new stdin reader.
    ///
    /// Sets stdin to non-blocking mode and wraps it in AsyncFd.
    pub fn new() -> Result<Self> {
        let fd = io::stdin().as_raw_fd();

        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }

        let async_fd = AsyncFd::new(fd).map_err(|e| Error::Terminal {
            message: format!("failed to create AsyncFd for stdin: {}", e),
        })?;

        Ok(Self { async_fd, fd })
    }

    /// Read a block of input from stdin.
    ///
    /// Returns None on EOF or error, Some(data) on successful read.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 4096];

        loop {
            let mut guard = match self.async_fd.readable().await {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::error!(error = %e, "stdin readable error");
                    return None;
                }
            };

            match guard.try_io(|inner| {
                let n = unsafe {
                    libc::read(
                        *inner.get_ref(),
                        buf.as_mut_ptr() as *mut libc::c_void,
                        buf.len(),
                    )
                };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            }) {
                Ok(Ok(0)) => {
                    tracing::debug!("stdin EOF");
                    return None;
                }
                Ok(Ok(n)) => {
                    tracing::trace!(len = n, "stdin read");
                    return Some(buf[..n].to_vec());
                }
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "stdin read error");
                    return None;
                }
                Err(_would_block) => {
                    // Spurious wakeup, loop back to wait again
                    continue;
                }
            }
        }
    }
}

impl Drop for StdinReader {
    fn drop(&mut self) {
        // Restore blocking mode for stdin
        unsafe {
            let flags = libc::fcntl(self.fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(self.fd, libc::F_SETFL, flags & !libc::O_NONBLOCK);
            }
        }
    }
}

/// Async stdout writer with retry handling for WouldBlock.
pub struct StdoutWriter {
    stdout: tokio::io::Stdout,
}

impl StdoutWriter {
    /// Create a new stdout writer.
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
        }
    }

    /// Write data to stdout with retry on WouldBlock.
    ///
    /// EAGAIN can happen when the terminal buffer is full during fast
    /// output; yield briefly and retry up to a limit.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        const MAX_RETRIES: u32 = 10;
        const RETRY_DELAY_US: u64 = 100;

        let mut written = 0;
        let mut retries = 0;

        while written < data.len() {
            match self.stdout.write(&data[written..]).await {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stdout write returned 0 bytes",
                    )));
                }
                Ok(n) => {
                    written += n;
                    retries = 0;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        tracing::trace!(
                            written,
                            total = data.len(),
                            "stdout WouldBlock after max retries, partial write"
                        );
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_micros(RETRY_DELAY_US)).await;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }

        // Best effort flush - don't fail on WouldBlock
        if let Err(e) = self.stdout.flush().await
            && e.kind() != io::ErrorKind::WouldBlock
        {
            return Err(Error::Io(e));
        }

        Ok(())
    }
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_terminal_size_returns_valid_dimensions() {
        // In CI there may be no terminal; the fallback still reports
        // something usable.
        let size = get_terminal_size().unwrap();
        assert!(size.cols > 0);
        assert!(size.rows > 0);
    }

    #[test]
    fn raw_mode_guard_tracks_active_state() {
        // Can't actually enter raw mode in tests, but verify the atomic flag
        assert!(!RawModeGuard::is_active());
    }
}
