//! PTY hosting for the child shell.
//!
//! Handles:
//! - Spawning the configured shell under a freshly allocated PTY pair
//! - Async I/O on the master side
//! - Terminal resize propagation
//!
//! Uses the `nix` crate for Unix PTY support and `AsyncFd` for proper async
//! I/O integration with tokio's reactor.

use std::ffi::CString;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use nix::pty::{Winsize, openpty};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{ForkResult, Pid, close, dup2, execvp, fork, setsid};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use wisp_core::{Error, Result};

use crate::terminal::WindowSize;

/// PTY handle for async I/O.
///
/// Uses `AsyncFd` so reads and writes integrate with tokio's reactor
/// instead of polling.
pub struct Pty {
    /// Master PTY file descriptor wrapped for async I/O.
    master: Arc<AsyncFd<std::fs::File>>,
    /// Child process PID.
    child_pid: Pid,
    /// Raw master fd for ioctl operations.
    master_fd: RawFd,
}

impl Pty {
    /// Spawn the shell under a new PTY.
    ///
    /// # Arguments
    ///
    /// * `shell` - Shell path (e.g., "/bin/bash").
    /// * `args` - Arguments passed to the shell (everything after `--`).
    /// * `size` - Initial terminal size.
    ///
    /// # Safety
    ///
    /// Uses `fork()`, which is inherently unsafe in multi-threaded programs.
    /// Call it before spawning runtime worker activity beyond the reactor.
    pub fn spawn(shell: &str, args: &[String], size: WindowSize) -> Result<Self> {
        let winsize = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let pty_result = openpty(&winsize, None).map_err(|e| Error::Pty {
            message: format!("failed to open pty: {}", e),
        })?;

        let master_fd = pty_result.master.as_raw_fd();
        let slave_fd = pty_result.slave.as_raw_fd();

        info!(shell = %shell, "Spawning shell");

        let shell_cstr = CString::new(shell).map_err(|e| Error::Pty {
            message: format!("invalid shell path: {}", e),
        })?;

        let mut argv = vec![shell_cstr.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(|e| Error::Pty {
                message: format!("invalid shell argument: {}", e),
            })?);
        }

        // SAFETY: fork() in a process that has not started extra threads yet;
        // the child only calls async-signal-safe functions before exec.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(pty_result.slave);

                let std_file = std::fs::File::from(pty_result.master);
                set_nonblocking(master_fd)?;

                let async_fd = AsyncFd::new(std_file).map_err(|e| Error::Pty {
                    message: format!("failed to create AsyncFd: {}", e),
                })?;

                Ok(Self {
                    master: Arc::new(async_fd),
                    child_pid: child,
                    master_fd,
                })
            }
            Ok(ForkResult::Child) => {
                // Child process - set up the PTY slave as controlling terminal

                setsid().map_err(|e| Error::Pty {
                    message: format!("setsid failed: {}", e),
                })?;

                // TIOCSCTTY request type varies by platform (c_ulong on
                // glibc/macOS, c_int on musl)
                unsafe {
                    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
                }

                dup2(slave_fd, libc::STDIN_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stdin failed: {}", e),
                })?;
                dup2(slave_fd, libc::STDOUT_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stdout failed: {}", e),
                })?;
                dup2(slave_fd, libc::STDERR_FILENO).map_err(|e| Error::Pty {
                    message: format!("dup2 stderr failed: {}", e),
                })?;

                if slave_fd > libc::STDERR_FILENO {
                    let _ = close(slave_fd);
                }
                let _ = close(master_fd);

                // SAFETY: forked child before exec, single-threaded
                if std::env::var("TERM").is_err() {
                    unsafe { std::env::set_var("TERM", "xterm-256color") };
                }

                execvp(&shell_cstr, &argv).map_err(|e| Error::Pty {
                    message: format!("execvp failed: {}", e),
                })?;

                // execvp doesn't return on success
                unreachable!()
            }
            Err(e) => Err(Error::Pty {
                message: format!("fork failed: {}", e),
            }),
        }
    }

    /// Resize the PTY with TIOCSWINSZ.
    pub fn resize(&self, size: WindowSize) -> Result<()> {
        let winsize = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let result = unsafe { libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize) };

        if result == -1 {
            let err = std::io::Error::last_os_error();
            return Err(Error::Pty {
                message: format!("failed to resize pty: {}", err),
            });
        }

        debug!(cols = size.cols, rows = size.rows, "PTY resized");
        Ok(())
    }

    /// Write data to the PTY (terminal input for the shell).
    ///
    /// Waits for write readiness before attempting each write; partial
    /// writes are continued until the whole block is in.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut remaining = data;
        while !remaining.is_empty() {
            let mut guard = self.master.writable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty write readiness: {}", e),
            })?;

            match guard.try_io(|inner| inner.get_ref().write(remaining)) {
                Ok(Ok(n)) => {
                    remaining = &remaining[n..];
                }
                Ok(Err(e)) => {
                    return Err(Error::Pty {
                        message: format!("failed to write to pty: {}", e),
                    });
                }
                Err(_would_block) => {
                    // Readiness was a false positive, loop and wait again
                    continue;
                }
            }
        }
        Ok(())
    }

    /// Read data from the PTY (the shell's output).
    ///
    /// Returns None if the PTY is closed (EOF or the shell exited).
    pub async fn read(&self, buf: &mut [u8]) -> Result<Option<usize>> {
        loop {
            let mut guard = self.master.readable().await.map_err(|e| Error::Pty {
                message: format!("failed to wait for pty read readiness: {}", e),
            })?;

            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(0)) => return Ok(None), // EOF
                Ok(Ok(n)) => return Ok(Some(n)),
                Ok(Err(e)) => {
                    // EIO is common when the PTY slave is closed (shell exit)
                    if e.raw_os_error() == Some(libc::EIO) {
                        debug!("PTY read returned EIO (shell likely exited)");
                        return Ok(None);
                    }
                    return Err(Error::Pty {
                        message: format!("failed to read from pty: {}", e),
                    });
                }
                Err(_would_block) => {
                    continue;
                }
            }
        }
    }

    /// Check if the child process has exited.
    pub fn try_wait(&self) -> Result<Option<i32>> {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(exit_code = code, "Shell process exited");
                Ok(Some(code))
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                info!(signal = ?signal, "Shell process killed by signal");
                Ok(Some(128 + signal as i32))
            }
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(_) => Ok(None), // Other states (stopped, continued)
            Err(nix::errno::Errno::ECHILD) => {
                // Child already reaped
                Ok(Some(0))
            }
            Err(e) => Err(Error::Pty {
                message: format!("failed to check child status: {}", e),
            }),
        }
    }

    /// Kill the child process.
    pub fn kill(&self) -> Result<()> {
        kill(self.child_pid, Signal::SIGTERM).map_err(|e| Error::Pty {
            message: format!("failed to kill child: {}", e),
        })?;
        Ok(())
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Kill the child process if it is still running
        if self.try_wait().ok().flatten().is_none() {
            let _ = self.kill();
        }
    }
}

/// Set a file descriptor to non-blocking mode.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};

    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Pty {
        message: format!("fcntl F_GETFL failed: {}", e),
    })?;

    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;

    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Pty {
        message: format!("fcntl F_SETFL failed: {}", e),
    })?;

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: WindowSize = WindowSize { cols: 80, rows: 24 };

    #[tokio::test]
    async fn pty_spawn_default_shell() {
        // This test may fail in CI without a proper TTY
        let result = Pty::spawn("/bin/sh", &[], SIZE);
        if let Err(e) = &result {
            eprintln!("PTY spawn failed (may be expected in CI): {}", e);
        }
        if let Ok(pty) = result {
            let _ = pty.kill();
        }
    }

    #[tokio::test]
    async fn pty_resize_succeeds_on_live_shell() {
        if let Ok(pty) = Pty::spawn("/bin/sh", &[], SIZE) {
            assert!(pty.resize(WindowSize { cols: 120, rows: 40 }).is_ok());
            let _ = pty.kill();
        }
    }

    #[tokio::test]
    async fn pty_round_trips_bytes_through_cat() {
        // `cat` copies stdin to stdout, so everything written to the master
        // comes back (once through the echoing tty, once from cat itself).
        let Ok(pty) = Pty::spawn("/bin/cat", &[], SIZE) else {
            eprintln!("PTY spawn failed (may be expected in CI)");
            return;
        };

        pty.write(b"hello\n").await.unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !collected.windows(5).any(|w| w == b"hello") {
            let read = tokio::time::timeout_at(deadline, pty.read(&mut buf)).await;
            match read {
                Ok(Ok(Some(n))) => collected.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }

        assert!(
            collected.windows(5).any(|w| w == b"hello"),
            "expected echo of written bytes, got {:?}",
            String::from_utf8_lossy(&collected)
        );
        let _ = pty.kill();
    }
}
