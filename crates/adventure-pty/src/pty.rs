use std::io::{self, Read, Write};
use std::os::fd::BorrowedFd;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, SpecialCharacterIndices};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize, SlavePty};

use crate::session::SessionConfig;

/// How often [`PtyHandle::terminate`] polls the child while waiting for it to exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors from PTY operations.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY spawn failed: {0}")]
    Spawn(String),
    #[error("PTY raw mode failed: {0}")]
    RawMode(String),
    #[error("PTY I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PtyError {
    /// True for failures that happen before a child process is running.
    pub fn is_spawn(&self) -> bool {
        matches!(self, PtyError::Spawn(_) | PtyError::RawMode(_))
    }
}

/// Owns a portable-pty child process, both sides of the PTY pair, and the writer.
///
/// The reader half is handed out by [`PtyHandle::spawn`] so it can live on
/// the drain thread. Everything else stays here until [`PtyHandle::close`].
pub struct PtyHandle {
    master: Option<Box<dyn MasterPty + Send>>,
    slave: Option<Box<dyn SlavePty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyHandle {
    /// Open a PTY in raw mode and spawn `config.program` on its subordinate side.
    ///
    /// Returns the handle together with a reader on the master side.
    pub fn spawn(config: &SessionConfig) -> Result<(Self, Box<dyn Read + Send>), PtyError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(format!("failed to open PTY: {e}")))?;

        // Raw mode has to be in place before the child inherits the terminal.
        set_raw_mode(pair.master.as_ref())?;

        let mut cmd = CommandBuilder::new(&config.program);
        cmd.args(&config.args);
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(format!("failed to spawn {}: {e}", config.program)))?;

        let halves = pair
            .master
            .try_clone_reader()
            .map_err(|e| format!("failed to clone reader: {e}"))
            .and_then(|reader| {
                pair.master
                    .take_writer()
                    .map(|writer| (reader, writer))
                    .map_err(|e| format!("failed to take writer: {e}"))
            });

        let (reader, writer) = match halves {
            Ok(halves) => halves,
            Err(msg) => {
                // The child is already running; don't leave it behind.
                let _ = child.kill();
                let _ = child.wait();
                return Err(PtyError::Spawn(msg));
            }
        };

        Ok((
            Self {
                master: Some(pair.master),
                slave: Some(pair.slave),
                writer: Some(writer),
                child,
            },
            reader,
        ))
    }

    /// Write bytes to the PTY master (our input -> child).
    ///
    /// Fails with a `BrokenPipe` I/O error once the handle has been closed.
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "PTY has been closed"))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    /// Process id of the child, if the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&mut self) -> bool {
        self.try_wait().is_none()
    }

    /// Get the child process exit status if it has exited.
    ///
    /// Returns `None` if the process is still running.
    pub fn try_wait(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            _ => None,
        }
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }

    /// Close the subordinate side, the writer, and the master.
    ///
    /// The drain thread's cloned reader sees EOF or EIO once the child is
    /// gone too, which is its only shutdown signal.
    pub fn close(&mut self) {
        drop(self.slave.take());
        drop(self.writer.take());
        drop(self.master.take());
    }

    /// Send SIGTERM, wait up to `grace` for the child to exit, then kill it.
    ///
    /// Always reaps the child before returning. Returns its exit code.
    pub fn terminate(&mut self, grace: Duration) -> Result<u32, PtyError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status.exit_code());
        }

        if let Some(pid) = self.child.process_id() {
            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("failed to send SIGTERM to {pid}: {e}"),
            }
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.exit_code());
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        warn!(
            "child {:?} still running {}ms after SIGTERM, killing",
            self.child.process_id(),
            grace.as_millis()
        );
        if let Err(e) = self.child.kill() {
            // Usually means it exited between the last poll and now.
            debug!("kill after grace period failed: {e}");
        }
        let status = self.child.wait()?;
        Ok(status.exit_code())
    }
}

/// Put the terminal behind `master` into raw mode: no line discipline
/// translation, no echo, no signal-generating characters.
///
/// VEOF is cleared as well. portable-pty's writer types `\n` plus the EOF
/// character into the child when it is dropped, unless EOF is unset.
fn set_raw_mode(master: &dyn MasterPty) -> Result<(), PtyError> {
    let fd = master
        .as_raw_fd()
        .ok_or_else(|| PtyError::RawMode("master has no file descriptor".to_string()))?;
    // SAFETY: `fd` is owned by `master`, which outlives this borrow.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };

    let mut termios = tcgetattr(fd).map_err(|e| PtyError::RawMode(format!("tcgetattr: {e}")))?;
    cfmakeraw(&mut termios);
    termios.control_chars[SpecialCharacterIndices::VEOF as usize] = 0;
    tcsetattr(fd, SetArg::TCSANOW, &termios)
        .map_err(|e| PtyError::RawMode(format!("tcsetattr: {e}")))?;
    Ok(())
}
