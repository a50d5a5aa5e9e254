use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::Notify;

use crate::decode::Utf8Decoder;
use crate::drain::{DrainLoop, OutputBuffer};
use crate::pty::{PtyError, PtyHandle};

/// The program the bot was originally written around.
pub const DEFAULT_PROGRAM: &str = "/usr/bin/adventure";

const DEFAULT_TERM_GRACE: Duration = Duration::from_millis(500);

/// What to run inside a session and how to shut it down.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory for the child. `None` means ours.
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
    /// How long `stop` waits after SIGTERM before killing the child, and
    /// again for the drain thread to wind down.
    pub term_grace: Duration,
}

impl SessionConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: std::env::current_dir().ok(),
            env: Vec::new(),
            rows: 24,
            cols: 80,
            term_grace: DEFAULT_TERM_GRACE,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

/// A child program running on a PTY, with its output drained in the background.
///
/// Input goes in through [`write`](Self::write) / [`enter`](Self::enter);
/// output piles up in a shared buffer until [`drain`](Self::drain) takes it.
/// There is no completion signal from the child, so callers wait a little
/// between the two (or watch [`output_signal`](Self::output_signal)).
pub struct Session {
    pty: PtyHandle,
    output: Arc<OutputBuffer>,
    decoder: Utf8Decoder,
    drain_loop: Option<DrainLoop>,
    term_grace: Duration,
    exit_code: Option<u32>,
    stopped: bool,
}

impl Session {
    /// Spawn `program` with `args` using default settings.
    pub fn new(program: &str, args: &[String]) -> Result<Self, PtyError> {
        Self::spawn(&SessionConfig::new(program).with_args(args.iter().cloned()))
    }

    /// Spawn the configured program and start draining its output.
    pub fn spawn(config: &SessionConfig) -> Result<Self, PtyError> {
        let (mut pty, reader) = PtyHandle::spawn(config)?;
        let output = Arc::new(OutputBuffer::new());

        let name = match pty.pid() {
            Some(pid) => format!("pty-drain-{pid}"),
            None => "pty-drain".to_string(),
        };
        let drain_loop = match DrainLoop::start(name, reader, Arc::clone(&output)) {
            Ok(drain_loop) => drain_loop,
            Err(e) => {
                pty.close();
                let _ = pty.terminate(config.term_grace);
                return Err(PtyError::Spawn(format!("failed to start drain thread: {e}")));
            }
        };

        info!("spawned {} (pid {:?})", config.program, pty.pid());

        Ok(Self {
            pty,
            output,
            decoder: Utf8Decoder::new(),
            drain_loop: Some(drain_loop),
            term_grace: config.term_grace,
            exit_code: None,
            stopped: false,
        })
    }

    /// Child process id, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pty.pid()
    }

    /// Send `text` to the child verbatim.
    pub fn write(&mut self, text: &str) -> Result<(), PtyError> {
        self.pty.write(text.as_bytes())
    }

    /// Send `command` followed by a single newline.
    pub fn enter(&mut self, command: &str) -> Result<(), PtyError> {
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');
        self.write(&line)
    }

    /// Take everything the child has printed since the last drain.
    ///
    /// A character split across drains is returned whole by the later one.
    pub fn drain(&mut self) -> String {
        // Check before taking: a close observed here means the take below
        // already saw the final append.
        let finished = self.output.is_closed();
        let bytes = self.output.take();
        let mut text = self.decoder.decode(&bytes);
        if finished {
            text.push_str(&self.decoder.finish());
        }
        text
    }

    /// Whether the child has not yet been observed to exit.
    ///
    /// Point-in-time only; the drain loop may already have hit EOF.
    pub fn is_running(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.exit_code().is_none()
    }

    /// Exit code, once the child has been observed to exit.
    pub fn exit_code(&mut self) -> Option<u32> {
        if self.exit_code.is_none() {
            self.exit_code = self.pty.try_wait();
        }
        self.exit_code
    }

    /// Notified whenever new output lands in the buffer.
    pub fn output_signal(&self) -> Arc<Notify> {
        self.output.signal()
    }

    /// Whether the drain loop has stopped reading.
    pub fn output_closed(&self) -> bool {
        self.output.is_closed()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Close both PTY sides, terminate and reap the child, and wait for the
    /// drain loop to wind down.
    ///
    /// Calling it again after it has succeeded does nothing. After a failure
    /// it retries the termination.
    pub fn stop(&mut self) -> Result<(), PtyError> {
        if self.stopped {
            return Ok(());
        }

        self.pty.close();
        let terminated = self.pty.terminate(self.term_grace);

        if let Some(drain_loop) = self.drain_loop.take() {
            if !drain_loop.join(self.term_grace) {
                // Something else (a grandchild) still holds the terminal open.
                warn!("drain loop for {:?} still blocked after stop, detaching", self.pty.pid());
            }
        }

        let code = terminated?;
        self.stopped = true;
        self.exit_code = Some(code);
        info!("stopped child {:?} (exit code {code})", self.pty.pid());
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("failed to stop session on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn sh(script: &str) -> SessionConfig {
        SessionConfig::new("/bin/sh")
            .with_args(["-c", script])
            .with_term_grace(Duration::from_millis(500))
    }

    /// Drain repeatedly until `done` holds for the accumulated text.
    fn drain_until(session: &mut Session, done: impl Fn(&str) -> bool) -> String {
        let mut text = String::new();
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            text.push_str(&session.drain());
            if done(&text) {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        text
    }

    #[test]
    fn test_create_session() {
        let session = Session::new("/bin/cat", &[]);
        assert!(session.is_ok(), "Failed to create session: {:?}", session.err());
        let mut session = session.unwrap();
        assert!(session.is_running());
        assert!(session.pid().is_some());
        session.stop().unwrap();
    }

    #[test]
    fn test_spawn_failure_is_spawn_error() {
        let result = Session::new("/nonexistent/adventure", &[]);
        assert!(matches!(result, Err(ref e) if e.is_spawn()));
    }

    #[test]
    fn test_welcome_is_drained_once() {
        // The child prints only after its first line of input, so the first
        // drain is guaranteed to be empty.
        let mut session = Session::spawn(&sh("read _; printf 'Welcome\\n'; exec cat")).unwrap();
        assert_eq!(session.drain(), "");

        session.enter("").unwrap();
        let text = drain_until(&mut session, |t| t.ends_with('\n'));
        assert_eq!(text, "Welcome\n");
        assert_eq!(session.drain(), "");

        session.stop().unwrap();
    }

    #[test]
    fn test_enter_sends_line_verbatim() {
        // cat on a raw terminal writes back exactly the bytes it reads.
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        session.enter("go north").unwrap();

        let text = drain_until(&mut session, |t| t.len() >= "go north\n".len());
        assert_eq!(text, "go north\n");
        session.stop().unwrap();
    }

    #[test]
    fn test_write_adds_no_newline() {
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        session.write("xyzzy").unwrap();

        let text = drain_until(&mut session, |t| t.len() >= 5);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(text + &session.drain(), "xyzzy");
        session.stop().unwrap();
    }

    #[test]
    fn test_no_bytes_lost_across_drains() {
        let mut session = Session::spawn(&sh(
            "i=0; while [ $i -lt 200 ]; do printf 'line %03d\\n' $i; i=$((i+1)); done; exec cat",
        ))
        .unwrap();

        let text = drain_until(&mut session, |t| t.contains("line 199\n"));
        let expected: String = (0..200).map(|i| format!("line {i:03}\n")).collect();
        assert_eq!(text, expected);
        session.stop().unwrap();
    }

    #[test]
    fn test_multibyte_output() {
        let script = "printf 'caf\\303\\251 \\342\\202\\254\\n'; exec cat";
        let mut session = Session::spawn(&sh(script)).unwrap();
        let text = drain_until(&mut session, |t| t.ends_with('\n'));
        assert_eq!(text, "café €\n");
        session.stop().unwrap();
    }

    #[test]
    fn test_stop_tears_down() {
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        session.stop().unwrap();

        assert!(session.is_stopped());
        assert!(!session.is_running());
        assert!(session.exit_code().is_some());
        assert!(session.output_closed());

        match session.enter("look") {
            Err(PtyError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("expected an I/O error after stop, got {other:?}"),
        }
    }

    #[test]
    fn test_stop_types_nothing_into_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stdin");
        let script = format!("trap '' TERM; exec cat > '{}'", path.display());
        let mut session = Session::spawn(&sh(&script)).unwrap();

        session.enter("look").unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        while std::fs::read(&path).map_or(true, |b| b.len() < 5) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        session.stop().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"look\n");
    }

    #[test]
    fn test_failed_stop_joins_drain_and_can_retry() {
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        let pid = nix::unistd::Pid::from_raw(session.pid().unwrap() as i32);

        // Reap the child behind the session's back so terminate can't wait on it.
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
        nix::sys::wait::waitpid(pid, None).unwrap();

        assert!(session.stop().is_err());
        assert!(!session.is_stopped());
        assert!(session.output_closed());
        assert!(session.stop().is_err());
    }

    #[test]
    fn test_stop_twice_is_harmless() {
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        session.stop().unwrap();
        session.stop().unwrap();
    }

    #[test]
    fn test_child_exit_is_observed() {
        let mut session = Session::spawn(&sh("printf 'bye\\n'; exit 0")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while session.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!session.is_running(), "Session should have exited");
        assert_eq!(session.exit_code(), Some(0));
        assert_eq!(drain_until(&mut session, |t| t.ends_with('\n')), "bye\n");
        session.stop().unwrap();
    }

    #[test]
    fn test_repeated_start_stop() {
        for _ in 0..10 {
            let mut session = Session::new("/bin/cat", &[]).unwrap();
            session.enter("inventory").unwrap();
            session.stop().unwrap();
        }
    }

    #[test]
    fn test_drop_stops_child() {
        let session = Session::new("/bin/cat", &[]).unwrap();
        let pid = session.pid().unwrap() as i32;
        drop(session);

        // The child has been reaped, so the pid no longer exists.
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None);
        assert_eq!(alive, Err(nix::errno::Errno::ESRCH));
    }

    #[tokio::test]
    async fn test_output_signal_fires() {
        let mut session = Session::new("/bin/cat", &[]).unwrap();
        let signal = session.output_signal();
        session.enter("score").unwrap();

        tokio::time::timeout(Duration::from_secs(3), signal.notified())
            .await
            .expect("output should arrive");
        session.stop().unwrap();
    }
}
