//! Background read loop that drains PTY output into a shared buffer.
//!
//! Each session gets its own dedicated OS thread because PTY reads are
//! blocking. The thread owns the PTY reader outright; the only state it
//! shares is the [`OutputBuffer`], and it holds that lock just long enough
//! to append. Closing the PTY (and the child going away) makes the read
//! fail or return zero bytes, which is the loop's only exit.

use std::io::{self, Read};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Notify;

/// Bytes requested per read. Ordering holds for any size; bigger just means
/// fewer lock round-trips.
const READ_CHUNK: usize = 4096;

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output accumulated since the last [`take`](OutputBuffer::take).
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Mutex<Vec<u8>>,
    closed: AtomicBool,
    signal: Arc<Notify>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake anyone waiting for output.
    pub fn append(&self, data: &[u8]) {
        {
            let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
            bytes.extend_from_slice(data);
        }
        self.signal.notify_one();
    }

    /// Swap the buffer for an empty one and return what it held.
    pub fn take(&self) -> Vec<u8> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        mem::take(&mut *bytes)
    }

    /// Bytes currently waiting to be taken.
    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark that no more bytes will be appended.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.signal.notify_one();
    }

    /// True once the drain loop has exited.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Notified after every append and on close.
    pub fn signal(&self) -> Arc<Notify> {
        Arc::clone(&self.signal)
    }
}

/// Handle to a running drain thread.
pub struct DrainLoop {
    handle: JoinHandle<()>,
}

impl DrainLoop {
    /// Start the read loop on a dedicated OS thread named `name`.
    pub fn start(
        name: String,
        reader: Box<dyn Read + Send>,
        output: Arc<OutputBuffer>,
    ) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || drain_loop(reader, &output))?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if it is still blocked in a read, in which case the
    /// thread is detached.
    pub fn join(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        let _ = self.handle.join();
        true
    }
}

fn drain_loop(mut reader: Box<dyn Read + Send>, output: &OutputBuffer) {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                debug!("drain loop: EOF on PTY master");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // EIO here just means the subordinate side is gone.
                debug!("drain loop: read ended: {e}");
                break;
            }
        };

        output.append(&buf[..n]);
    }

    output.close();
}
