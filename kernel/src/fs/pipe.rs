//! In-kernel pipe
//!
//! A bounded byte ring with a condition variable per direction. Reads and
//! writes never block here - they return [`FsError::WouldBlock`] - because
//! blocking composition is `select()`'s job.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use super::{FileOps, FsError, PollKind};
use crate::sched::CondVar;

/// Ring capacity in bytes.
pub const PIPE_CAPACITY: usize = 4096;

struct PipeBuf {
    data: VecDeque<u8>,
    read_closed: bool,
    write_closed: bool,
}

/// A bounded FIFO byte stream.
pub struct Pipe {
    buf: Mutex<PipeBuf>,
    /// Signaled when data (or EOF) becomes available.
    read_cond: Arc<CondVar>,
    /// Signaled when buffer space becomes available.
    write_cond: Arc<CondVar>,
}

impl Pipe {
    /// Create an empty pipe.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(PipeBuf {
                data: VecDeque::with_capacity(PIPE_CAPACITY),
                read_closed: false,
                write_closed: false,
            }),
            read_cond: Arc::new(CondVar::new()),
            write_cond: Arc::new(CondVar::new()),
        })
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.buf.lock().data.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.lock().data.is_empty()
    }

    /// Close the read side; further writes fail with `BrokenPipe`.
    pub fn close_read(&self) {
        self.buf.lock().read_closed = true;
        self.write_cond.signal();
    }

    /// Close the write side; a drained pipe then reads as EOF.
    pub fn close_write(&self) {
        self.buf.lock().write_closed = true;
        self.read_cond.signal();
    }
}

impl FileOps for Pipe {
    fn poll_cond(&self, kind: PollKind) -> Option<Arc<CondVar>> {
        match kind {
            PollKind::Read => Some(self.read_cond.clone()),
            PollKind::Write => Some(self.write_cond.clone()),
            PollKind::Except => None,
        }
    }

    fn poll_ready(&self, kind: PollKind) -> bool {
        let buf = self.buf.lock();
        match kind {
            PollKind::Read => !buf.data.is_empty() || buf.write_closed,
            PollKind::Write => buf.data.len() < PIPE_CAPACITY && !buf.read_closed,
            PollKind::Except => false,
        }
    }

    fn read(&self, out: &mut [u8]) -> Result<usize, FsError> {
        let mut buf = self.buf.lock();

        if buf.data.is_empty() {
            if buf.write_closed {
                return Ok(0);
            }
            return Err(FsError::WouldBlock);
        }

        let n = out.len().min(buf.data.len());
        for (i, byte) in buf.data.drain(..n).enumerate() {
            out[i] = byte;
        }
        drop(buf);

        // Space opened up.
        self.write_cond.signal();
        Ok(n)
    }

    fn write(&self, data: &[u8]) -> Result<usize, FsError> {
        let mut buf = self.buf.lock();

        if buf.read_closed {
            return Err(FsError::BrokenPipe);
        }

        let space = PIPE_CAPACITY - buf.data.len();
        if space == 0 {
            return Err(FsError::WouldBlock);
        }

        let n = data.len().min(space);
        buf.data.extend(data[..n].iter().copied());
        drop(buf);

        // Data became available.
        self.read_cond.signal();
        Ok(n)
    }
}
