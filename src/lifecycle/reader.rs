use std::io::{self, Read};
use std::sync::{Mutex, TryLockError};

use super::{label, Lifecycle};
use crate::buffer::Buffer;
use crate::context::{CancelHandle, Context};
use crate::copy::Source;
use crate::error::UsageError;
use crate::machine::Machine;
use crate::trace;
use crate::util::lock;

/// A read-only command that is abandoned on close.
///
/// The command starts on the first read. Closing a reader that was read
/// from cancels the context the command was created with, then closes the
/// buffer; it never waits for the command to finish. Closing a reader that
/// was never read is a no-op, so the command never starts.
///
/// Dropping a reader closes it.
pub struct Reader {
    state: Mutex<Lifecycle>,
    unit: Mutex<Unit>,
    cancel: CancelHandle,
    label: String,
}

struct Unit {
    buf: Box<dyn Buffer>,
    released: bool,
}

impl Unit {
    fn release(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.buf.close()
    }
}

impl Reader {
    /// Create a reader for `args` on `m`.
    ///
    /// The command receives a context derived from `ctx` that is cancelled
    /// when the reader is closed after use.
    pub fn new(ctx: &Context, m: &dyn Machine, args: &[&str]) -> Self {
        let (ctx, cancel) = ctx.with_cancel();
        let buf = m.command(&ctx, args);
        let label = label(&ctx, &*buf, args);
        Reader {
            state: Mutex::new(Lifecycle::default()),
            unit: Mutex::new(Unit {
                buf,
                released: false,
            }),
            cancel,
            label,
        }
    }

    /// Whether the command has been started by a read.
    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    /// The rendered command this reader runs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read command output. Fails with [`UsageError::Closed`] after close.
    pub fn read_output(&self, out: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(UsageError::Closed.into());
            }
            if !state.started {
                state.started = true;
                trace::emit(&self.label);
            }
        }

        let mut unit = lock(&self.unit);
        let result = unit.buf.read(out);
        // A close that raced with this read left the release to us.
        if lock(&self.state).closed {
            if let Err(e) = unit.release() {
                tracing::debug!(command = %self.label, "close after read failed: {}", e);
            }
        }
        result
    }

    /// Stop reading.
    ///
    /// Idempotent. Never blocks on the command: if another thread is in the
    /// middle of a read, that read releases the buffer when it returns.
    pub fn close(&self) -> io::Result<()> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            if !state.started {
                return Ok(());
            }
        }

        self.cancel.cancel();
        match self.unit.try_lock() {
            Ok(mut unit) => unit.release(),
            Err(TryLockError::WouldBlock) => Ok(()),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().release(),
        }
    }
}

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_output(buf)
    }
}

impl Read for &Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_output(buf)
    }
}

impl Source for Reader {
    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

impl Source for &Reader {
    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!(command = %self.label, "close on drop failed: {}", e);
        }
    }
}
