//! In-memory pipe connecting a command's input to its output.
//!
//! Writes never block; reads block until bytes arrive or the writer
//! closes. Dropping the reader makes further writes fail with
//! [`io::ErrorKind::BrokenPipe`].

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

use super::lock;
use crate::buffer::Input;

#[derive(Debug, Default)]
struct State {
    bytes: VecDeque<u8>,
    closed: bool,
    reader_gone: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

/// Read half of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader(Arc<Shared>);

/// Write half of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter(Arc<Shared>);

/// Create a connected pipe.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Shared::default());
    (PipeReader(Arc::clone(&shared)), PipeWriter(shared))
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = lock(&self.0.state);
        while state.bytes.is_empty() && !state.closed {
            state = self
                .0
                .ready
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        let n = buf.len().min(state.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(state.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        lock(&self.0.state).reader_gone = true;
    }
}

impl PipeWriter {
    /// Signal end of input to the reader.
    pub fn close(&mut self) {
        lock(&self.0.state).closed = true;
        self.0.ready.notify_all();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.0.state);
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write on closed pipe",
            ));
        }
        if state.reader_gone {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        state.bytes.extend(buf);
        drop(state);
        self.0.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Input for PipeWriter {
    fn close(&mut self) -> io::Result<()> {
        PipeWriter::close(self);
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}
