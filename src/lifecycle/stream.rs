use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{label, InputState};
use crate::buffer::{self, Buffer};
use crate::context::Context;
use crate::copy::{Sink, Source, Stage};
use crate::error::UsageError;
use crate::machine::Machine;
use crate::trace;
use crate::util::lock;

/// Direct access to both halves of a command.
///
/// Reads and writes go straight to the buffer and its input. Closing only
/// closes the input; the output must still be read to observe completion.
/// This is the form [`crate::copy`] expects for interior pipeline stages.
pub struct Stream {
    output: Mutex<Box<dyn Buffer>>,
    input: Mutex<InputState>,
    traced: AtomicBool,
    label: String,
}

impl Stream {
    /// Create a stream for `args` on `m`.
    pub fn new(ctx: &Context, m: &dyn Machine, args: &[&str]) -> Self {
        let mut buf = m.command(ctx, args);
        let label = label(ctx, &*buf, args);
        Stream::with_label(InputState::detach(&mut *buf), buf, label)
    }

    /// Wrap an existing buffer.
    pub fn from_buffer(mut buf: Box<dyn Buffer>) -> Self {
        let label = buffer::describe(&*buf);
        Stream::with_label(InputState::detach(&mut *buf), buf, label)
    }

    fn with_label(input: InputState, output: Box<dyn Buffer>, label: String) -> Self {
        Stream {
            output: Mutex::new(output),
            input: Mutex::new(input),
            traced: AtomicBool::new(false),
            label,
        }
    }

    /// The rendered command this stream runs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the command accepts input.
    pub fn is_writable(&self) -> bool {
        !matches!(*lock(&self.input), InputState::ReadOnly)
    }

    /// Read command output.
    pub fn read_output(&self, out: &mut [u8]) -> io::Result<usize> {
        self.trace_once();
        lock(&self.output).read(out)
    }

    /// Write command input.
    pub fn write_input(&self, data: &[u8]) -> io::Result<usize> {
        let mut input = lock(&self.input);
        if matches!(*input, InputState::Open(_)) {
            self.trace_once();
        }
        input.write(data)
    }

    /// Close the input. A no-op for commands without input, and when
    /// already closed.
    pub fn close_input(&self) -> io::Result<()> {
        lock(&self.input).close()
    }

    /// Copy all of `src` into the command, then close its input.
    pub fn read_from(&self, src: &mut dyn Read) -> io::Result<u64> {
        let copied = {
            let mut input = lock(&self.input);
            match &mut *input {
                InputState::Open(w) => {
                    self.trace_once();
                    io::copy(src, w)
                }
                InputState::Closed => Err(UsageError::Closed.into()),
                InputState::ReadOnly => return Err(UsageError::ReadOnly.into()),
            }
        };
        let closed = self.close_input();
        let n = copied?;
        closed?;
        Ok(n)
    }

    fn trace_once(&self) {
        if self
            .traced
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            trace::emit(&self.label);
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_output(buf)
    }
}

impl Read for &Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_output(buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_input(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.input).flush()
    }
}

impl Write for &Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_input(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.input).flush()
    }
}

impl Source for &Stream {
    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

impl Sink for &Stream {
    fn close(&mut self) -> io::Result<()> {
        self.close_input()
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        Stream::read_from(self, src)
    }
}

impl Stage for Stream {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_output(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.write_input(buf)
    }

    fn close(&self) -> io::Result<()> {
        self.close_input()
    }

    fn read_from(&self, src: &mut dyn Read) -> io::Result<u64> {
        Stream::read_from(self, src)
    }

    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}
