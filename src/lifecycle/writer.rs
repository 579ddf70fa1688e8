use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;

use super::{label, InputState, Lifecycle};
use crate::buffer::Buffer;
use crate::context::Context;
use crate::copy::Sink;
use crate::error::UsageError;
use crate::machine::Machine;
use crate::trace;
use crate::util::lock;

/// A write-only command whose close waits for completion.
///
/// The command starts on the first write. From then on its output is
/// drained and discarded in the background, so the command never stalls on
/// a full output channel. [`Writer::close`] closes the input and returns
/// the command's result once it has finished.
///
/// Writing to a command that accepts no input fails with
/// [`UsageError::ReadOnly`] without starting it.
pub struct Writer {
    state: Mutex<Lifecycle>,
    input: Mutex<InputState>,
    output: Mutex<Option<Box<dyn Buffer>>>,
    done: Mutex<Option<Receiver<io::Result<u64>>>>,
    label: String,
}

impl Writer {
    /// Create a writer for `args` on `m`.
    pub fn new(ctx: &Context, m: &dyn Machine, args: &[&str]) -> Self {
        let mut buf = m.command(ctx, args);
        let input = InputState::detach(&mut *buf);
        let label = label(ctx, &*buf, args);
        Writer {
            state: Mutex::new(Lifecycle::default()),
            input: Mutex::new(input),
            output: Mutex::new(Some(buf)),
            done: Mutex::new(None),
            label,
        }
    }

    /// Whether the command has been started by a write.
    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    /// The rendered command this writer runs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Write command input.
    pub fn write_input(&self, data: &[u8]) -> io::Result<usize> {
        self.start()?;
        lock(&self.input).write(data)
    }

    /// Close the input and wait for the command to finish.
    ///
    /// Returns the command's failure, if any. A failure to close the input
    /// is returned without waiting. Closing again, or closing a writer that
    /// never started, returns `Ok`.
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
        lock(&self.input).close()?;
        self.wait()
    }

    /// Copy all of `src` into the command, then close and wait.
    ///
    /// The first failure wins, in order: copying, closing the input, the
    /// command itself.
    pub fn read_from(&self, src: &mut dyn Read) -> io::Result<u64> {
        self.start()?;
        let copied = {
            let mut input = lock(&self.input);
            match &mut *input {
                InputState::Open(w) => io::copy(src, w),
                InputState::Closed => Err(UsageError::Closed.into()),
                InputState::ReadOnly => Err(UsageError::ReadOnly.into()),
            }
        };

        lock(&self.state).closed = true;
        let closed = lock(&self.input).close();
        let finished = self.wait();

        let n = copied?;
        closed?;
        finished?;
        Ok(n)
    }

    fn start(&self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(UsageError::Closed.into());
        }
        if matches!(*lock(&self.input), InputState::ReadOnly) {
            return Err(UsageError::ReadOnly.into());
        }
        if !state.started {
            trace::emit(&self.label);
            self.spawn_drain()?;
            state.started = true;
        }
        Ok(())
    }

    fn spawn_drain(&self) -> io::Result<()> {
        let Some(mut output) = lock(&self.output).take() else {
            return Ok(());
        };
        let (tx, rx) = mpsc::sync_channel(1);
        let label = self.label.clone();
        thread::Builder::new()
            .name("cmdio-drain".to_string())
            .spawn(move || {
                let result = io::copy(&mut output, &mut io::sink());
                if let Err(e) = &result {
                    tracing::debug!(command = %label, "command failed: {}", e);
                }
                // The writer may be gone; nobody is left to tell.
                let _ = tx.send(result);
            })?;
        *lock(&self.done) = Some(rx);
        Ok(())
    }

    fn wait(&self) -> io::Result<()> {
        let Some(done) = lock(&self.done).take() else {
            return Ok(());
        };
        match done.recv() {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(io::Error::other("command output drain exited unexpectedly")),
        }
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_input(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.input).flush()
    }
}

impl Write for &Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_input(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.input).flush()
    }
}

impl Sink for Writer {
    fn close(&mut self) -> io::Result<()> {
        Writer::close(self)
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        Writer::read_from(self, src)
    }
}

impl Sink for &Writer {
    fn close(&mut self) -> io::Result<()> {
        Writer::close(self)
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        Writer::read_from(self, src)
    }
}

impl Drop for Writer {
    /// Ends the input so the command can finish, without waiting for it.
    fn drop(&mut self) {
        let state = lock(&self.state);
        if state.started && !state.closed {
            drop(state);
            if let Err(e) = lock(&self.input).close() {
                tracing::debug!(command = %self.label, "close on drop failed: {}", e);
            }
        }
    }
}
