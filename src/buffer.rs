//! The execution-unit contract.
//!
//! A [`Buffer`] represents one command's execution. Reading drives the
//! command forward and returns its output until it completes; the command
//! has not started until the first read (or the first write to its
//! [`Input`]). Everything beyond reading is an optional capability exposed
//! through a default method that returns `None`:
//!
//! - [`Buffer::input`]: the command accepts input
//! - [`Buffer::as_attach`]: the command can take over the terminal
//! - [`Buffer::as_log`]: the command has a separate diagnostics channel
//! - [`Buffer::describe`]: the command can render its own identity

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

/// One command's execution.
///
/// Implementations must return end-of-stream once the command terminates,
/// and the command's failure as an error from `read`.
pub trait Buffer: Read + Send {
    /// Detach the command's input half.
    ///
    /// Returns `None` for commands that take no input. Wrappers call this
    /// once, right after the buffer is created; later calls may return
    /// `None`.
    fn input(&mut self) -> Option<Box<dyn Input>> {
        None
    }

    /// Terminal attachment, if supported.
    fn as_attach(&mut self) -> Option<&mut dyn Attach> {
        None
    }

    /// Diagnostics routing, if supported.
    fn as_log(&mut self) -> Option<&mut dyn Log> {
        None
    }

    /// Human-readable identity, usually the rendered command line.
    fn describe(&self) -> Option<String> {
        None
    }

    /// Abandon the command's output.
    ///
    /// Called by [`crate::Reader`] when it is closed after reading began.
    /// This must not wait for the command to finish.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The input half of a command.
///
/// Writing starts the command if it has not started. [`Input::close`]
/// signals end of input; it does not end output, which must still be read
/// to observe completion. Writes after close must fail.
pub trait Input: Write + Send {
    /// Close the command's input.
    fn close(&mut self) -> io::Result<()>;
}

/// Connects a command directly to the controlling terminal.
pub trait Attach {
    /// Attach the command's input and output to the terminal, starting it
    /// if needed.
    ///
    /// Afterwards the buffer must be read exactly once: that read blocks
    /// until the command completes and then returns zero bytes.
    fn attach(&mut self) -> io::Result<()>;
}

/// Routes a command's diagnostics (conventionally stderr).
pub trait Log {
    /// Set the destination for diagnostics, replacing any previous one.
    /// Typically called before the first read.
    fn log(&mut self, sink: Box<dyn Write + Send>);
}

impl<B: Buffer + ?Sized> Buffer for Box<B> {
    fn input(&mut self) -> Option<Box<dyn Input>> {
        (**self).input()
    }

    fn as_attach(&mut self) -> Option<&mut dyn Attach> {
        (**self).as_attach()
    }

    fn as_log(&mut self) -> Option<&mut dyn Log> {
        (**self).as_log()
    }

    fn describe(&self) -> Option<String> {
        (**self).describe()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl<T: AsRef<[u8]> + Send> Buffer for Cursor<T> {}

impl Buffer for &'static [u8] {}

/// Attach `buf` to the terminal if it supports attachment.
///
/// Does nothing for buffers without the capability. An attachment failure
/// is returned as-is.
pub fn attach(buf: &mut dyn Buffer) -> io::Result<()> {
    match buf.as_attach() {
        Some(a) => a.attach(),
        None => Ok(()),
    }
}

/// Route `buf`'s diagnostics to `sink` if it has a diagnostics channel.
pub fn log(buf: &mut dyn Buffer, sink: Box<dyn Write + Send>) {
    if let Some(l) = buf.as_log() {
        l.log(sink);
    }
}

/// The identity of `buf`, or a generic label when it has none.
pub fn describe(buf: &dyn Buffer) -> String {
    buf.describe().unwrap_or_else(|| "<buffer>".to_string())
}

/// A buffer whose every read fails with `err`.
///
/// Every read reports the same kind, and the original payload stays
/// reachable through [`crate::error::find`].
pub fn fail(err: impl Into<io::Error>) -> Box<dyn Buffer> {
    let err = err.into();
    let kind = err.kind();
    Box::new(Fail {
        kind,
        cause: err.into_inner().map(Arc::from),
    })
}

struct Fail {
    kind: io::ErrorKind,
    cause: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Read for Fail {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(match &self.cause {
            Some(cause) => io::Error::new(self.kind, Replayed(Arc::clone(cause))),
            None => io::Error::from(self.kind),
        })
    }
}

impl Buffer for Fail {}

struct Replayed(Arc<dyn StdError + Send + Sync>);

impl fmt::Debug for Replayed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Replayed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Replayed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.0)
    }
}

/// Adapt any reader into a read-only buffer.
pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Box<dyn Buffer> {
    Box::new(FromReader(reader))
}

struct FromReader<R>(R);

impl<R: Read> Read for FromReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Send> Buffer for FromReader<R> {}
