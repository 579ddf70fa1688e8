//! One-shot command execution.
//!
//! These helpers run a command to completion in a single call. Unlike the
//! lifecycle wrappers they do not defer anything: the command is created,
//! traced and driven to its end immediately.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::buffer;
use crate::context::Context;
use crate::error;
use crate::lifecycle;
use crate::machine::Machine;
use crate::trace;
use crate::util::lock;

/// Run `args` and return the output with trailing whitespace removed, as a
/// shell's `$(...)` would.
///
/// Diagnostics are captured and attached to the command's [`error::Error`]
/// when it fails.
pub fn read(ctx: &Context, m: &dyn Machine, args: &[&str]) -> io::Result<String> {
    let mut buf = m.command(ctx, args);
    let log = Capture::default();
    buffer::log(&mut *buf, Box::new(log.clone()));
    trace::emit(&lifecycle::label(ctx, &*buf, args));

    let mut out = Vec::new();
    match buf.read_to_end(&mut out) {
        Ok(_) => Ok(String::from_utf8_lossy(&out).trim_end().to_string()),
        Err(e) => Err(error::attach_log(e, log.take())),
    }
}

/// Run `args` for its side effects, discarding output.
///
/// Diagnostics are attached to the failure as with [`read`].
pub fn run(ctx: &Context, m: &dyn Machine, args: &[&str]) -> io::Result<()> {
    let mut buf = m.command(ctx, args);
    let log = Capture::default();
    buffer::log(&mut *buf, Box::new(log.clone()));
    trace::emit(&lifecycle::label(ctx, &*buf, args));

    match io::copy(&mut buf, &mut io::sink()) {
        Ok(_) => Ok(()),
        Err(e) => Err(error::attach_log(e, log.take())),
    }
}

/// Run `args` on the controlling terminal.
///
/// Commands that can attach are attached; otherwise output is streamed to
/// stdout and diagnostics to stderr. Failures carry no captured log.
pub fn exec(ctx: &Context, m: &dyn Machine, args: &[&str]) -> io::Result<()> {
    let mut buf = m.command(ctx, args);
    trace::emit(&lifecycle::label(ctx, &*buf, args));
    buffer::attach(&mut *buf)?;
    buffer::log(&mut *buf, Box::new(io::stderr()));
    io::copy(&mut buf, &mut io::stdout())?;
    Ok(())
}

/// Shared in-memory diagnostics sink.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.0))
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
