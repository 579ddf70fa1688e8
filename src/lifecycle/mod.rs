//! Lifecycle wrappers around a command's [`Buffer`].
//!
//! - [`Reader`]: read-only; closing abandons the command.
//! - [`Writer`]: write-only; closing waits for the command to finish.
//! - [`Stream`]: direct read/write access for interior pipeline stages.
//!
//! Every wrapper takes `&self`, so one wrapper may be shared between
//! threads. As with `std::fs::File`, `Read`/`Write` are implemented for both
//! the wrapper and a shared reference to it.

mod reader;
mod stream;
mod writer;

pub use reader::Reader;
pub use stream::Stream;
pub use writer::Writer;

use std::io;

use crate::buffer::{Buffer, Input};
use crate::context::Context;
use crate::error::UsageError;
use crate::util::quote;

/// Started/closed flags shared by [`Reader`] and [`Writer`].
///
/// Each flag moves from `false` to `true` at most once.
#[derive(Debug, Default, Clone, Copy)]
struct Lifecycle {
    started: bool,
    closed: bool,
}

/// The input half as seen by a wrapper.
enum InputState {
    Open(Box<dyn Input>),
    Closed,
    ReadOnly,
}

impl InputState {
    fn detach(buf: &mut dyn Buffer) -> Self {
        match buf.input() {
            Some(input) => InputState::Open(input),
            None => InputState::ReadOnly,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            InputState::Open(input) => input.write(data),
            InputState::Closed => Err(UsageError::Closed.into()),
            InputState::ReadOnly => Err(UsageError::ReadOnly.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            InputState::Open(input) => input.flush(),
            _ => Ok(()),
        }
    }

    /// Close the input half. Read-only commands stay read-only.
    fn close(&mut self) -> io::Result<()> {
        match std::mem::replace(self, InputState::Closed) {
            InputState::Open(mut input) => input.close(),
            InputState::Closed => Ok(()),
            InputState::ReadOnly => {
                *self = InputState::ReadOnly;
                Ok(())
            }
        }
    }
}

/// The name a command is traced under: the buffer's own description, or
/// the rendered command line.
pub(crate) fn label(ctx: &Context, buf: &dyn Buffer, args: &[&str]) -> String {
    buf.describe()
        .unwrap_or_else(|| quote::render(ctx.envs(), args))
}
