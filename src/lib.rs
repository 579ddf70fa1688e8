//! cmdio - Lazy command buffers with read/write lifecycles
//!
//! This crate models command execution as byte streams. An executor
//! ([`Machine`]) turns an argument list into a [`Buffer`] that does nothing
//! until it is first read or written. On top of that it provides:
//!
//! - lifecycle wrappers ([`Reader`], [`Writer`], [`Stream`]) that make
//!   start, close and failure reporting predictable
//! - [`copy`], a concurrent N-stage pipeline with aggregated errors
//! - [`Shell`], name-based routing between machines
//! - platform probing ([`os`], [`arch`], [`env`]) that descends through
//!   layered machines
//! - the [`read`], [`run`] and [`exec`] conveniences and a process-wide
//!   command [`trace`]
//!
//! [`mem`] is an in-memory reference machine with a few standard commands.

pub mod buffer;
pub mod config;
pub mod context;
pub mod copy;
pub mod error;
pub mod exec;
pub mod lifecycle;
pub mod machine;
pub mod mem;
pub mod probe;
pub mod shell;
pub mod trace;
pub mod util;

/// Test utilities and mocks for cmdio unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides a recording [`Machine`] with canned command
/// output.
#[cfg(test)]
pub mod test_support;

pub use buffer::{Attach, Buffer, Input, Log};
pub use config::Config;
pub use context::{CancelHandle, Context, ContextError, Env};
pub use copy::{copy, CopyError, CopyOptions, CopyPolicy, Pipeline, Sink, Source, Stage};
pub use error::{not_found, Error, UsageError};
pub use exec::{exec, read, run};
pub use lifecycle::{Reader, Stream, Writer};
pub use machine::{machine_fn, shutdown, Machine, MachineFunc};
pub use probe::{arch, env, os};
pub use shell::{handle, unshell, Shell};
