//! Process-wide command trace.
//!
//! Every command rendered through a lifecycle wrapper or the [`crate::exec`]
//! helpers is written here as one line, right before it starts. The default
//! destination discards everything. The destination is looked up on every
//! line, so replacing it takes effect immediately.

use std::io::{self, Write};
use std::sync::{LazyLock, Mutex};

use serde::{Deserialize, Serialize};

use crate::util::lock;

type Destination = Box<dyn Write + Send>;

static TRACE: LazyLock<Mutex<Destination>> = LazyLock::new(|| Mutex::new(Box::new(io::sink())));

/// Where trace lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceTarget {
    /// Drop every line.
    #[default]
    Discard,
    /// Standard error, with a prefix.
    Stderr,
    /// `tracing::info!` events under the `cmdio::trace` target.
    Tracing,
}

impl std::str::FromStr for TraceTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" | "off" | "none" => Ok(TraceTarget::Discard),
            "stderr" => Ok(TraceTarget::Stderr),
            "tracing" | "log" => Ok(TraceTarget::Tracing),
            _ => Err(format!(
                "invalid trace target '{}'; expected 'discard', 'stderr', or 'tracing'",
                s
            )),
        }
    }
}

/// Replace the trace destination, returning the previous one.
pub fn set_writer(w: Box<dyn Write + Send>) -> Box<dyn Write + Send> {
    std::mem::replace(&mut *lock(&TRACE), w)
}

/// Install the destination for `target`.
pub fn install(target: TraceTarget, prefix: &str) {
    let w: Destination = match target {
        TraceTarget::Discard => Box::new(io::sink()),
        TraceTarget::Stderr => Box::new(Prefixed::new(prefix, io::stderr())),
        TraceTarget::Tracing => Box::new(TracingWriter),
    };
    set_writer(w);
}

/// Stop tracing.
pub fn discard() {
    set_writer(Box::new(io::sink()));
}

/// Prefixed standard-error trace, in the style of `set -x`.
pub fn stderr() -> Box<dyn Write + Send> {
    Box::new(Prefixed::new("+ ", io::stderr()))
}

/// Write one trace line. Trailing newlines in `line` are dropped; empty
/// lines are skipped.
pub fn emit(line: &str) {
    let line = line.trim_end_matches('\n');
    if line.is_empty() {
        return;
    }
    let mut w = lock(&TRACE);
    if let Err(e) = writeln!(w, "{}", line) {
        tracing::debug!("trace write failed: {}", e);
    }
}

/// Prefixes every line written through it.
pub struct Prefixed<W> {
    prefix: String,
    inner: W,
    at_line_start: bool,
}

impl<W: Write> Prefixed<W> {
    /// Wrap `inner`.
    pub fn new(prefix: impl Into<String>, inner: W) -> Self {
        Prefixed {
            prefix: prefix.into(),
            inner,
            at_line_start: true,
        }
    }

    /// Unwrap the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for Prefixed<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for line in buf.split_inclusive(|&b| b == b'\n') {
            if self.at_line_start {
                self.inner.write_all(self.prefix.as_bytes())?;
            }
            self.inner.write_all(line)?;
            self.at_line_start = line.ends_with(b"\n");
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct TracingWriter;

impl Write for TracingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for line in String::from_utf8_lossy(buf).lines() {
            tracing::info!(target: "cmdio::trace", "{}", line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_lines() {
        let mut w = Prefixed::new("+ ", Vec::new());
        w.write_all(b"echo hi\ncat").unwrap();
        w.write_all(b" file\n").unwrap();
        assert_eq!(
            String::from_utf8(w.into_inner()).unwrap(),
            "+ echo hi\n+ cat file\n"
        );
    }

    #[test]
    fn test_trace_target_parse() {
        assert_eq!("stderr".parse::<TraceTarget>().unwrap(), TraceTarget::Stderr);
        assert_eq!("Tracing".parse::<TraceTarget>().unwrap(), TraceTarget::Tracing);
        assert_eq!("off".parse::<TraceTarget>().unwrap(), TraceTarget::Discard);
        assert!("loud".parse::<TraceTarget>().is_err());
    }
}
