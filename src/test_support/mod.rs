//! Test utilities and mocks for unit tests.
//!
//! [`MockMachine`] records every command it is asked to create and answers
//! with canned output, so code that drives a [`Machine`] can be tested
//! without a real backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmdio::test_support::{MockMachine, MockOutput};
//!
//! let m = MockMachine::new();
//! m.returns(&["uname", "-s"], "Linux\n");
//! m.returns(&["make"], MockOutput::failure(2, "make: *** No targets.\n"));
//! ```

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use crate::buffer::{Buffer, Input, Log};
use crate::context::{Context, Env};
use crate::error::Error;
use crate::machine::Machine;
use crate::util::quote;

/// Canned result of a mocked command.
#[derive(Debug, Clone)]
pub struct MockOutput {
    /// Exit status code (0 = success).
    pub status: i32,
    /// Output returned by reads.
    pub stdout: String,
    /// Diagnostics written to the log sink, if one is set.
    pub stderr: String,
    /// Fail as if the command did not exist.
    pub not_found: bool,
}

impl MockOutput {
    /// A successful run printing `stdout`.
    pub fn success(stdout: impl Into<String>) -> Self {
        MockOutput {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            not_found: false,
        }
    }

    /// A run that exits with `status` after printing `stderr`.
    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        MockOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
            not_found: false,
        }
    }

    /// A command that never starts.
    pub fn not_found() -> Self {
        MockOutput {
            not_found: true,
            ..MockOutput::success("")
        }
    }
}

impl From<&str> for MockOutput {
    fn from(stdout: &str) -> Self {
        MockOutput::success(stdout)
    }
}

/// One recorded invocation.
#[derive(Debug, Clone, Default)]
pub struct Call {
    /// The full argument list.
    pub args: Vec<String>,
    /// Environment overrides from the context.
    pub env: Env,
    /// Bytes written to the command's input.
    pub got: Vec<u8>,
    /// Whether the command was read from or written to.
    pub started: bool,
}

#[derive(Debug, Default)]
struct State {
    responses: Vec<(Vec<String>, MockOutput)>,
    calls: Vec<Call>,
    os: Option<String>,
    arch: Option<String>,
}

/// A [`Machine`] with canned responses.
///
/// Responses are matched by the longest registered argument prefix; the
/// most recent registration wins among equal prefixes. Unmatched commands
/// are not found. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockMachine {
    state: Arc<Mutex<State>>,
}

impl MockMachine {
    pub fn new() -> Self {
        MockMachine::default()
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn returns(&self, prefix: &[&str], output: impl Into<MockOutput>) -> &Self {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        self.state
            .lock()
            .unwrap()
            .responses
            .push((prefix, output.into()));
        self
    }

    pub fn set_os(&self, os: &str) {
        self.state.lock().unwrap().os = Some(os.to_string());
    }

    pub fn set_arch(&self, arch: &str) {
        self.state.lock().unwrap().arch = Some(arch.to_string());
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls whose command name is `name`.
    pub fn calls_for(&self, name: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.args.first().is_some_and(|a| a == name))
            .collect()
    }

    fn lookup(&self, args: &[&str]) -> MockOutput {
        let state = self.state.lock().unwrap();
        let mut best: Option<&(Vec<String>, MockOutput)> = None;
        for entry in &state.responses {
            let (prefix, _) = entry;
            let matches = prefix.len() <= args.len()
                && prefix.iter().zip(args).all(|(p, a)| p == a);
            if matches && best.map_or(true, |(b, _)| prefix.len() >= b.len()) {
                best = Some(entry);
            }
        }
        best.map(|(_, output)| output.clone())
            .unwrap_or_else(MockOutput::not_found)
    }
}

impl Machine for MockMachine {
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        let output = self.lookup(args);
        let index = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                args: args.iter().map(|s| s.to_string()).collect(),
                env: ctx.envs().cloned().unwrap_or_default(),
                ..Call::default()
            });
            state.calls.len() - 1
        };
        let name = args.first().copied().unwrap_or_default().to_string();
        Box::new(MockBuffer {
            state: Arc::clone(&self.state),
            index,
            label: quote::render(ctx.envs(), args),
            name,
            stdout: Cursor::new(output.stdout.clone().into_bytes()),
            output,
            log: None,
            input: true,
        })
    }

    fn os(&self, _ctx: &Context) -> Option<String> {
        self.state.lock().unwrap().os.clone()
    }

    fn arch(&self, _ctx: &Context) -> Option<String> {
        self.state.lock().unwrap().arch.clone()
    }
}

struct MockBuffer {
    state: Arc<Mutex<State>>,
    index: usize,
    label: String,
    name: String,
    output: MockOutput,
    stdout: Cursor<Vec<u8>>,
    log: Option<Box<dyn Write + Send>>,
    input: bool,
}

impl MockBuffer {
    fn mark_started(&self) {
        self.state.lock().unwrap().calls[self.index].started = true;
    }
}

impl Read for MockBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.mark_started();
        if self.output.not_found {
            return Err(Error::command_not_found(&self.name).into());
        }
        let n = self.stdout.read(buf)?;
        if n > 0 || self.output.status == 0 {
            return Ok(n);
        }
        if let Some(mut log) = self.log.take() {
            log.write_all(self.output.stderr.as_bytes())?;
        }
        Err(Error::exit(self.output.status).into())
    }
}

impl Log for MockBuffer {
    fn log(&mut self, sink: Box<dyn Write + Send>) {
        self.log = Some(sink);
    }
}

impl Buffer for MockBuffer {
    fn input(&mut self) -> Option<Box<dyn Input>> {
        if !std::mem::take(&mut self.input) {
            return None;
        }
        Some(Box::new(MockInput {
            state: Arc::clone(&self.state),
            index: self.index,
            closed: false,
        }))
    }

    fn as_log(&mut self) -> Option<&mut dyn Log> {
        Some(self)
    }

    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

struct MockInput {
    state: Arc<Mutex<State>>,
    index: usize,
    closed: bool,
}

impl Write for MockInput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let mut state = self.state.lock().unwrap();
        let call = &mut state.calls[self.index];
        call.started = true;
        call.got.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Input for MockInput {
    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;

    #[test]
    fn test_mock_longest_prefix_wins() {
        let m = MockMachine::new();
        m.returns(&["git"], "generic");
        m.returns(&["git", "status"], "status");

        let mut out = String::new();
        m.command(&Context::background(), &["git", "status", "-s"])
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "status");
    }

    #[test]
    fn test_mock_default_not_found() {
        let m = MockMachine::new();
        let err = m
            .command(&Context::background(), &["missing"])
            .read(&mut [0; 4])
            .unwrap_err();
        assert!(error::not_found(&err));
    }

    #[test]
    fn test_mock_records_env_and_input() {
        let m = MockMachine::new();
        m.returns(&["cat"], "");
        let ctx = Context::background().with_env([("LANG", "C")]);

        let mut buf = m.command(&ctx, &["cat"]);
        assert!(!m.calls()[0].started);
        let mut input = buf.input().unwrap();
        input.write_all(b"abc").unwrap();
        input.close().unwrap();

        let call = &m.calls()[0];
        assert!(call.started);
        assert_eq!(call.got, b"abc");
        assert_eq!(call.env.get("LANG").map(String::as_str), Some("C"));
        assert!(buf.input().is_none());
        assert_eq!(buf.describe().as_deref(), Some("LANG=C cat"));
    }
}
