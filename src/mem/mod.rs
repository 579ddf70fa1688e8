//! In-memory reference machine.
//!
//! Provides working `echo`, `cat`, `tee`, `tr` and `printenv` commands over
//! an in-memory file table, with the same behavior on every host. The
//! machine reports `linux`/`amd64` and a default environment of `HOME=/`.

mod tr;

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

use crate::buffer::{self, Buffer, Input};
use crate::context::{Context, Env};
use crate::error::Error;
use crate::machine::Machine;
use crate::util::{lock, pipe, quote, PipeReader, PipeWriter};

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// A new, empty in-memory machine.
pub fn machine() -> Arc<dyn Machine> {
    Arc::new(MemMachine::new())
}

/// The in-memory machine. Clones share one file table.
#[derive(Debug, Clone, Default)]
pub struct MemMachine {
    files: Files,
}

impl MemMachine {
    pub fn new() -> Self {
        MemMachine::default()
    }

    /// Store `data` at `path`, replacing any previous content.
    pub fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        lock(&self.files).insert(absolute(path), data.into());
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(&absolute(path)).cloned()
    }

    fn cat(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        if args.len() == 1 {
            let (reader, writer) = pipe();
            return MemBuffer::new(ctx, args, Box::new(reader), Some(writer));
        }
        let files = lock(&self.files);
        let mut out = Vec::new();
        for path in &args[1..] {
            match files.get(&absolute(path)) {
                Some(data) => out.extend_from_slice(data),
                None => {
                    let err = Error::new(format!("cat: {}: No such file or directory", path));
                    return buffer::fail(err.with_code(1));
                }
            }
        }
        MemBuffer::new(ctx, args, Box::new(Cursor::new(out)), None)
    }

    fn tee(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        let (reader, writer) = pipe();
        let tee = Tee {
            src: reader,
            captured: Vec::new(),
            paths: args[1..].iter().map(|p| absolute(p)).collect(),
            files: Arc::clone(&self.files),
            committed: false,
        };
        MemBuffer::new(ctx, args, Box::new(tee), Some(writer))
    }
}

impl Machine for MemMachine {
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        let Some(&name) = args.first() else {
            return buffer::fail(Error::new("bad command: no command given"));
        };
        match name {
            "echo" => {
                let line = format!("{}\n", args[1..].join(" "));
                MemBuffer::new(ctx, args, Box::new(Cursor::new(line)), None)
            }
            "cat" => self.cat(ctx, args),
            "tee" => self.tee(ctx, args),
            "tr" => {
                let (set1, set2) = match args {
                    [_, set1, set2, ..] => (*set1, *set2),
                    _ => ("", ""),
                };
                let (reader, writer) = pipe();
                let translate = tr::Translate {
                    src: reader,
                    table: tr::table(set1, set2),
                };
                MemBuffer::new(ctx, args, Box::new(translate), Some(writer))
            }
            "printenv" => printenv(ctx, args),
            _ => buffer::fail(Error::command_not_found(name)),
        }
    }

    fn os(&self, _ctx: &Context) -> Option<String> {
        Some("linux".to_string())
    }

    fn arch(&self, _ctx: &Context) -> Option<String> {
        Some("amd64".to_string())
    }
}

fn printenv(ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
    let mut env = Env::new();
    env.insert("HOME".to_string(), "/".to_string());
    env.extend(ctx.envs().into_iter().flatten().map(|(k, v)| (k.clone(), v.clone())));

    let out = match args.get(1) {
        Some(key) => match env.get(*key) {
            Some(value) => format!("{}\n", value),
            None => return buffer::fail(Error::exit(1)),
        },
        None => env.iter().map(|(k, v)| format!("{}={}\n", k, v)).collect(),
    };
    MemBuffer::new(ctx, args, Box::new(Cursor::new(out)), None)
}

fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

struct MemBuffer {
    label: String,
    ctx: Context,
    output: Box<dyn Read + Send>,
    input: Option<PipeWriter>,
}

impl MemBuffer {
    fn new(
        ctx: &Context,
        args: &[&str],
        output: Box<dyn Read + Send>,
        input: Option<PipeWriter>,
    ) -> Box<dyn Buffer> {
        Box::new(MemBuffer {
            label: quote::render(ctx.envs(), args),
            ctx: ctx.clone(),
            output,
            input,
        })
    }
}

impl Read for MemBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ctx.check()?;
        self.output.read(buf)
    }
}

impl Buffer for MemBuffer {
    fn input(&mut self) -> Option<Box<dyn Input>> {
        self.input.take().map(|w| Box::new(w) as Box<dyn Input>)
    }

    fn describe(&self) -> Option<String> {
        Some(self.label.clone())
    }
}

/// Passes input through, storing a copy in each file once input ends.
struct Tee {
    src: PipeReader,
    captured: Vec<u8>,
    paths: Vec<String>,
    files: Files,
    committed: bool,
}

impl Read for Tee {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.src.read(buf)?;
        if n > 0 {
            self.captured.extend_from_slice(&buf[..n]);
        } else if !buf.is_empty() && !self.committed {
            self.committed = true;
            let mut files = lock(&self.files);
            for path in &self.paths {
                files.insert(path.clone(), self.captured.clone());
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;
    use crate::exec;
    use crate::lifecycle::{Reader, Stream, Writer};
    use std::io::Write;
    use std::thread;

    #[test]
    fn test_echo() {
        let m = machine();
        let mut out = String::new();
        m.command(&Context::background(), &["echo", "hello", "world"])
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hello world\n");
    }

    #[test]
    fn test_command_not_found() {
        let m = machine();
        let err = exec::read(&Context::background(), &*m, &["nonexistent-command-xyz"]).unwrap_err();
        assert!(error::not_found(&err));

        let err = exec::read(&Context::background(), &*m, &[]).unwrap_err();
        assert!(error::not_found(&err));
    }

    #[test]
    fn test_tee_then_cat() {
        let m = MemMachine::new();
        let ctx = Context::background();
        let tee = Stream::new(&ctx, &m, &["tee", "/tmp/test.txt"]);

        thread::scope(|s| {
            s.spawn(|| {
                (&tee).write_all(b"test content").unwrap();
                tee.close_input().unwrap();
            });
            let mut out = String::new();
            (&tee).read_to_string(&mut out).unwrap();
            assert_eq!(out, "test content");
        });

        assert_eq!(exec::read(&ctx, &m, &["cat", "/tmp/test.txt"]).unwrap(), "test content");
    }

    #[test]
    fn test_reader_into_writer() {
        let m = MemMachine::new();
        let ctx = Context::background();
        let mut src = Reader::new(&ctx, &m, &["echo", "hello world"]);
        let dst = Writer::new(&ctx, &m, &["tee", "out.txt"]);

        dst.read_from(&mut src).unwrap();
        assert_eq!(m.read_file("/out.txt").unwrap(), b"hello world\n");
    }

    #[test]
    fn test_cat_missing_file() {
        let m = MemMachine::new();
        m.write_file("/a", "A");
        let err = exec::read(&Context::background(), &m, &["cat", "/a", "/b"]).unwrap_err();
        let classified = error::find::<Error>(&err).unwrap();
        assert_eq!(classified.code, 1);
        assert!(!error::not_found(&err));
        assert_eq!(err.to_string(), "cat: /b: No such file or directory");
    }

    #[test]
    fn test_printenv() {
        let m = machine();
        let ctx = Context::background().with_env([("GREETING", "hi")]);
        assert_eq!(exec::read(&ctx, &*m, &["printenv", "GREETING"]).unwrap(), "hi");
        assert_eq!(exec::read(&ctx, &*m, &["printenv", "HOME"]).unwrap(), "/");
        assert_eq!(
            exec::read(&ctx, &*m, &["printenv"]).unwrap(),
            "GREETING=hi\nHOME=/"
        );

        let err = exec::read(&ctx, &*m, &["printenv", "MISSING"]).unwrap_err();
        assert_eq!(error::find::<Error>(&err).map(|e| e.code), Some(1));
    }

    #[test]
    fn test_describe_renders_command() {
        let m = machine();
        let ctx = Context::background().with_env([("LC_ALL", "C")]);
        let buf = m.command(&ctx, &["tr", "a-z", "A-Z"]);
        assert_eq!(buf.describe().as_deref(), Some("LC_ALL=C tr a-z A-Z"));
    }
}
