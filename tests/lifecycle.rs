//! Integration tests for the lifecycle wrappers.
//!
//! These tests drive `Reader`, `Writer` and `Stream` against the in-memory
//! machine and a small counting machine that records when commands start.

use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use cmdio::error;
use cmdio::mem::{self, MemMachine};
use cmdio::{Buffer, Context, Machine, Reader, Stream, Writer};

/// Counts created commands and the ones that actually started.
#[derive(Default)]
struct Counting {
    created: AtomicUsize,
    started: Arc<AtomicUsize>,
}

impl Machine for Counting {
    fn command(&self, _ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(Lazy {
            started: Arc::clone(&self.started),
            begun: false,
            data: Cursor::new(args.join(" ").into_bytes()),
        })
    }
}

struct Lazy {
    started: Arc<AtomicUsize>,
    begun: bool,
    data: Cursor<Vec<u8>>,
}

impl Read for Lazy {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.begun {
            self.begun = true;
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        self.data.read(buf)
    }
}

impl Buffer for Lazy {}

// ============================================================================
// Reader
// ============================================================================

#[test]
fn test_reader_defers_start_until_first_read() {
    let m = Counting::default();
    let mut r = Reader::new(&Context::background(), &m, &["echo", "lazy"]);

    assert_eq!(m.created.load(Ordering::SeqCst), 1);
    assert_eq!(m.started.load(Ordering::SeqCst), 0);
    assert!(!r.is_started());

    let mut out = String::new();
    r.read_to_string(&mut out).unwrap();
    assert_eq!(out, "echo lazy");
    assert_eq!(m.started.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reader_dropped_unused_never_starts() {
    let m = Counting::default();
    {
        let r = Reader::new(&Context::background(), &m, &["echo"]);
        r.close().unwrap();
    }
    drop(Reader::new(&Context::background(), &m, &["echo"]));

    assert_eq!(m.created.load(Ordering::SeqCst), 2);
    assert_eq!(m.started.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reader_concurrent_reads_start_once() {
    let m = Counting::default();
    let r = Reader::new(&Context::background(), &m, &["abcdefghijklmnopqrstuvwxyz"]);
    let collected = Mutex::new(Vec::new());
    let barrier = Barrier::new(8);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                barrier.wait();
                let mut chunk = [0u8; 3];
                loop {
                    let n = (&r).read(&mut chunk).unwrap();
                    if n == 0 {
                        break;
                    }
                    collected.lock().unwrap().extend_from_slice(&chunk[..n]);
                }
            });
        }
    });

    assert_eq!(m.created.load(Ordering::SeqCst), 1);
    assert_eq!(m.started.load(Ordering::SeqCst), 1);
    let mut bytes = collected.into_inner().unwrap();
    bytes.sort_unstable();
    assert_eq!(bytes, b"abcdefghijklmnopqrstuvwxyz");
}

#[test]
fn test_reader_read_after_close() {
    let m = mem::machine();
    let mut r = Reader::new(&Context::background(), &*m, &["echo", "hi"]);
    let mut first = [0u8; 1];
    r.read_exact(&mut first).unwrap();
    r.close().unwrap();

    let err = r.read(&mut [0u8; 8]).unwrap_err();
    assert!(error::is_closed(&err));
}

#[test]
fn test_reader_reports_cancellation() {
    let m = mem::machine();
    let (ctx, cancel) = Context::background().with_cancel();
    let mut r = Reader::new(&ctx, &*m, &["echo", "hi"]);
    cancel.cancel();

    let err = r.read(&mut [0u8; 8]).unwrap_err();
    assert_eq!(err.to_string(), "context canceled");
}

#[test]
fn test_reader_reports_command_failure() {
    let m = mem::machine();
    let mut r = Reader::new(&Context::background(), &*m, &["cat", "/missing"]);
    let err = r.read_to_end(&mut Vec::new()).unwrap_err();

    let failure = error::find::<error::Error>(&err).unwrap();
    assert_eq!(failure.code, 1);
    assert!(!error::not_found(&err));
}

// ============================================================================
// Writer
// ============================================================================

#[test]
fn test_writer_write_then_close() {
    let m = MemMachine::new();
    let mut w = Writer::new(&Context::background(), &m, &["tee", "/log.txt"]);
    assert!(!w.is_started());

    w.write_all(b"line one\n").unwrap();
    w.write_all(b"line two\n").unwrap();
    assert!(w.is_started());
    w.close().unwrap();

    assert_eq!(m.read_file("/log.txt").unwrap(), b"line one\nline two\n");
    let err = w.write(b"late").unwrap_err();
    assert!(error::is_closed(&err));
}

#[test]
fn test_writer_concurrent_writes() {
    let m = MemMachine::new();
    let w = Writer::new(&Context::background(), &m, &["tee", "/many.txt"]);
    let barrier = Barrier::new(4);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                barrier.wait();
                (&w).write_all(b"ab").unwrap();
            });
        }
    });
    w.close().unwrap();

    assert_eq!(m.read_file("/many.txt").unwrap(), b"abababab");
}

#[test]
fn test_writer_read_only_command_does_not_start() {
    let m = Counting::default();
    let mut w = Writer::new(&Context::background(), &m, &["echo"]);

    let err = w.write(b"ignored").unwrap_err();
    assert!(error::is_read_only(&err));
    assert_eq!(m.started.load(Ordering::SeqCst), 0);
    w.close().unwrap();
}

#[test]
fn test_writer_read_from_reader() {
    let m = MemMachine::new();
    m.write_file("/src.txt", "copied");
    let ctx = Context::background();

    let mut src = Reader::new(&ctx, &m, &["cat", "/src.txt"]);
    let w = Writer::new(&ctx, &m, &["tee", "/a.txt", "/b.txt"]);
    assert_eq!(w.read_from(&mut src).unwrap(), 6);

    assert_eq!(m.read_file("/a.txt").unwrap(), b"copied");
    assert_eq!(m.read_file("/b.txt").unwrap(), b"copied");
}

// ============================================================================
// Stream
// ============================================================================

#[test]
fn test_stream_concurrent_read_and_write() {
    let m = mem::machine();
    let s = Stream::new(&Context::background(), &*m, &["tr", "a-z", "A-Z"]);
    assert!(s.is_writable());

    thread::scope(|scope| {
        scope.spawn(|| {
            for word in ["one ", "two ", "three"] {
                (&s).write_all(word.as_bytes()).unwrap();
            }
            s.close_input().unwrap();
        });

        let mut out = String::new();
        (&s).read_to_string(&mut out).unwrap();
        assert_eq!(out, "ONE TWO THREE");
    });
}

#[test]
fn test_stream_label_includes_env() {
    let m = mem::machine();
    let ctx = Context::background().with_env([("LANG", "C")]);
    let s = Stream::new(&ctx, &*m, &["printenv", "LANG"]);
    assert_eq!(s.label(), "LANG=C printenv LANG");
    assert!(!s.is_writable());

    let mut out = String::new();
    (&s).read_to_string(&mut out).unwrap();
    assert_eq!(out, "C\n");
}
