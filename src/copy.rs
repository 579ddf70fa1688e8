//! N-stage concurrent pipeline copying.
//!
//! [`copy`] connects a source, zero or more interior [`Stage`]s and a sink
//! into one data flow. Every edge (`src -> stage1`, ..., `stageN -> dst`)
//! is copied on its own thread; each edge closes its writer once its reader
//! is exhausted, whether or not the copy succeeded, so that the next edge
//! always sees end of stream. All edges are joined before returning.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{PipeReader, PipeWriter};

/// The readable first endpoint of a pipeline.
pub trait Source: Read + Send {
    /// Human-readable identity used in pipeline failures.
    fn describe(&self) -> Option<String> {
        None
    }

    /// [`Source::describe`], or the type name.
    fn label(&self) -> String {
        self.describe()
            .unwrap_or_else(|| format!("<{}>", type_name::<Self>()))
    }
}

/// The writable last endpoint of a pipeline.
pub trait Sink: Write + Send {
    /// Signal that no more data will be written.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Copy all of `src` into this sink.
    ///
    /// Sinks wrapping a command override this to close the command's input
    /// once `src` is exhausted.
    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        io::copy(src, self)
    }
}

/// An interior pipeline stage, read by one edge and written by another.
///
/// Stages are shared between the two edge threads, so every operation
/// takes `&self`.
pub trait Stage: Send + Sync {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close the input side. The output must still be read to its end.
    fn close(&self) -> io::Result<()>;

    /// Copy all of `src` into the stage.
    fn read_from(&self, src: &mut dyn Read) -> io::Result<u64> {
        io::copy(src, &mut StageInput(self))
    }

    fn describe(&self) -> Option<String> {
        None
    }

    /// [`Stage::describe`], or the type name.
    fn label(&self) -> String {
        self.describe()
            .unwrap_or_else(|| format!("<{}>", type_name::<Self>()))
    }
}

struct StageInput<'a, S: ?Sized>(&'a S);

impl<S: Stage + ?Sized> Write for StageInput<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Use any reader as a [`Source`] or any writer as a [`Sink`].
#[derive(Debug, Default)]
pub struct Plain<T>(pub T);

impl<T: Read> Read for Plain<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Write> Write for Plain<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<T: Read + Send> Source for Plain<T> {}

impl<T: Write + Send> Sink for Plain<T> {}

impl Source for &[u8] {}

impl<T: AsRef<[u8]> + Send> Source for Cursor<T> {}

impl Source for File {}

impl Source for io::Empty {}

impl Source for io::Stdin {}

impl Source for PipeReader {}

impl<S: Source + ?Sized> Source for Box<S> {
    fn describe(&self) -> Option<String> {
        (**self).describe()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

impl<S: Source + ?Sized> Source for &mut S {
    fn describe(&self) -> Option<String> {
        (**self).describe()
    }

    fn label(&self) -> String {
        (**self).label()
    }
}

impl Sink for Vec<u8> {}

impl Sink for File {}

impl Sink for io::Sink {}

impl Sink for io::Stdout {}

impl Sink for io::Stderr {}

impl Sink for PipeWriter {
    fn close(&mut self) -> io::Result<()> {
        PipeWriter::close(self);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        (**self).read_from(src)
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        (**self).read_from(src)
    }
}

/// What the remaining edges do when one edge fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopyPolicy {
    /// Let every edge run to completion.
    #[default]
    WaitAll,
    /// Stop the other edges after their next chunk. A stopped edge still
    /// reads its upstream to the end, discarding it, so no writer stays
    /// blocked on a full stage.
    CancelSiblings,
}

impl std::str::FromStr for CopyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "wait-all" => Ok(CopyPolicy::WaitAll),
            "cancel-siblings" => Ok(CopyPolicy::CancelSiblings),
            _ => Err(format!(
                "invalid copy policy '{}'; expected 'wait-all' or 'cancel-siblings'",
                s
            )),
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    pub policy: CopyPolicy,

    /// Chunk size for edges that copy in a loop.
    pub buffer_size: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            policy: CopyPolicy::WaitAll,
            buffer_size: 32 * 1024,
        }
    }
}

/// An edge stopped because a sibling edge failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("copy aborted after another pipeline stage failed")]
pub struct CopyAborted;

/// The failure of one edge.
///
/// Both errors are kept when the copy and the subsequent close fail.
#[derive(Debug)]
pub struct EdgeFailure {
    pub copy: Option<io::Error>,
    pub close: Option<io::Error>,
}

impl EdgeFailure {
    /// Every error of this edge, copy error first.
    pub fn errors(&self) -> impl Iterator<Item = &io::Error> {
        self.copy.iter().chain(self.close.iter())
    }
}

impl fmt::Display for EdgeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for err in self.errors() {
            if !first {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
            first = false;
        }
        Ok(())
    }
}

impl StdError for EdgeFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.errors().next().map(|e| e as &(dyn StdError + 'static))
    }
}

/// The outcome of one edge, labelled by its reading endpoint.
#[derive(Debug)]
pub struct EdgeReport {
    pub label: String,

    /// Bytes copied, counted only when the copy itself succeeded.
    pub written: u64,

    pub result: Result<(), EdgeFailure>,
}

/// A pipeline in which at least one edge failed.
///
/// Holds the report of every edge, in flow order.
#[derive(Debug)]
pub struct CopyError {
    written: u64,
    edges: Vec<EdgeReport>,
}

impl CopyError {
    /// Total bytes copied by the edges that succeeded.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn edges(&self) -> &[EdgeReport] {
        &self.edges
    }

    /// The failed edges, in flow order.
    pub fn failures(&self) -> impl Iterator<Item = &EdgeFailure> {
        self.edges.iter().filter_map(|e| e.result.as_ref().err())
    }

    /// Find an error of type `E` in any edge.
    pub fn find<E: StdError + 'static>(&self) -> Option<&E> {
        crate::error::find::<E>(self)
    }
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, edge) in self.edges.iter().enumerate() {
            if i > 0 {
                write!(f, "\n\n")?;
            }
            match &edge.result {
                Ok(()) => write!(f, "{}\n\t<success>", edge.label)?,
                Err(failure) => write!(
                    f,
                    "{}\n\t{}",
                    edge.label,
                    failure.to_string().replace('\n', "\n\t")
                )?,
            }
        }
        Ok(())
    }
}

impl StdError for CopyError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.failures()
            .next()
            .map(|f| f as &(dyn StdError + 'static))
    }
}

impl From<CopyError> for io::Error {
    fn from(err: CopyError) -> Self {
        io::Error::other(err)
    }
}

/// Copy `src` through each stage of `mid` into `dst`.
///
/// Returns the sum of the bytes copied on every edge. See [`Pipeline`] for
/// non-default options.
pub fn copy<W, R>(dst: &mut W, src: &mut R, mid: &[&dyn Stage]) -> Result<u64, CopyError>
where
    W: Sink,
    R: Source,
{
    let mut pipeline = Pipeline::new(src);
    for stage in mid {
        pipeline = pipeline.stage(*stage);
    }
    pipeline.run(dst)
}

/// Builder for a pipeline copy.
pub struct Pipeline<'a> {
    src: &'a mut dyn Source,
    stages: Vec<&'a dyn Stage>,
    options: CopyOptions,
}

impl<'a> Pipeline<'a> {
    pub fn new<R: Source>(src: &'a mut R) -> Self {
        Pipeline {
            src,
            stages: Vec::new(),
            options: CopyOptions::default(),
        }
    }

    /// Append an interior stage.
    pub fn stage(mut self, stage: &'a dyn Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Append several interior stages in order.
    pub fn stages<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = &'a dyn Stage>,
    {
        self.stages.extend(stages);
        self
    }

    pub fn options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn policy(mut self, policy: CopyPolicy) -> Self {
        self.options.policy = policy;
        self
    }

    /// Run every edge to completion, writing the final output to `dst`.
    pub fn run<W: Sink>(self, dst: &mut W) -> Result<u64, CopyError> {
        let Pipeline {
            src,
            stages,
            options,
        } = self;
        let mut edges = Vec::with_capacity(stages.len() + 1);
        let mut upstream = Upstream::Source(src);
        for stage in &stages {
            edges.push((upstream, Downstream::Stage(*stage)));
            upstream = Upstream::Stage(*stage);
        }
        edges.push((upstream, Downstream::Sink(dst)));

        let abort = AtomicBool::new(false);
        let reports: Vec<EdgeReport> = thread::scope(|scope| {
            let handles: Vec<_> = edges
                .into_iter()
                .map(|(up, down)| {
                    let label = up.label();
                    let edge_label = label.clone();
                    let abort = &abort;
                    let options = &options;
                    let handle =
                        scope.spawn(move || run_edge(edge_label, up, down, options, abort));
                    (label, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(label, handle)| {
                    handle.join().unwrap_or_else(|_| EdgeReport {
                        label,
                        written: 0,
                        result: Err(EdgeFailure {
                            copy: Some(io::Error::other("pipeline edge panicked")),
                            close: None,
                        }),
                    })
                })
                .collect()
        });

        let written = reports.iter().map(|r| r.written).sum();
        if reports.iter().all(|r| r.result.is_ok()) {
            return Ok(written);
        }
        Err(CopyError {
            written,
            edges: reports,
        })
    }
}

enum Upstream<'a> {
    Source(&'a mut dyn Source),
    Stage(&'a dyn Stage),
}

impl Upstream<'_> {
    fn label(&self) -> String {
        match self {
            Upstream::Source(src) => src.label(),
            Upstream::Stage(stage) => stage.label(),
        }
    }
}

impl Read for Upstream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Upstream::Source(src) => src.read(buf),
            Upstream::Stage(stage) => stage.read(buf),
        }
    }
}

enum Downstream<'a> {
    Sink(&'a mut dyn Sink),
    Stage(&'a dyn Stage),
}

impl Downstream<'_> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Downstream::Sink(dst) => dst.write_all(buf),
            Downstream::Stage(stage) => StageInput(*stage).write_all(buf),
        }
    }

    fn read_from(&mut self, src: &mut dyn Read) -> io::Result<u64> {
        match self {
            Downstream::Sink(dst) => dst.read_from(src),
            Downstream::Stage(stage) => stage.read_from(src),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self {
            Downstream::Sink(dst) => dst.close(),
            Downstream::Stage(stage) => stage.close(),
        }
    }
}

fn run_edge(
    label: String,
    mut up: Upstream<'_>,
    mut down: Downstream<'_>,
    options: &CopyOptions,
    abort: &AtomicBool,
) -> EdgeReport {
    let copied = match options.policy {
        CopyPolicy::WaitAll => down.read_from(&mut up),
        CopyPolicy::CancelSiblings => copy_chunked(&mut up, &mut down, options.buffer_size, abort),
    };
    // Always close, so the next edge sees end of stream.
    let closed = down.close();

    let (written, copy) = match copied {
        Ok(n) => (n, None),
        Err(e) => (0, Some(e)),
    };
    let result = match (copy, closed) {
        (None, Ok(())) => Ok(()),
        (copy, closed) => Err(EdgeFailure {
            copy,
            close: closed.err(),
        }),
    };

    match &result {
        Ok(()) => tracing::debug!(edge = %label, written, "pipeline edge finished"),
        Err(failure) => {
            if options.policy == CopyPolicy::CancelSiblings {
                abort.store(true, Ordering::SeqCst);
            }
            tracing::debug!(edge = %label, "pipeline edge failed: {}", failure);
        }
    }

    EdgeReport {
        label,
        written,
        result,
    }
}

fn copy_chunked(
    up: &mut Upstream<'_>,
    down: &mut Downstream<'_>,
    buffer_size: usize,
    abort: &AtomicBool,
) -> io::Result<u64> {
    let mut buf = vec![0; buffer_size.max(1)];
    let mut total = 0;
    loop {
        // Read before checking the flag, so a failing upstream always
        // reports its own error.
        let n = match up.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if abort.load(Ordering::SeqCst) {
            // Keep an upstream blocked on a full buffer moving to its end.
            drain(up)?;
            return Err(io::Error::other(CopyAborted));
        }
        if let Err(e) = down.write_all(&buf[..n]) {
            if let Err(upstream) = drain(up) {
                tracing::debug!("draining after failed write: {}", upstream);
            }
            return Err(e);
        }
        total += n as u64;
    }
}

/// Read `up` to its end, discarding the data.
fn drain(up: &mut Upstream<'_>) -> io::Result<()> {
    io::copy(up, &mut io::sink()).map(|_| ())
}
