//! Call context for command invocations.
//!
//! A [`Context`] travels with every [`crate::Machine::command`] call. It
//! carries a cancellation chain, an optional deadline, and the environment
//! overrides that executors apply to the commands they launch.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a context is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for io::Error {
    fn from(err: ContextError) -> Self {
        let kind = match err {
            ContextError::Canceled => io::ErrorKind::Other,
            ContextError::DeadlineExceeded => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, err)
    }
}

/// Environment overrides, ordered by key.
pub type Env = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct CancelNode {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelNode>>,
}

impl CancelNode {
    fn is_cancelled(&self) -> bool {
        let mut node = Some(self);
        while let Some(current) = node {
            if current.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            node = current.parent.as_deref();
        }
        false
    }
}

/// Cancels the context it was created with, and every context derived
/// from that one.
///
/// Cancellation is not reversible.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<CancelNode>);

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested on this handle or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Context passed to executors.
///
/// Cloning is cheap; derived contexts share their ancestors' cancellation.
#[derive(Clone, Default)]
pub struct Context {
    cancel: Option<Arc<CancelNode>>,
    deadline: Option<Instant>,
    env: Option<Arc<Env>>,
}

impl Context {
    /// An empty context that is never cancelled.
    pub fn background() -> Self {
        Context::default()
    }

    /// Derive a context that is cancelled when the returned handle is.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let node = Arc::new(CancelNode {
            cancelled: AtomicBool::new(false),
            parent: self.cancel.clone(),
        });
        let ctx = Context {
            cancel: Some(Arc::clone(&node)),
            ..self.clone()
        };
        (ctx, CancelHandle(node))
    }

    /// Derive a context that expires at `deadline`.
    ///
    /// An earlier deadline already present is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Context {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that keeps this one's values but can never be
    /// cancelled and has no deadline.
    pub fn without_cancel(&self) -> Context {
        Context {
            cancel: None,
            deadline: None,
            env: self.env.clone(),
        }
    }

    /// The deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context was cancelled or its deadline has passed.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_err()
    }

    /// `Ok` while the context is live, otherwise a [`ContextError`]
    /// wrapped in an `io::Error`.
    ///
    /// Cancellation is not reported as `Interrupted`, which `std::io`
    /// treats as retryable.
    pub fn check(&self) -> io::Result<()> {
        if self.cancel.as_deref().is_some_and(CancelNode::is_cancelled) {
            return Err(ContextError::Canceled.into());
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ContextError::DeadlineExceeded.into());
        }
        Ok(())
    }

    /// The environment overrides stored in this context.
    pub fn envs(&self) -> Option<&Env> {
        self.env.as_deref()
    }

    /// Look up a single override.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.envs()?.get(key).map(String::as_str)
    }

    /// Derive a context with `env` merged over the existing overrides.
    ///
    /// New values replace existing ones with the same key.
    pub fn with_env<I, K, V>(&self, env: I) -> Context
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut merged = self.envs().cloned().unwrap_or_default();
        merged.extend(env.into_iter().map(|(k, v)| (k.into(), v.into())));
        Context {
            env: Some(Arc::new(merged)),
            ..self.clone()
        }
    }

    /// Derive a context with every override removed.
    ///
    /// Cancellation and deadline are preserved. Useful once overrides have
    /// been converted into another form, such as arguments for a remote
    /// shell, and must not be applied again by an inner executor.
    pub fn without_env(&self) -> Context {
        Context {
            env: None,
            ..self.clone()
        }
    }

    /// Derive a context with the override for `key` removed.
    pub fn unset_env(&self, key: &str) -> Context {
        let Some(env) = self.envs() else {
            return self.clone();
        };
        let mut remaining = env.clone();
        remaining.remove(key);
        Context {
            env: (!remaining.is_empty()).then(|| Arc::new(remaining)),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .field("env", &self.envs())
            .finish()
    }
}
