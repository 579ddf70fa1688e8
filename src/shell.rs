//! Name-based command routing.
//!
//! A [`Shell`] dispatches each command by its first argument, the way a
//! system shell resolves names through `$PATH`. Names must be registered
//! explicitly; unknown names fail with a not-found [`Error`] unless the
//! shell was built with fallback to its core machine.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::buffer::{self, Buffer};
use crate::context::Context;
use crate::error::Error;
use crate::exec;
use crate::machine::{MachineFunc, Machine};
use crate::probe;
use crate::util::lock;

/// A machine that routes commands to other machines by name.
///
/// The shell wraps a core machine that is reachable through
/// [`Shell::unshell`] and used for probing, but which runs commands only if
/// they are routed to it (or fallback is enabled).
///
/// A shell is itself a [`Machine`], so shells nest.
pub struct Shell {
    routes: RwLock<HashMap<String, Arc<dyn Machine>>>,
    core: Arc<dyn Machine>,
    fallback: bool,
    os: Mutex<Option<String>>,
    arch: Mutex<Option<String>>,
}

impl Shell {
    /// A strict shell: only registered names run.
    pub fn new(core: Arc<dyn Machine>) -> Self {
        Shell {
            routes: RwLock::new(HashMap::new()),
            core,
            fallback: false,
            os: Mutex::new(None),
            arch: Mutex::new(None),
        }
    }

    /// A shell that sends unregistered names to `core`.
    pub fn with_fallback(core: Arc<dyn Machine>) -> Self {
        Shell {
            fallback: true,
            ..Shell::new(core)
        }
    }

    /// A strict shell with each of `names` routed straight to `core`.
    pub fn with_commands<I, S>(core: Arc<dyn Machine>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let shell = Shell::new(core);
        for name in names {
            shell.handle(name, shell.unshell());
        }
        shell
    }

    /// Route `name` to `m`, replacing any previous route.
    pub fn handle(&self, name: impl Into<String>, m: Arc<dyn Machine>) -> &Self {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), m);
        self
    }

    /// Route `name` to a closure.
    pub fn handle_fn<F>(&self, name: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&Context, &[&str]) -> Box<dyn Buffer> + Send + Sync + 'static,
    {
        self.handle(name, Arc::new(MachineFunc(f)))
    }

    /// Whether `name` has a registered route.
    pub fn is_handled(&self, name: &str) -> bool {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// The core machine, one layer down.
    ///
    /// Routing a name to the result whitelists it on the core; this gives
    /// up the shell's control over which commands run.
    pub fn unshell(&self) -> Arc<dyn Machine> {
        Arc::clone(&self.core)
    }

    /// The value of `key`, from the context overrides or by probing the
    /// core machine.
    pub fn env(&self, ctx: &Context, key: &str) -> String {
        probe::env(ctx, &*self.core, key)
    }

    /// Run a command through this shell and return its trimmed output.
    pub fn read(&self, ctx: &Context, args: &[&str]) -> io::Result<String> {
        exec::read(ctx, self, args)
    }

    /// Run a command through this shell, discarding its output.
    pub fn run(&self, ctx: &Context, args: &[&str]) -> io::Result<()> {
        exec::run(ctx, self, args)
    }

    fn probed(
        &self,
        slot: &Mutex<Option<String>>,
        ctx: &Context,
        probe: fn(&Context, &dyn Machine) -> String,
    ) -> String {
        // Held across the probe, so concurrent callers see one answer.
        let mut cached = lock(slot);
        if let Some(value) = &*cached {
            return value.clone();
        }
        let value = probe(ctx, &*self.core);
        *cached = Some(value.clone());
        value
    }
}

impl Machine for Shell {
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        let Some(&name) = args.first() else {
            return buffer::fail(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no command specified",
            ));
        };

        let route = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        match route {
            Some(m) => {
                tracing::debug!(command = name, "routing to registered handler");
                m.command(ctx, args)
            }
            None if self.fallback => {
                tracing::debug!(command = name, "no route, falling back to core");
                self.core.command(ctx, args)
            }
            None => {
                tracing::debug!(command = name, "no route");
                buffer::fail(Error::command_not_found(name))
            }
        }
    }

    fn unshell(&self) -> Option<Arc<dyn Machine>> {
        Some(Shell::unshell(self))
    }

    fn os(&self, ctx: &Context) -> Option<String> {
        Some(self.probed(&self.os, ctx, probe::os))
    }

    fn arch(&self, ctx: &Context) -> Option<String> {
        Some(self.probed(&self.arch, ctx, probe::arch))
    }

    fn shutdown(&self, ctx: &Context) -> io::Result<()> {
        self.core.shutdown(ctx)
    }

    fn as_shell(&self) -> Option<&Shell> {
        Some(self)
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = routes.keys().collect();
        names.sort();
        f.debug_struct("Shell")
            .field("routes", &names)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

/// Route `name` on `m` to `handler`.
///
/// If `m` is a [`Shell`] the route is added to it. Otherwise `m` is wrapped
/// in a new shell with fallback enabled, so its other commands stay
/// reachable.
pub fn handle(m: Arc<dyn Machine>, name: &str, handler: Arc<dyn Machine>) -> Arc<dyn Machine> {
    if let Some(shell) = m.as_shell() {
        shell.handle(name, handler);
        return m;
    }
    let shell = Shell::with_fallback(m);
    shell.handle(name, handler);
    Arc::new(shell)
}

/// The machine one layer below `m`, or `m` itself if it wraps nothing.
pub fn unshell(m: &Arc<dyn Machine>) -> Arc<dyn Machine> {
    m.unshell().unwrap_or_else(|| Arc::clone(m))
}
