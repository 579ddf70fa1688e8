//! Executors.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::Context;
use crate::shell::Shell;

/// Something that executes commands.
///
/// Besides [`Machine::command`], every method is an optional capability
/// with a default that opts out.
pub trait Machine: Send + Sync {
    /// Instantiate a command. Environment overrides travel in `ctx`.
    ///
    /// The returned buffer represents the command's execution; it must not
    /// start until it is first read or written.
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer>;

    /// The machine one layer down, for machines that wrap another.
    fn unshell(&self) -> Option<Arc<dyn Machine>> {
        None
    }

    /// The operating system, if the machine knows it without probing.
    fn os(&self, _ctx: &Context) -> Option<String> {
        None
    }

    /// The architecture, if the machine knows it without probing.
    fn arch(&self, _ctx: &Context) -> Option<String> {
        None
    }

    /// Release resources held by the machine.
    ///
    /// `ctx` may carry no cancellation (see [`shutdown`]), so
    /// implementations must bound their own waiting.
    fn shutdown(&self, _ctx: &Context) -> io::Result<()> {
        Ok(())
    }

    /// Downcast hook used by [`crate::handle`].
    fn as_shell(&self) -> Option<&Shell> {
        None
    }
}

impl<M: Machine + ?Sized> Machine for Arc<M> {
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        (**self).command(ctx, args)
    }

    fn unshell(&self) -> Option<Arc<dyn Machine>> {
        (**self).unshell()
    }

    fn os(&self, ctx: &Context) -> Option<String> {
        (**self).os(ctx)
    }

    fn arch(&self, ctx: &Context) -> Option<String> {
        (**self).arch(ctx)
    }

    fn shutdown(&self, ctx: &Context) -> io::Result<()> {
        (**self).shutdown(ctx)
    }

    fn as_shell(&self) -> Option<&Shell> {
        (**self).as_shell()
    }
}

/// Adapts a closure into a [`Machine`].
pub struct MachineFunc<F>(pub F);

impl<F> Machine for MachineFunc<F>
where
    F: Fn(&Context, &[&str]) -> Box<dyn Buffer> + Send + Sync,
{
    fn command(&self, ctx: &Context, args: &[&str]) -> Box<dyn Buffer> {
        (self.0)(ctx, args)
    }
}

impl<F> fmt::Debug for MachineFunc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MachineFunc")
    }
}

/// Wrap a closure as a shareable machine.
pub fn machine_fn<F>(f: F) -> Arc<dyn Machine>
where
    F: Fn(&Context, &[&str]) -> Box<dyn Buffer> + Send + Sync + 'static,
{
    Arc::new(MachineFunc(f))
}

/// Shut `m` down with a context that cannot be cancelled, so cleanup runs
/// to completion even after the caller's context ended.
pub fn shutdown(ctx: &Context, m: &dyn Machine) -> io::Result<()> {
    m.shutdown(&ctx.without_cancel())
}
