//! Polymorphic surface over the embeddable runtimes.

use crate::Error;

/// A runtime that can be loaded into the launcher's process and handed a
/// main program: load the shared library, resolve the entry symbol, marshal
/// the directive's arguments, invoke, and keep whatever must stay cached.
///
/// Implementations are stateful: repeated launches reuse the cached
/// instance, and [`cleanup`](RuntimeLauncher::cleanup) runs once when the
/// directive stream is exhausted. Adding a runtime kind means one new
/// implementation plus one new directive name in the interpreter.
pub trait RuntimeLauncher: Send + Sync {
    /// Short tag for log lines.
    fn name(&self) -> &'static str;

    /// Run the runtime per its directive argument contract and return its
    /// exit code.
    fn launch(&self, args: &[String]) -> Result<i32, Error>;

    /// Tear down any cached state. Called exactly once, after the last
    /// directive.
    fn cleanup(&self);
}
