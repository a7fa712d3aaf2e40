//! Jaunch is a configurable native launcher: it starts a non-native runtime
//! (a Java Virtual Machine or a CPython interpreter) inside the launcher's
//! own process, by dynamically loading the runtime's shared library and
//! invoking its entry point.
//!
//! The launcher itself decides nothing about *what* to launch. That job
//! belongs to an external "configurator" program, which is run once as a
//! child process: the launcher feeds it the original command-line arguments
//! over stdin and receives back a stream of directives telling it what to do
//! (load this JVM with these options, change directory, enter the platform
//! event loop, report this error, and so on).
//!
//! ## Thread Considerations
//!
//! Some platforms insist that GUI frameworks run their event loop on the
//! process's main thread, while the directive stream is coordinated by a
//! dedicated worker thread. The [`context::ThreadContext`] state machine
//! mediates between the two: the worker hands each directive to the main
//! thread when it is available, and runs it locally when the main thread is
//! busy or parked in a runloop.
//!
//! ## Pipeline
//!
//! `main` → platform setup → locate the configurator → run it with framed
//! stdin → spawn the directive worker → service cross-thread execution
//! requests on the main thread → clean up cached runtimes → exit with the
//! accumulated code.

pub mod configurator;
pub mod context;
pub mod directive;
pub mod jvm;
pub mod logging;
pub mod platform;
pub mod python;
pub mod runtime;
pub mod session;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use thiserror::Error as ThisError;

pub use session::Session;

/// Suppresses GUI alert dialogs when set.
///
/// This is a process-wide atomic rather than a field on [`Session`] because
/// the SIGABRT crash handler has to consult it from signal context.
pub static HEADLESS: AtomicBool = AtomicBool::new(false);

/// Exit code used by the crash handler when the runtime aborts the process.
pub const ERROR_RUNTIME_CRASH: i32 = 20;

/// Everything that can go wrong in the launcher, one variant per failure
/// kind so each maps to a distinct exit code.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("failed to load library {}: {source}", path.display())]
    LibraryOpen {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("failed to resolve symbol {name}: {source}")]
    SymbolLookup {
        name: &'static str,
        source: libloading::Error,
    },

    #[error("failed to create the Java Virtual Machine")]
    CreateJavaVm,

    #[error("failed to locate class {0}")]
    ClassNotFound(String),

    #[error("failed to find main method of class {0}")]
    MainMethodNotFound(String),

    #[error("pipe I/O with the configurator failed: {0}")]
    Pipe(std::io::Error),

    #[error("failed to spawn {}: {source}", command.display())]
    Spawn {
        command: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to wait for the configurator: {0}")]
    Wait(std::io::Error),

    #[error("failed to locate the jaunch configurator program")]
    CommandPath,

    #[error("configurator output is unusable: {0}")]
    MalformedOutput(String),

    #[error("{what} argument count {count} outside [{min}, {max}]")]
    ArgcOutOfBounds {
        what: &'static str,
        count: usize,
        min: usize,
        max: usize,
    },

    #[error("unknown directive: {0}")]
    UnknownDirective(String),

    #[error("bad directive syntax: {0}")]
    BadDirectiveSyntax(String),

    #[error("missing function {0}")]
    MissingFunction(&'static str),
}

impl Error {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::LibraryOpen { .. } => 1,
            Error::SymbolLookup { .. } => 2,
            Error::CreateJavaVm => 3,
            Error::ClassNotFound(_) => 4,
            Error::MainMethodNotFound(_) => 5,
            Error::Pipe(_) => 6,
            Error::Spawn { .. } => 7,
            Error::Wait(_) => 11,
            Error::CommandPath => 13,
            Error::MalformedOutput(_) => 14,
            Error::ArgcOutOfBounds { .. } => 15,
            Error::UnknownDirective(_) => 16,
            Error::BadDirectiveSyntax(_) => 17,
            Error::MissingFunction(_) => 18,
        }
    }
}
