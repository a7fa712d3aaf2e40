//! The launch session: one configurator conversation, one directive
//! stream, two threads.
//!
//! [`Session::run`] spawns the directive worker and turns the calling
//! thread into the main-thread service loop. The worker walks the stream in
//! order; for each directive it either hands execution to the main thread
//! (when that thread is idle in the service loop) or runs the directive
//! itself (when the main thread is busy or parked in a runloop). Either
//! way the worker waits for each directive's result before touching the
//! next one, so stream order is execution order.
//!
//! Result codes accumulate by bitwise OR, except that an `ERROR` directive
//! (the configurator's own verdict) overrides whatever has accumulated.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use tracing::{debug, error};

use crate::context::{MainTask, RunloopMode, ThreadContext};
use crate::directive::{Directive, DirectiveReader};
use crate::jvm::JvmRuntime;
use crate::platform;
use crate::python::PythonRuntime;
use crate::runtime::RuntimeLauncher;
use crate::{Error, HEADLESS};

/// Everything a launch needs once the configurator has answered: the
/// thread-context state machine plus the cached runtimes.
///
/// Not a process global: tests build as many sessions as they like.
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    ctx: ThreadContext,
    jvm: JvmRuntime,
    python: PythonRuntime,
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                ctx: ThreadContext::new(),
                jvm: JvmRuntime::default(),
                python: PythonRuntime::default(),
            }),
        }
    }

    /// Drive the full directive stream to completion and return the
    /// accumulated exit code.
    ///
    /// Must be called on the thread that created the session (the
    /// process's main thread in the real launcher), because directives may
    /// be dispatched back here while the worker coordinates the stream.
    pub fn run(&self, lines: Vec<String>) -> i32 {
        debug!("Starting directive processing thread");
        let worker_inner = Arc::clone(&self.inner);
        let worker = thread::Builder::new()
            .name("worker".into())
            .spawn(move || process_directives(&worker_inner, &lines))
            .expect("failed to spawn the directive worker");

        loop {
            match self.inner.ctx.next_main_task() {
                MainTask::Execute(directive) => {
                    debug!("Executing {} directive", directive.name);
                    let code = execute_directive(&self.inner, &directive);
                    self.inner.ctx.finish_main_task(code);
                }
                MainTask::Finished => break,
            }
        }
        debug!("Exiting directives loop");

        if worker.join().is_err() {
            error!("The directive worker panicked");
        }
        self.inner.ctx.exit_code()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-thread body: walk the stream in order, choosing for each
/// directive whether the main thread or this thread runs it.
fn process_directives(inner: &SessionInner, lines: &[String]) {
    let mut exit_code = 0;
    for item in DirectiveReader::new(lines) {
        let directive = match item {
            Ok(directive) => directive,
            Err(err) => {
                // A framing error poisons the rest of the stream; stop here
                // but still shut down in an orderly fashion.
                error!("{err}");
                exit_code |= err.exit_code();
                break;
            }
        };

        // While no runloop mode is locked in, the platform gets one chance
        // per directive to pick one; a chosen mode is activated through a
        // synthetic RUNLOOP directive before the real one runs.
        if inner.ctx.runloop_mode().is_none() {
            platform::runloop_config(&inner.ctx, &directive.name);
            if inner.ctx.runloop_mode().is_some() {
                let code = dispatch(
                    inner,
                    Directive {
                        name: "RUNLOOP".into(),
                        args: Vec::new(),
                    },
                );
                if code != 0 {
                    debug!("RUNLOOP auto-directive failed with code {code}");
                    exit_code |= code;
                }
            }
        }

        let overrides_exit_code = directive.name == "ERROR";
        let code = dispatch(inner, directive);
        if code != 0 {
            if overrides_exit_code {
                // The configurator's own error verdict wins outright.
                exit_code = code;
            } else {
                debug!("Directive failed with code {code}, continuing with remaining directives");
                exit_code |= code;
            }
        }
    }

    debug!("All directives processed, cleaning up runtimes");
    inner.jvm.cleanup();
    inner.python.cleanup();

    platform::runloop_stop();

    inner.ctx.complete(exit_code);
    debug!("Directive thread returning with exit code {exit_code}");
}

/// Run one directive on the main thread when it is available, or right here
/// on the worker when it is not.
fn dispatch(inner: &SessionInner, directive: Directive) -> i32 {
    if inner.ctx.main_thread_available() {
        debug!("Dispatching {} directive to main thread", directive.name);
        inner.ctx.request_main_execution(directive)
    } else {
        debug!("Executing {} directive on worker thread", directive.name);
        execute_directive(inner, &directive)
    }
}

/// Execute a single directive and return its result code.
fn execute_directive(inner: &SessionInner, directive: &Directive) -> i32 {
    match directive.name.as_str() {
        "JVM" => run_runtime(inner, &inner.jvm, &directive.args),
        "PYTHON" => run_runtime(inner, &inner.python, &directive.args),
        "SETCWD" => set_cwd(&directive.args),
        "INIT_THREADS" => match platform::init_threads() {
            Ok(()) => 0,
            Err(err) => {
                error!("{err}");
                err.exit_code()
            }
        },
        "RUNLOOP" => run_runloop(inner, &directive.args),
        "ERROR" => report_error(&directive.args),
        other => {
            error!("Unknown directive: {other}");
            Error::UnknownDirective(other.to_string()).exit_code()
        }
    }
}

fn run_runtime(inner: &SessionInner, runtime: &dyn RuntimeLauncher, args: &[String]) -> i32 {
    match platform::launch(&inner.ctx, runtime, args) {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to launch {}: {err}", runtime.name());
            err.exit_code()
        }
    }
}

fn set_cwd(args: &[String]) -> i32 {
    let Some(dir) = args.first() else {
        error!("Ignoring invalid SETCWD directive with no argument.");
        return Error::BadDirectiveSyntax("SETCWD requires a directory".into()).exit_code();
    };
    debug!("Changing working directory to {dir}");
    match std::env::set_current_dir(dir) {
        Ok(()) => 0,
        Err(err) => {
            error!("Failed to change working directory to {dir}: {err}");
            // The chdir result, as the stream contract has always promised.
            -1
        }
    }
}

fn run_runloop(inner: &SessionInner, args: &[String]) -> i32 {
    let mode = match args.first() {
        Some(arg) => match RunloopMode::parse(arg) {
            Some(mode) => mode,
            None => {
                error!("Ignoring invalid RUNLOOP mode: {arg}");
                return Error::BadDirectiveSyntax(format!("unknown runloop mode {arg:?}"))
                    .exit_code();
            }
        },
        None => match inner.ctx.runloop_mode() {
            Some(mode) => mode,
            None => {
                error!("Ignoring invalid RUNLOOP directive with no mode.");
                return Error::BadDirectiveSyntax("RUNLOOP requires a mode".into()).exit_code();
            }
        },
    };
    let mode = match mode {
        RunloopMode::Auto => platform::default_runloop_mode(),
        other => other,
    };

    debug!("Invoking runloop with mode {mode:?}");
    inner.ctx.set_runloop_mode(mode);
    platform::runloop_run(&inner.ctx, mode);
    0
}

fn report_error(args: &[String]) -> i32 {
    let messages: &[String] = if args.len() > 1 { &args[1..] } else { &[] };
    for line in messages {
        error!("{line}");
    }
    if messages.is_empty() {
        error!("An unknown error occurred.");
    }

    if !HEADLESS.load(Ordering::Relaxed) {
        let message = if messages.is_empty() {
            "An unknown error occurred.".to_string()
        } else {
            messages.join("\n")
        };
        platform::show_alert("Error", &message);
    }

    // No code line means the worst; a non-numeric code means zero. Either
    // way the result lands in the error band reserved for the configurator.
    let code = match args.first() {
        Some(code) => code.parse::<i32>().unwrap_or(0),
        None => 255,
    };
    code.clamp(20, 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raw: &[&str]) -> i32 {
        // Alerts would hang a test run; every session test is headless.
        HEADLESS.store(true, Ordering::Relaxed);
        let lines: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        Session::new().run(lines)
    }

    #[test]
    fn bare_abort_exits_cleanly() {
        assert_eq!(run(&["ABORT"]), 0);
    }

    #[test]
    fn setcwd_to_current_directory_succeeds() {
        assert_eq!(run(&["SETCWD", "1", ".", "ABORT"]), 0);
    }

    #[test]
    fn setcwd_without_argument_is_bad_syntax() {
        assert_eq!(run(&["SETCWD", "0"]), 17);
    }

    #[test]
    fn unknown_directive_yields_its_code() {
        assert_eq!(run(&["BADNAME", "0"]), 16);
    }

    #[test]
    fn error_codes_accumulate_by_bitwise_or() {
        // Unknown directive (16) then bad SETCWD (17): 16 | 17 == 17.
        assert_eq!(run(&["BADNAME", "0", "SETCWD", "0"]), 17);
    }

    #[test]
    fn error_directive_code_passes_through() {
        assert_eq!(run(&["ERROR", "3", "42", "Foo", "Bar"]), 42);
    }

    #[test]
    fn error_directive_code_is_clamped_low() {
        assert_eq!(run(&["ERROR", "2", "1", "Oops"]), 20);
    }

    #[test]
    fn error_directive_code_is_clamped_high() {
        assert_eq!(run(&["ERROR", "1", "7777"]), 255);
    }

    #[test]
    fn error_directive_overrides_accumulated_codes() {
        assert_eq!(run(&["BADNAME", "0", "ERROR", "2", "42", "Foo"]), 42);
    }

    #[test]
    fn non_numeric_error_code_clamps_to_twenty() {
        assert_eq!(run(&["ERROR", "2", "banana", "Oops"]), 20);
    }

    #[test]
    fn framing_error_stops_the_stream() {
        // The malformed count aborts processing; the trailing ERROR
        // directive never runs.
        assert_eq!(run(&["SETCWD", "banana", "/tmp", "ERROR", "1", "99"]), 17);
    }

    #[test]
    fn directives_after_abort_are_ignored() {
        assert_eq!(run(&["ABORT", "BADNAME", "0"]), 0);
    }

    #[test]
    fn runloop_none_locks_the_mode() {
        let lines: Vec<String> = ["RUNLOOP", "1", "none", "ABORT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let session = Session::new();
        assert_eq!(session.run(lines), 0);
        assert_eq!(session.inner.ctx.runloop_mode(), Some(RunloopMode::None));
    }

    #[test]
    fn runloop_with_unknown_mode_is_bad_syntax() {
        assert_eq!(run(&["RUNLOOP", "1", "sideways"]), 17);
    }

    #[test]
    fn runloop_without_mode_or_lock_is_bad_syntax() {
        assert_eq!(run(&["RUNLOOP", "0"]), 17);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parked_main_thread_moves_execution_to_the_worker() {
        // RUNLOOP park is dispatched to the main thread, which signals
        // early completion and parks; the remaining directives then run on
        // the worker and their codes still accumulate.
        assert_eq!(run(&["RUNLOOP", "1", "park", "BADNAME", "0"]), 16);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn init_threads_directive_succeeds_or_reports_missing_function() {
        let code = run(&["INIT_THREADS", "0", "ABORT"]);
        assert!(code == 0 || code == 18, "unexpected code {code}");
    }
}
