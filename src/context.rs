//! Cross-thread coordination between the main thread and the directive
//! worker.
//!
//! The main thread owns platform facilities that must run there (AppKit,
//! the CoreFoundation runloop), while the configurator's directive stream is
//! driven by a dedicated worker thread. [`ThreadContext`] is the hand-off
//! point: the worker parks a directive in the pending slot and waits, the
//! main thread executes it and reports the result back.
//!
//! States move `WAITING → EXECUTING → WAITING` for an ordinary dispatch. A
//! directive that enters a long-lived blocking state on the main thread (a
//! platform runloop) signals *early completion* instead, moving to
//! `RUNLOOP`; from then on the worker executes subsequent directives on its
//! own thread. `COMPLETE` is terminal and set once by the worker.
//!
//! All waits are predicate loops, so spurious wakeups are harmless.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::directive::Directive;

/// Main-thread availability states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Idle in the service loop, ready to take a directive.
    Waiting,
    /// Executing a directive on behalf of the worker.
    Executing,
    /// Blocked in a long-lived platform runloop.
    Runloop,
    /// The worker has consumed the whole directive stream.
    Complete,
}

/// Event-loop policy, locked in at most once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunloopMode {
    /// Run the runtime on the main thread with the GUI framework loaded.
    Main,
    /// Park the main thread in the platform event loop; the runtime runs on
    /// a worker thread.
    Park,
    /// No event loop at all.
    None,
    /// Let the platform pick.
    Auto,
}

impl RunloopMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(RunloopMode::Main),
            "park" => Some(RunloopMode::Park),
            "none" => Some(RunloopMode::None),
            "auto" => Some(RunloopMode::Auto),
            _ => None,
        }
    }
}

/// What the main thread should do next.
pub enum MainTask {
    /// Execute this directive and report back via
    /// [`ThreadContext::finish_main_task`].
    Execute(Directive),
    /// The stream is done; leave the service loop.
    Finished,
}

struct Inner {
    state: ThreadState,
    pending: Option<Directive>,
    result: i32,
    runloop_mode: Option<RunloopMode>,
    exit_code: i32,
}

/// Shared state machine coordinating the main thread and the directive
/// worker. Created on the main thread before the worker starts.
pub struct ThreadContext {
    inner: Mutex<Inner>,
    cond: Condvar,
    main_thread: ThreadId,
}

impl ThreadContext {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ThreadState::Waiting,
                pending: None,
                result: 0,
                runloop_mode: None,
                exit_code: 0,
            }),
            cond: Condvar::new(),
            main_thread: thread::current().id(),
        }
    }

    /// Whether the calling thread is the one that created this context.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_thread
    }

    /// True when the main thread is idle in its service loop and can take a
    /// directive. Only the worker moves the state out of `WAITING`, so the
    /// answer stays valid until the worker acts on it.
    pub fn main_thread_available(&self) -> bool {
        self.inner.lock().state == ThreadState::Waiting
    }

    /// Worker side: hand a directive to the main thread and block until it
    /// finishes.
    ///
    /// Returns the directive's result code, or 0 if the main thread entered
    /// a long-lived runloop before completing (early completion).
    pub fn request_main_execution(&self, directive: Directive) -> i32 {
        let mut inner = self.inner.lock();
        debug_assert_eq!(inner.state, ThreadState::Waiting);
        inner.pending = Some(directive);
        inner.result = 0;
        inner.state = ThreadState::Executing;
        self.cond.notify_all();

        while inner.state == ThreadState::Executing {
            self.cond.wait(&mut inner);
        }
        inner.result
    }

    /// Main side: block until there is a directive to execute or the worker
    /// has finished.
    pub fn next_main_task(&self) -> MainTask {
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                ThreadState::Waiting | ThreadState::Runloop => self.cond.wait(&mut inner),
                ThreadState::Executing => {
                    let directive = inner.pending.take().unwrap();
                    return MainTask::Execute(directive);
                }
                ThreadState::Complete => return MainTask::Finished,
            }
        }
    }

    /// Main side: record a finished directive's result and hand control back
    /// to the worker.
    pub fn finish_main_task(&self, code: i32) {
        let mut inner = self.inner.lock();
        inner.result = code;
        // signal_early_completion may have moved the state to Runloop (or
        // the worker to Complete) while the directive was executing; those
        // transitions stand.
        if inner.state == ThreadState::Executing {
            inner.state = ThreadState::Waiting;
        }
        self.cond.notify_all();
    }

    /// Called from a directive on the main thread that has entered (or is
    /// about to enter) a long-lived blocking state. Wakes the worker, which
    /// then executes subsequent directives on its own thread.
    pub fn signal_early_completion(&self) {
        let mut inner = self.inner.lock();
        if inner.state == ThreadState::Executing {
            inner.state = ThreadState::Runloop;
            self.cond.notify_all();
        }
    }

    /// Lock in the runloop mode. The mode is monotonic: the first call wins
    /// and later calls are ignored.
    pub fn set_runloop_mode(&self, mode: RunloopMode) -> bool {
        let mut inner = self.inner.lock();
        match inner.runloop_mode {
            Some(current) => {
                debug!(?current, ignored = ?mode, "Runloop mode already locked in");
                false
            }
            None => {
                inner.runloop_mode = Some(mode);
                true
            }
        }
    }

    pub fn runloop_mode(&self) -> Option<RunloopMode> {
        self.inner.lock().runloop_mode
    }

    /// Worker side: all directives consumed. Publishes the accumulated exit
    /// code and wakes the main thread out of its service loop (and out of
    /// any parked runloop stub).
    pub fn complete(&self, exit_code: i32) {
        let mut inner = self.inner.lock();
        inner.exit_code = exit_code;
        inner.state = ThreadState::Complete;
        self.cond.notify_all();
    }

    pub fn exit_code(&self) -> i32 {
        self.inner.lock().exit_code
    }

    pub fn is_complete(&self) -> bool {
        self.inner.lock().state == ThreadState::Complete
    }

    /// Block the calling thread until the worker completes. Used by runloop
    /// parking on platforms with no native event loop to service.
    pub fn park_until_complete(&self) {
        let mut inner = self.inner.lock();
        while inner.state != ThreadState::Complete {
            self.cond.wait(&mut inner);
        }
    }

    #[cfg(test)]
    fn spur(&self) {
        self.cond.notify_all();
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn directive(name: &str) -> Directive {
        Directive {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    /// Drive a full main service loop that records execution order.
    fn serve(ctx: Arc<ThreadContext>) -> thread::JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let mut seen = Vec::new();
            loop {
                match ctx.next_main_task() {
                    MainTask::Execute(d) => {
                        seen.push(d.name.clone());
                        ctx.finish_main_task(d.args.len() as i32);
                    }
                    MainTask::Finished => return seen,
                }
            }
        })
    }

    #[test]
    fn directives_execute_in_request_order() {
        let ctx = Arc::new(ThreadContext::new());
        let main = serve(Arc::clone(&ctx));

        for name in ["SETCWD", "INIT_THREADS", "JVM"] {
            assert!(ctx.main_thread_available());
            assert_eq!(ctx.request_main_execution(directive(name)), 0);
        }
        ctx.complete(0);

        assert_eq!(main.join().unwrap(), vec!["SETCWD", "INIT_THREADS", "JVM"]);
    }

    #[test]
    fn result_codes_round_trip() {
        let ctx = Arc::new(ThreadContext::new());
        let main = serve(Arc::clone(&ctx));

        let mut d = directive("ERROR");
        d.args = vec!["20".into(), "boom".into()];
        assert_eq!(ctx.request_main_execution(d), 2);

        ctx.complete(0);
        main.join().unwrap();
    }

    #[test]
    fn early_completion_releases_worker_before_directive_finishes() {
        let ctx = Arc::new(ThreadContext::new());

        let main = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let MainTask::Execute(_) = ctx.next_main_task() else {
                    panic!("expected a directive");
                };
                ctx.signal_early_completion();
                // Simulate a runloop that only exits once the worker is done.
                ctx.park_until_complete();
                ctx.finish_main_task(0);
            })
        };

        // Returns 0 without the main thread ever calling finish_main_task.
        assert_eq!(ctx.request_main_execution(directive("RUNLOOP")), 0);
        assert!(!ctx.main_thread_available());
        ctx.complete(7);
        main.join().unwrap();
        assert_eq!(ctx.exit_code(), 7);
    }

    #[test]
    fn spurious_wakeups_do_not_break_waits() {
        let ctx = Arc::new(ThreadContext::new());

        let noise = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for _ in 0..100 {
                    ctx.spur();
                    thread::sleep(Duration::from_micros(50));
                }
            })
        };

        let main = serve(Arc::clone(&ctx));
        assert_eq!(ctx.request_main_execution(directive("SETCWD")), 0);
        ctx.complete(0);

        assert_eq!(main.join().unwrap(), vec!["SETCWD"]);
        noise.join().unwrap();
    }

    #[test]
    fn runloop_mode_is_monotonic() {
        let ctx = ThreadContext::new();
        assert_eq!(ctx.runloop_mode(), None);
        assert!(ctx.set_runloop_mode(RunloopMode::Park));
        assert!(!ctx.set_runloop_mode(RunloopMode::Main));
        assert_eq!(ctx.runloop_mode(), Some(RunloopMode::Park));
    }

    #[test]
    fn parse_runloop_modes() {
        assert_eq!(RunloopMode::parse("main"), Some(RunloopMode::Main));
        assert_eq!(RunloopMode::parse("park"), Some(RunloopMode::Park));
        assert_eq!(RunloopMode::parse("none"), Some(RunloopMode::None));
        assert_eq!(RunloopMode::parse("auto"), Some(RunloopMode::Auto));
        assert_eq!(RunloopMode::parse("MAIN"), None);
        assert_eq!(RunloopMode::parse(""), None);
    }

    #[test]
    fn main_thread_identity_follows_creator() {
        let ctx = Arc::new(ThreadContext::new());
        assert!(ctx.is_main_thread());
        let ctx2 = Arc::clone(&ctx);
        thread::spawn(move || assert!(!ctx2.is_main_thread()))
            .join()
            .unwrap();
    }
}
