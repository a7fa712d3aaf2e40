//! Leveled stderr logging.
//!
//! Verbosity follows the stacked `--debug` flag: warnings and errors are
//! always emitted, one `--debug` adds INFO, two add DEBUG, anything beyond
//! that turns on TRACE. Every line carries the emitting module and the
//! thread name, so interleaved main/worker output stays readable.

use std::io::IsTerminal;

use tracing::level_filters::LevelFilter;

/// Install the global stderr subscriber.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_thread_names(true)
        .with_target(true)
        .without_time()
        .try_init();
}
