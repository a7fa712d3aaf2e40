use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::Ordering;

use tracing::{debug, error};

use jaunch::configurator::{self, SEARCH_DIRS};
use jaunch::{Error, HEADLESS, Session, logging, platform};

fn main() {
    let args: Vec<String> = env::args().collect();

    let verbosity = args.iter().filter(|arg| arg.as_str() == "--debug").count() as u8;
    let headless = args.iter().any(|arg| arg == "--headless");
    logging::init(verbosity);
    HEADLESS.store(headless, Ordering::Relaxed);

    platform::setup();

    let code = match launch(&args) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    };

    platform::teardown();
    process::exit(code);
}

fn launch(args: &[String]) -> Result<i32, Error> {
    let exe = env::current_exe()
        .map(|path| platform::canonical_path(&path))
        .unwrap_or_else(|_| PathBuf::from(args.first().cloned().unwrap_or_default()));
    let exe_dir = exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let command = configurator::locate(&exe_dir, SEARCH_DIRS)?;

    // The configurator sees the original argv with one internal option
    // spliced in at index 1: the target architecture, so that arm64 hosts
    // can elect to launch an emulated x64 runtime.
    let mut forwarded = Vec::with_capacity(args.len() + 1);
    forwarded.push(args.first().cloned().unwrap_or_default());
    forwarded.push(format!("--jaunch-target-arch={}", platform::ARCH));
    forwarded.extend(args.iter().skip(1).cloned());

    let lines = configurator::run(&command, &forwarded)?;
    debug!("Configurator returned {} lines", lines.len());

    Ok(Session::new().run(lines))
}
