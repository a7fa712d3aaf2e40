//! Locating and running the configurator program.
//!
//! The configurator makes every interesting decision: which runtime to use,
//! where it lives, how the user's arguments translate into runtime and main
//! arguments. The launcher's only jobs here are to find the right binary
//! next to itself and to talk to it without deadlocking.
//!
//! To avoid shell quoting pitfalls the child is started with the single
//! literal argument `-`; the real argument vector is written to its stdin,
//! framed by a leading count line so the child can stop reading after
//! exactly that many lines instead of waiting for EOF. The launcher writes
//! everything and closes the pipe before reading stdout, which sidesteps
//! the classic reader/writer deadlock for any realistic argument volume.

use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::Error;
use crate::platform::{ARCH, EXE_SUFFIX, OS_NAME, SUFFIX_FALLBACK};

/// Directories searched for the configurator, relative to the launcher's
/// own directory. The final empty entry is the launcher directory itself.
pub const SEARCH_DIRS: &[&str] = &[
    "jaunch",
    ".jaunch",
    "config/jaunch",
    ".config/jaunch",
    "Contents/MacOS",
    "",
];

/// Maximum number of output lines treated as valid. A configurator
/// programming error is far more likely than a directive stream this large,
/// and failing fast beats walking garbage.
const MAX_OUTPUT_LINES: usize = 99_999;

/// Search `dirs` (relative to `exe_dir`) for the configurator binary.
///
/// Per directory, a platform-specific `jaunch-<os>-<arch>` binary wins over
/// an emulation fallback, which wins over a plain `jaunch`. The first
/// existing candidate is returned.
pub fn locate(exe_dir: &Path, dirs: &[&str]) -> Result<PathBuf, Error> {
    let mut names = vec![format!("jaunch-{OS_NAME}-{ARCH}{EXE_SUFFIX}")];
    if !SUFFIX_FALLBACK.is_empty() {
        names.push(format!("jaunch-{SUFFIX_FALLBACK}{EXE_SUFFIX}"));
    }
    names.push(format!("jaunch{EXE_SUFFIX}"));

    for dir in dirs {
        let base = if dir.is_empty() {
            exe_dir.to_path_buf()
        } else {
            exe_dir.join(dir)
        };
        for name in &names {
            let candidate = base.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
            debug!("No configurator at {}", candidate.display());
        }
    }
    Err(Error::CommandPath)
}

/// Run the configurator, write `args` to its stdin using the framed
/// protocol, and collect its stdout lines.
///
/// The child inherits stderr on POSIX; on Windows a dedicated thread pumps
/// the child's stderr into the parent's. Both `\n` and `\r\n` terminators
/// are accepted on the way back.
pub fn run(command: &Path, args: &[String]) -> Result<Vec<String>, Error> {
    debug!("Configurator command: {}", command.display());

    let mut child = Command::new(command)
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr_config())
        .spawn()
        .map_err(|source| Error::Spawn {
            command: command.to_path_buf(),
            source,
        })?;

    #[cfg(windows)]
    let stderr_pump = spawn_stderr_pump(&mut child);

    {
        let mut writer = BufWriter::new(child.stdin.take().unwrap());
        writeln!(writer, "{}", args.len()).map_err(Error::Pipe)?;
        for arg in args {
            writeln!(writer, "{arg}").map_err(Error::Pipe)?;
        }
        writer.flush().map_err(Error::Pipe)?;
        // Dropping the writer closes the pipe: EOF for the child.
    }

    let mut raw = Vec::new();
    child
        .stdout
        .take()
        .unwrap()
        .read_to_end(&mut raw)
        .map_err(Error::Pipe)?;
    let status = child.wait().map_err(Error::Wait)?;
    debug!("Configurator exited with {status}");

    #[cfg(windows)]
    let _ = stderr_pump.join();

    let text = String::from_utf8(raw)
        .map_err(|_| Error::MalformedOutput("output is not valid UTF-8".into()))?;
    let lines: Vec<String> = text.lines().map(str::to_owned).collect();
    if lines.is_empty() {
        return Err(Error::MalformedOutput("no output lines".into()));
    }
    if lines.len() > MAX_OUTPUT_LINES {
        return Err(Error::MalformedOutput(format!(
            "{} output lines",
            lines.len()
        )));
    }
    Ok(lines)
}

#[cfg(not(windows))]
fn stderr_config() -> Stdio {
    Stdio::inherit()
}

#[cfg(windows)]
fn stderr_config() -> Stdio {
    Stdio::piped()
}

#[cfg(windows)]
fn spawn_stderr_pump(child: &mut std::process::Child) -> std::thread::JoinHandle<()> {
    let mut stderr = child.stderr.take().unwrap();
    std::thread::spawn(move || {
        let _ = std::io::copy(&mut stderr, &mut std::io::stderr());
    })
}
