//! Platform adapter: the uniform capability surface the rest of the
//! launcher programs against.
//!
//! Everything that differs per operating system lives here: dynamic
//! linking flags, console wiring, alert dialogs, thread prerequisites, and
//! above all the runloop policy. On Linux and Windows the runloop
//! primitives are (nearly) inert and runtimes run on whichever thread asks;
//! macOS is the event-loop-intensive platform where the main thread may
//! have to be parked in the CoreFoundation runloop while the runtime runs
//! elsewhere.

use std::path::{Path, PathBuf};

use tracing::debug;
#[cfg(any(target_os = "linux", target_os = "macos"))]
use tracing::warn;

use crate::Error;
use crate::context::{RunloopMode, ThreadContext};
use crate::runtime::RuntimeLauncher;

// -- Naming constants --

#[cfg(target_os = "linux")]
pub const OS_NAME: &str = "linux";
#[cfg(target_os = "macos")]
pub const OS_NAME: &str = "macos";
#[cfg(target_os = "windows")]
pub const OS_NAME: &str = "windows";

#[cfg(target_arch = "x86_64")]
pub const ARCH: &str = "x64";
#[cfg(target_arch = "aarch64")]
pub const ARCH: &str = "arm64";

#[cfg(windows)]
pub const EXE_SUFFIX: &str = ".exe";
#[cfg(not(windows))]
pub const EXE_SUFFIX: &str = "";

// windows-arm64 emulates windows-x64 well, so configurator discovery may
// fall back to the x64 build there.
#[cfg(all(windows, target_arch = "aarch64"))]
pub const SUFFIX_FALLBACK: &str = "windows-x64";
#[cfg(not(all(windows, target_arch = "aarch64")))]
pub const SUFFIX_FALLBACK: &str = "";

// -- Dynamic linking --

/// Open a runtime's shared library.
///
/// Symbols are resolved eagerly and exported globally, so runtime plugins
/// (JNI agents, Python extension modules) can back-link against them. On
/// Windows the library's own directory joins the DLL search path first, so
/// transitive dependencies such as the bundled CRT resolve.
pub fn open_runtime_library(path: &Path) -> Result<libloading::Library, Error> {
    #[cfg(unix)]
    {
        use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};

        unsafe { Library::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }
            .map(Into::into)
            .map_err(|source| Error::LibraryOpen {
                path: path.to_path_buf(),
                source,
            })
    }

    #[cfg(windows)]
    {
        if let Some(dir) = path.parent() {
            set_dll_directory(dir);
        }
        unsafe { libloading::Library::new(path) }.map_err(|source| Error::LibraryOpen {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(windows)]
fn set_dll_directory(dir: &Path) {
    use windows::Win32::System::LibraryLoader::SetDllDirectoryW;
    use windows::core::PCWSTR;

    let path = wide(&dir.to_string_lossy());
    if let Err(err) = unsafe { SetDllDirectoryW(PCWSTR(path.as_ptr())) } {
        debug!("SetDllDirectoryW failed for {}: {err}", dir.display());
    }
}

#[cfg(windows)]
fn wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

// -- File system --

/// Resolve symlinks; on failure hand back the input unchanged.
pub fn canonical_path(path: &Path) -> PathBuf {
    #[cfg(windows)]
    {
        dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }
    #[cfg(not(windows))]
    {
        std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }
}

// -- Process setup / teardown --

/// Perform initial platform-specific setup.
///
/// All platforms install the SIGABRT crash handler. Windows additionally
/// attaches to the parent's console and rewires the standard streams, and
/// macOS undoes Gatekeeper's app translocation by re-executing from the
/// original path when possible.
pub fn setup() {
    install_crash_handler();

    #[cfg(target_os = "windows")]
    windows_console_setup();

    #[cfg(target_os = "macos")]
    resolve_translocation();
}

/// Final platform-specific cleanup, symmetric with [`setup`].
///
/// Nothing needs undoing today; the hook exists so the lifecycle stays
/// explicit at the call site.
pub fn teardown() {}

/// Install the SIGABRT handler. Runtimes (HotSpot in particular) abort the
/// process on unrecoverable internal errors, and the user deserves more
/// than a silent death.
fn install_crash_handler() {
    #[cfg(unix)]
    {
        unsafe extern "C" fn on_abort(_signal: libc::c_int) {
            const MESSAGE: &[u8] = b"The runtime crashed (SIGABRT).\n";
            unsafe {
                libc::write(libc::STDERR_FILENO, MESSAGE.as_ptr().cast(), MESSAGE.len());
            }
            if !crate::HEADLESS.load(std::sync::atomic::Ordering::Relaxed) {
                show_alert("Error", "The runtime crashed (SIGABRT).");
            }
            unsafe { libc::_exit(crate::ERROR_RUNTIME_CRASH) };
        }

        let handler = on_abort as unsafe extern "C" fn(libc::c_int);
        unsafe {
            libc::signal(libc::SIGABRT, handler as usize);
        }
    }
}

#[cfg(target_os = "windows")]
fn windows_console_setup() {
    use windows::Win32::System::Console::{ATTACH_PARENT_PROCESS, AttachConsole};

    // A GUI-subsystem binary starts without a console; borrow the parent's
    // so log output lands somewhere when launched from a terminal.
    if unsafe { AttachConsole(ATTACH_PARENT_PROCESS) }.is_err() {
        return;
    }

    // MSYS bash wires the standard streams through pipes, not a real
    // console; reopening CONOUT$ there would detach them from the shell.
    match parent_process_name() {
        Some(name) if name.eq_ignore_ascii_case("bash.exe") => {
            debug!("Parent shell is {name}; keeping inherited streams");
        }
        _ => reopen_console_streams(),
    }
}

#[cfg(target_os = "windows")]
fn parent_process_name() -> Option<String> {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::System::Threading::GetCurrentProcessId;

    unsafe {
        let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).ok()?;
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let current = GetCurrentProcessId();
        let mut parent_pid = None;
        if Process32FirstW(snapshot, &mut entry).is_ok() {
            loop {
                if entry.th32ProcessID == current {
                    parent_pid = Some(entry.th32ParentProcessID);
                    break;
                }
                if Process32NextW(snapshot, &mut entry).is_err() {
                    break;
                }
            }
        }

        let mut name = None;
        if let Some(parent) = parent_pid {
            // Process32FirstW rewinds the snapshot for the second scan.
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    if entry.th32ProcessID == parent {
                        let len = entry
                            .szExeFile
                            .iter()
                            .position(|&c| c == 0)
                            .unwrap_or(entry.szExeFile.len());
                        name = Some(String::from_utf16_lossy(&entry.szExeFile[..len]));
                        break;
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
        }

        let _ = CloseHandle(snapshot);
        name
    }
}

#[cfg(target_os = "windows")]
fn reopen_console_streams() {
    use windows::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE};
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    };
    use windows::Win32::System::Console::{STD_ERROR_HANDLE, STD_OUTPUT_HANDLE, SetStdHandle};
    use windows::core::PCWSTR;

    let conout = wide("CONOUT$");
    let handle = unsafe {
        CreateFileW(
            PCWSTR(conout.as_ptr()),
            (GENERIC_READ | GENERIC_WRITE).0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            None,
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            None,
        )
    };
    if let Ok(handle) = handle {
        unsafe {
            let _ = SetStdHandle(STD_OUTPUT_HANDLE, handle);
            let _ = SetStdHandle(STD_ERROR_HANDLE, handle);
        }
    }
}

/// Gatekeeper copies quarantined apps to a randomized read-only mount
/// before running them, which breaks sibling-path discovery of the
/// configurator. Re-exec from the original location when it can still be
/// resolved.
#[cfg(target_os = "macos")]
fn resolve_translocation() {
    use std::os::unix::process::CommandExt;

    let Ok(exe) = std::env::current_exe() else {
        return;
    };
    if !exe.to_string_lossy().contains("/AppTranslocation/") {
        return;
    }
    let Some(original) = untranslocated_path(&exe) else {
        warn!("Running from a translocated path; configurator discovery may fail");
        return;
    };
    debug!("Relaunching from {}", original.display());
    let err = std::process::Command::new(&original)
        .args(std::env::args().skip(1))
        .exec();
    warn!("Failed to relaunch from original path: {err}");
}

/// Resolve the pre-translocation path via the Security framework. The
/// symbols are looked up dynamically; the launcher has no other reason to
/// link Security.
#[cfg(target_os = "macos")]
fn untranslocated_path(exe: &Path) -> Option<PathBuf> {
    use std::ffi::{OsStr, c_void};
    use std::os::unix::ffi::OsStrExt;

    type CfRef = *mut c_void;

    let cf = unsafe {
        libloading::Library::new("/System/Library/Frameworks/CoreFoundation.framework/CoreFoundation")
    }
    .ok()?;
    let security =
        unsafe { libloading::Library::new("/System/Library/Frameworks/Security.framework/Security") }
            .ok()?;

    let original = unsafe {
        let url_create: libloading::Symbol<
            unsafe extern "C" fn(CfRef, *const u8, isize, bool) -> CfRef,
        > = cf.get(b"CFURLCreateFromFileSystemRepresentation\0").ok()?;
        let url_get: libloading::Symbol<
            unsafe extern "C" fn(CfRef, bool, *mut u8, isize) -> bool,
        > = cf.get(b"CFURLGetFileSystemRepresentation\0").ok()?;
        let release: libloading::Symbol<unsafe extern "C" fn(CfRef)> =
            cf.get(b"CFRelease\0").ok()?;
        let untranslocate: libloading::Symbol<
            unsafe extern "C" fn(CfRef, *mut CfRef) -> CfRef,
        > = security
            .get(b"SecTranslocateCreateOriginalPathForURL\0")
            .ok()?;

        let bytes = exe.as_os_str().as_bytes();
        let url = url_create(
            std::ptr::null_mut(),
            bytes.as_ptr(),
            bytes.len() as isize,
            false,
        );
        if url.is_null() {
            return None;
        }
        let resolved = untranslocate(url, std::ptr::null_mut());
        release(url);
        if resolved.is_null() {
            return None;
        }

        let mut buf = [0u8; libc::PATH_MAX as usize];
        let ok = url_get(resolved, true, buf.as_mut_ptr(), buf.len() as isize);
        release(resolved);
        if !ok {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Some(PathBuf::from(OsStr::from_bytes(&buf[..len])))
    };
    original
}

// -- Alerts --

/// Present a modal error message to the user.
///
/// Callers are expected to have consulted the headless flag already.
pub fn show_alert(title: &str, message: &str) {
    #[cfg(target_os = "linux")]
    {
        linux_alert(title, message)
    }
    #[cfg(target_os = "macos")]
    {
        macos_alert(title, message)
    }
    #[cfg(target_os = "windows")]
    {
        windows_alert(title, message)
    }
}

#[cfg(target_os = "linux")]
fn linux_alert(title: &str, message: &str) {
    use std::process::Command;

    let attempts: [(&str, Vec<&str>); 4] = [
        ("zenity", vec!["--error", "--title", title, "--text", message]),
        ("kdialog", vec!["--title", title, "--error", message]),
        ("xmessage", vec!["-center", message]),
        ("notify-send", vec!["--urgency=critical", title, message]),
    ];
    for (name, args) in attempts {
        let Ok(program) = which::which(name) else {
            continue;
        };
        match Command::new(program).args(&args).status() {
            Ok(status) if status.success() => return,
            Ok(status) => debug!("{name} exited with {status}"),
            Err(err) => debug!("{name} failed to run: {err}"),
        }
    }
    eprintln!("{title}: {message}");
}

#[cfg(target_os = "macos")]
fn macos_alert(title: &str, message: &str) {
    use objc2::MainThreadMarker;
    use objc2_app_kit::NSAlert;
    use objc2_foundation::NSString;

    // NSAlert is main-thread-only. Directives executing on the worker while
    // the main thread is parked fall back to stderr.
    let Some(mtm) = MainThreadMarker::new() else {
        eprintln!("{title}: {message}");
        return;
    };
    unsafe {
        let alert = NSAlert::new(mtm);
        alert.setMessageText(&NSString::from_str(title));
        alert.setInformativeText(&NSString::from_str(message));
        alert.runModal();
    }
}

#[cfg(target_os = "windows")]
fn windows_alert(title: &str, message: &str) {
    use windows::Win32::UI::WindowsAndMessaging::{MB_ICONERROR, MB_OK, MessageBoxW};
    use windows::core::PCWSTR;

    let title = wide(title);
    let message = wide(message);
    unsafe {
        MessageBoxW(
            None,
            PCWSTR(message.as_ptr()),
            PCWSTR(title.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }
}

// -- Thread initialization --

/// One-time platform threading prerequisites.
///
/// Linux loads libX11 dynamically and calls `XInitThreads`, which AWT needs
/// before X calls start happening off the main thread. A system without
/// libX11 has nothing to initialize; a libX11 without `XInitThreads` is the
/// missing-function error.
pub fn init_threads() -> Result<(), Error> {
    #[cfg(target_os = "linux")]
    {
        use libloading::os::unix::{Library, RTLD_GLOBAL, RTLD_NOW};

        let lib = match unsafe { Library::open(Some("libX11.so.6"), RTLD_NOW | RTLD_GLOBAL) }
            .or_else(|_| unsafe { Library::open(Some("libX11.so"), RTLD_NOW | RTLD_GLOBAL) })
        {
            Ok(lib) => libloading::Library::from(lib),
            Err(err) => {
                warn!("libX11 not available, skipping thread initialization: {err}");
                return Ok(());
            }
        };
        {
            let init: libloading::Symbol<unsafe extern "C" fn() -> libc::c_int> =
                unsafe { lib.get(b"XInitThreads\0") }
                    .map_err(|_| Error::MissingFunction("XInitThreads"))?;
            let status = unsafe { init() };
            debug!("XInitThreads returned {status}");
        }
        // X11 must stay resident for the rest of the process.
        std::mem::forget(lib);
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(())
    }
}

// -- Runloop policy --

#[cfg(target_os = "macos")]
static STOP_REQUESTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

#[cfg(target_os = "macos")]
const RUNLOOP_SLICE: f64 = 0.1;

#[cfg(target_os = "macos")]
const KEEPALIVE_INTERVAL: f64 = 315_360_000.0; // ten years out; never fires in practice

/// The mode `auto` resolves to on this platform.
pub fn default_runloop_mode() -> RunloopMode {
    #[cfg(target_os = "macos")]
    {
        RunloopMode::Park
    }
    #[cfg(not(target_os = "macos"))]
    {
        RunloopMode::None
    }
}

/// Give the platform a chance to choose a runloop policy from the directive
/// about to execute. Only consulted while the mode is unset.
pub fn runloop_config(ctx: &ThreadContext, directive: &str) {
    #[cfg(target_os = "macos")]
    {
        // Either runtime may spin up a GUI framework (AWT, matplotlib) that
        // expects a live event loop on the main thread.
        if matches!(directive, "JVM" | "PYTHON") {
            ctx.set_runloop_mode(RunloopMode::Park);
        }
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = (ctx, directive);
    }
}

/// Activate the given runloop mode on the calling thread.
pub fn runloop_run(ctx: &ThreadContext, mode: RunloopMode) {
    let mode = match mode {
        RunloopMode::Auto => default_runloop_mode(),
        other => other,
    };
    match mode {
        RunloopMode::Park => park(ctx),
        RunloopMode::Main => load_gui_framework(),
        _ => {}
    }
}

/// Ask a parked main thread to leave its runloop.
pub fn runloop_stop() {
    #[cfg(target_os = "macos")]
    STOP_REQUESTED.store(true, std::sync::atomic::Ordering::Release);
}

#[cfg(target_os = "linux")]
fn park(ctx: &ThreadContext) {
    // No native event loop to service; the stub keeps the cross-thread
    // hand-off exercisable on this platform.
    if !ctx.is_main_thread() {
        debug!("Ignoring park request off the main thread");
        return;
    }
    ctx.signal_early_completion();
    ctx.park_until_complete();
}

#[cfg(target_os = "windows")]
fn park(_ctx: &ThreadContext) {
    debug!("Runloop parking is not a thing on Windows");
}

#[cfg(target_os = "macos")]
fn park(ctx: &ThreadContext) {
    use block2::RcBlock;
    use objc2::{ClassType, msg_send};
    use objc2_foundation::{NSDate, NSRunLoop, NSString, NSTimer};

    if !ctx.is_main_thread() {
        debug!("Ignoring park request off the main thread");
        return;
    }

    // From here on the worker owns directive execution.
    ctx.signal_early_completion();

    let run_loop = NSRunLoop::mainRunLoop();

    // A runloop with no sources returns immediately; a far-future no-op
    // timer keeps it serviceable while the runtime runs elsewhere.
    let noop = RcBlock::new(move || {});
    let timer: *mut NSTimer = unsafe {
        msg_send![NSTimer::class(),
            scheduledTimerWithTimeInterval: KEEPALIVE_INTERVAL,
            repeats: true,
            block: &*noop
        ]
    };
    let mode = NSString::from_str("NSDefaultRunLoopMode");
    let _: () = unsafe { msg_send![&run_loop, addTimer: timer, forMode: &*mode] };

    // Poll in short slices; AWT and friends keep the runloop busy enough
    // that a single blocking run might never come back.
    while !ctx.is_complete() && !STOP_REQUESTED.load(std::sync::atomic::Ordering::Acquire) {
        let deadline = NSDate::dateWithTimeIntervalSinceNow(RUNLOOP_SLICE);
        unsafe {
            run_loop.runMode_beforeDate(&mode, &deadline);
        }
    }
}

#[cfg(target_os = "macos")]
fn load_gui_framework() {
    use objc2::MainThreadMarker;
    use objc2_app_kit::NSApplication;

    match MainThreadMarker::new() {
        Some(mtm) => {
            // The AppKit equivalent of -XstartOnFirstThread: bring up the
            // shared application before the runtime needs it.
            let _app = NSApplication::sharedApplication(mtm);
        }
        None => warn!("Cannot initialize AppKit off the main thread"),
    }
}

#[cfg(not(target_os = "macos"))]
fn load_gui_framework() {}

// -- Runtime invocation --

/// Invoke a runtime, honoring the platform's thread and runloop policy.
///
/// Linux and Windows call the runtime directly on whatever thread asks.
/// macOS consults the locked runloop mode: in `park` mode the runtime runs
/// on the calling worker thread and the process exits directly when it
/// returns. GUI frameworks (AWT especially) keep the main runloop
/// perpetually busy and a clean teardown is empirically unreliable, so the
/// launcher mirrors the JDK's own strategy. Outside `park` mode the same
/// hard exit applies once a GUI session is detected.
pub fn launch(
    ctx: &ThreadContext,
    runtime: &dyn RuntimeLauncher,
    args: &[String],
) -> Result<i32, Error> {
    #[cfg(not(target_os = "macos"))]
    {
        let _ = ctx;
        runtime.launch(args)
    }

    #[cfg(target_os = "macos")]
    {
        let code = runtime.launch(args)?;
        match ctx.runloop_mode() {
            Some(RunloopMode::Park) => {
                debug!("Exiting directly with code {code}");
                std::process::exit(code);
            }
            _ => {
                if gui_session_active() {
                    debug!("GUI session detected; exiting directly with code {code}");
                    std::process::exit(code);
                }
                Ok(code)
            }
        }
    }
}

/// After runtime shutdown, a main CF runloop with more than one mode active
/// means a GUI framework initialized itself; clean teardown is then a
/// gamble. CoreFoundation is resolved dynamically; the launcher has no
/// other reason to link it.
#[cfg(target_os = "macos")]
fn gui_session_active() -> bool {
    use std::ffi::c_void;

    let Ok(cf) = (unsafe {
        libloading::Library::new("/System/Library/Frameworks/CoreFoundation.framework/CoreFoundation")
    }) else {
        return false;
    };

    let active = unsafe {
        let get_main: libloading::Symbol<unsafe extern "C" fn() -> *mut c_void> =
            match cf.get(b"CFRunLoopGetMain\0") {
                Ok(symbol) => symbol,
                Err(_) => return false,
            };
        let copy_modes: libloading::Symbol<unsafe extern "C" fn(*mut c_void) -> *mut c_void> =
            match cf.get(b"CFRunLoopCopyAllModes\0") {
                Ok(symbol) => symbol,
                Err(_) => return false,
            };
        let array_count: libloading::Symbol<unsafe extern "C" fn(*mut c_void) -> isize> =
            match cf.get(b"CFArrayGetCount\0") {
                Ok(symbol) => symbol,
                Err(_) => return false,
            };

        let modes = copy_modes(get_main());
        !modes.is_null() && array_count(modes) > 1
    };
    // CoreFoundation is a permanently resident system framework.
    std::mem::forget(cf);
    active
}
