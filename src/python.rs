//! The PYTHON directive: load libpython and hand it a classic argv via
//! `Py_BytesMain`.
//!
//! The loaded library is cached for the process lifetime. CPython does not
//! support re-initialization in the same process, so there is nothing to
//! tear down between directives or at shutdown; a second PYTHON directive
//! reuses the mapping and lets the interpreter sort out its own state.

use std::ffi::{CString, c_char, c_int};
use std::path::Path;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::Error;
use crate::platform;
use crate::runtime::RuntimeLauncher;

/// Launches the CPython interpreter.
#[derive(Default)]
pub struct PythonRuntime {
    cached: Mutex<Option<Library>>,
}

impl RuntimeLauncher for PythonRuntime {
    fn name(&self) -> &'static str {
        "PYTHON"
    }

    fn launch(&self, args: &[String]) -> Result<i32, Error> {
        let (libpython_path, python_args) = split_argv(args)?;
        info!("libpython_path = {libpython_path}");

        let mut cached = self.cached.lock();
        if cached.is_none() {
            debug!("Loading libpython");
            *cached = Some(platform::open_runtime_library(Path::new(libpython_path))?);
        }
        let library = cached.as_ref().unwrap();

        debug!("Loading Py_BytesMain");
        let bytes_main: libloading::Symbol<unsafe extern "C" fn(c_int, *mut *mut c_char) -> c_int> =
            unsafe { library.get(b"Py_BytesMain\0") }.map_err(|source| Error::SymbolLookup {
                name: "Py_BytesMain",
                source,
            })?;

        let arg_strings: Vec<CString> = python_args
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<_, _>>()
            .map_err(|_| Error::BadDirectiveSyntax("Python argument contains a NUL byte".into()))?;
        let mut argv: Vec<*mut c_char> = arg_strings
            .iter()
            .map(|arg| arg.as_ptr() as *mut c_char)
            .collect();

        debug!("Invoking Py_BytesMain with {} arguments", argv.len());
        let result = unsafe { bytes_main(argv.len() as c_int, argv.as_mut_ptr()) };
        if result != 0 {
            error!("Python exited with code {result}");
        }
        Ok(result)
    }

    fn cleanup(&self) {
        // Intentionally nothing: CPython cannot re-initialize in-process,
        // so the library stays loaded until the process exits.
    }
}

/// Layout: the libpython path, then the argv for `Py_BytesMain`, argv[0]
/// included, as chosen by the configurator.
fn split_argv(args: &[String]) -> Result<(&str, &[String]), Error> {
    match args.split_first() {
        Some((path, rest)) => Ok((path.as_str(), rest)),
        None => Err(Error::BadDirectiveSyntax(
            "PYTHON directive requires a libpython path".into(),
        )),
    }
}
