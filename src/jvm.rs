//! The JVM directive: load libjvm, create (or attach to) the Java Virtual
//! Machine, and invoke a static main method.
//!
//! The VM is created at most once per process. Later JVM directives attach
//! the current thread to the cached instance (their JVM options are
//! ignored, since a running VM cannot take new ones), and the VM is only
//! destroyed by [`cleanup`](crate::runtime::RuntimeLauncher::cleanup) after
//! the whole directive stream is done.

use std::ffi::{CString, c_void};
use std::path::Path;
use std::ptr;

use jni::JavaVM;
use jni::objects::{JClass, JValue};
use jni::sys;
use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::platform;
use crate::runtime::RuntimeLauncher;

/// Argument layout of a JVM directive, as produced by the configurator:
/// the libjvm path, the JVM option count, that many option lines, the main
/// class in slash form, then the main arguments.
#[derive(Debug, PartialEq, Eq)]
struct JvmInvocation<'a> {
    libjvm_path: &'a str,
    jvm_args: &'a [String],
    main_class: &'a str,
    main_args: &'a [String],
}

impl<'a> JvmInvocation<'a> {
    fn parse(args: &'a [String]) -> Result<Self, Error> {
        if args.len() < 3 {
            return Err(Error::BadDirectiveSyntax(
                "JVM directive requires a libjvm path, an option count, and a main class".into(),
            ));
        }

        let jvm_argc: usize = args[1].parse().map_err(|_| {
            Error::BadDirectiveSyntax(format!("invalid JVM argument count {:?}", args[1]))
        })?;
        let max = args.len() - 3;
        if jvm_argc > max {
            return Err(Error::ArgcOutOfBounds {
                what: "jvm",
                count: jvm_argc,
                min: 0,
                max,
            });
        }

        Ok(Self {
            libjvm_path: &args[0],
            jvm_args: &args[2..2 + jvm_argc],
            main_class: &args[2 + jvm_argc],
            main_args: &args[3 + jvm_argc..],
        })
    }
}

struct CachedVm {
    vm: JavaVM,
    // Keeps libjvm mapped for as long as the VM pointer is live.
    _library: Library,
}

/// Launches and caches the Java Virtual Machine.
#[derive(Default)]
pub struct JvmRuntime {
    cached: Mutex<Option<CachedVm>>,
}

impl RuntimeLauncher for JvmRuntime {
    fn name(&self) -> &'static str {
        "JVM"
    }

    fn launch(&self, args: &[String]) -> Result<i32, Error> {
        let invocation = JvmInvocation::parse(args)?;
        info!("libjvm_path = {}", invocation.libjvm_path);
        info!("main_class_name = {}", invocation.main_class);

        let mut cached = self.cached.lock();
        if cached.is_none() {
            *cached = Some(create_vm(&invocation)?);
            info!("JVM created and cached for reuse");
        } else {
            info!("Reusing cached JVM");
            if !invocation.jvm_args.is_empty() {
                warn!("JVM options ignored when reusing cached JVM instance");
            }
        }
        let vm = &cached.as_ref().unwrap().vm;

        // Attaching is a no-op for the creating thread and required for any
        // other; the guard detaches on drop.
        let mut env = vm.attach_current_thread().map_err(|err| {
            error!("Failed to attach thread to JVM: {err}");
            Error::CreateJavaVm
        })?;

        debug!("Finding main class");
        let main_class = match env.find_class(invocation.main_class) {
            Ok(class) => class,
            Err(_) => {
                let _ = env.exception_clear();
                return Err(Error::ClassNotFound(invocation.main_class.to_string()));
            }
        };

        debug!("Finding main method");
        if env
            .get_static_method_id(&main_class, "main", "([Ljava/lang/String;)V")
            .is_err()
        {
            let _ = env.exception_clear();
            return Err(Error::MainMethodNotFound(invocation.main_class.to_string()));
        }

        debug!("Invoking main method");
        if let Err(err) = invoke_main(&mut env, &main_class, invocation.main_args) {
            // An exception out of main is the program's own business;
            // surface it the way the java launcher would and move on.
            error!("Exception in main: {err}");
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }

        debug!("Detaching current thread");
        Ok(0)
    }

    fn cleanup(&self) {
        if let Some(cached) = self.cached.lock().take() {
            let CachedVm { vm, _library } = cached;
            debug!("Destroying cached JVM");
            if let Err(err) = unsafe { vm.destroy() } {
                error!("Failed to destroy the JVM: {err}");
            }
            debug!("Closing libjvm");
            drop(_library);
            info!("JVM cleanup complete");
        }
    }
}

fn create_vm(invocation: &JvmInvocation) -> Result<CachedVm, Error> {
    info!("Loading libjvm (first time)");
    let library = platform::open_runtime_library(Path::new(invocation.libjvm_path))?;

    debug!("Loading JNI_CreateJavaVM");
    type CreateFn =
        unsafe extern "system" fn(*mut *mut sys::JavaVM, *mut *mut c_void, *mut c_void) -> sys::jint;
    let create: libloading::Symbol<CreateFn> = unsafe { library.get(b"JNI_CreateJavaVM\0") }
        .map_err(|source| Error::SymbolLookup {
            name: "JNI_CreateJavaVM",
            source,
        })?;

    debug!("Populating VM options");
    let option_strings: Vec<CString> = invocation
        .jvm_args
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|_| Error::BadDirectiveSyntax("JVM option contains a NUL byte".into()))?;
    let mut options: Vec<sys::JavaVMOption> = option_strings
        .iter()
        .map(|option| sys::JavaVMOption {
            optionString: option.as_ptr() as *mut _,
            extraInfo: ptr::null_mut(),
        })
        .collect();

    debug!("Populating VM init args");
    let mut init_args = sys::JavaVMInitArgs {
        version: sys::JNI_VERSION_1_8,
        nOptions: options.len() as sys::jint,
        options: options.as_mut_ptr(),
        ignoreUnrecognized: sys::JNI_FALSE,
    };

    debug!("Creating JVM");
    let mut vm_ptr: *mut sys::JavaVM = ptr::null_mut();
    let mut env_ptr: *mut c_void = ptr::null_mut();
    let status = unsafe { create(&mut vm_ptr, &mut env_ptr, &mut init_args as *mut _ as *mut c_void) };
    if status != sys::JNI_OK || vm_ptr.is_null() {
        error!("Failed to create the Java Virtual Machine");
        return Err(Error::CreateJavaVm);
    }

    let vm = unsafe { JavaVM::from_raw(vm_ptr) }.map_err(|_| Error::CreateJavaVm)?;
    Ok(CachedVm {
        vm,
        _library: library,
    })
}

fn invoke_main(
    env: &mut jni::JNIEnv,
    main_class: &JClass,
    main_args: &[String],
) -> jni::errors::Result<()> {
    let empty = env.new_string("")?;
    let java_args = env.new_object_array(main_args.len() as i32, "java/lang/String", &empty)?;
    for (i, arg) in main_args.iter().enumerate() {
        let value = env.new_string(arg)?;
        env.set_object_array_element(&java_args, i as i32, value)?;
    }
    env.call_static_method(
        main_class,
        "main",
        "([Ljava/lang/String;)V",
        &[JValue::Object(&java_args)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_minimal_invocation() {
        let args = args(&["/lib/libjvm.so", "0", "com/example/Main"]);
        let invocation = JvmInvocation::parse(&args).unwrap();
        assert_eq!(invocation.libjvm_path, "/lib/libjvm.so");
        assert!(invocation.jvm_args.is_empty());
        assert_eq!(invocation.main_class, "com/example/Main");
        assert!(invocation.main_args.is_empty());
    }

    #[test]
    fn splits_jvm_and_main_arguments() {
        let args = args(&[
            "/lib/libjvm.so",
            "2",
            "-Xmx128m",
            "-Dfoo=bar",
            "com/example/Main",
            "hello",
            "world",
        ]);
        let invocation = JvmInvocation::parse(&args).unwrap();
        assert_eq!(invocation.jvm_args, ["-Xmx128m", "-Dfoo=bar"]);
        assert_eq!(invocation.main_class, "com/example/Main");
        assert_eq!(invocation.main_args, ["hello", "world"]);
    }

    #[test]
    fn jvm_argc_beyond_remaining_lines_is_out_of_bounds() {
        let args = args(&["/lib/libjvm.so", "3", "-Xmx128m", "com/example/Main"]);
        assert!(matches!(
            JvmInvocation::parse(&args),
            Err(Error::ArgcOutOfBounds {
                what: "jvm",
                count: 3,
                max: 1,
                ..
            })
        ));
    }

    #[test]
    fn non_numeric_jvm_argc_is_bad_syntax() {
        let args = args(&["/lib/libjvm.so", "many", "com/example/Main"]);
        assert!(matches!(
            JvmInvocation::parse(&args),
            Err(Error::BadDirectiveSyntax(_))
        ));
    }

    #[test]
    fn too_few_arguments_is_bad_syntax() {
        let args = args(&["/lib/libjvm.so", "0"]);
        assert!(matches!(
            JvmInvocation::parse(&args),
            Err(Error::BadDirectiveSyntax(_))
        ));
    }
}
