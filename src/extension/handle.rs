/*
 *  extension/handle.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Extension handle - load, resolve, call and unload an extension library
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::cell::RefCell;
use std::ffi::{CString, c_char};
use std::fmt;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use log::{debug, info, warn};
use libloading::{Library, Symbol};

use crate::func_timer::timed;
use super::callback::{CallbackSlot, CALLBACK_SLOTS};
use super::error::{ExtensionError, InvocationCause, Result};
use super::ffi::{
    EntryPoint,
    RVExtensionFn,
    RVExtensionArgsFn,
    RVExtensionRegisterCallbackFn,
    RVExtensionVersionFn,
    RVEXTENSION_OUTPUT_SIZE,
    host_pointer_width,
};
use super::machine::{self, ImageInfo};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Handles whose lock this thread currently holds
    static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Resolved entry points; only valid while the owning library is loaded
#[derive(Clone, Copy)]
struct EntryPoints {
    call: RVExtensionFn,
    call_args: RVExtensionArgsFn,
    register_callback: RVExtensionRegisterCallbackFn,
    version: RVExtensionVersionFn,
}

impl EntryPoints {
    fn resolve(library: &Library) -> Result<Self> {
        // SAFETY: each type matches the ABI the export was compiled against
        unsafe {
            Ok(Self {
                call: resolve(library, EntryPoint::Call)?,
                call_args: resolve(library, EntryPoint::CallArgs)?,
                register_callback: resolve(library, EntryPoint::RegisterCallback)?,
                version: resolve(library, EntryPoint::Version)?,
            })
        }
    }
}

/// Look up one export as a function pointer
///
/// # Safety
///
/// `T` must be a function pointer type matching the export's real signature.
unsafe fn resolve<T: Copy>(library: &Library, entry: EntryPoint) -> Result<T> {
    let symbol = entry.symbol();
    debug!("Resolving {}", symbol);

    // Option<fn> is pointer sized; a null export comes back as None
    let resolved: Symbol<Option<T>> = unsafe { library.get(symbol.as_bytes()) }
        .map_err(|source| ExtensionError::Symbol {
            symbol: symbol.clone(),
            source: Some(source),
        })?;

    (*resolved).ok_or(ExtensionError::Symbol { symbol, source: None })
}

struct Loaded {
    entries: EntryPoints,
    output: Box<[u8]>,
    // field order matters: the library must unload before its callback
    // slot is handed back to the pool
    library: Library,
    callback: Option<CallbackSlot>,
}

impl Loaded {
    fn clear_output(&mut self) {
        self.output.fill(0);
    }

    fn output_ptr(&mut self) -> *mut c_char {
        self.output.as_mut_ptr().cast()
    }

    /// Buffer contents up to the first NUL, never past capacity
    fn output_text(&self) -> String {
        let len = self.output.iter()
            .position(|&c| c == 0)
            .unwrap_or(self.output.len());

        String::from_utf8_lossy(&self.output[..len]).into_owned()
    }
}

enum State {
    Loaded(Loaded),
    Released,
}

/// A loaded RVExtension library
///
/// Every operation takes `&self` and is serialized by an internal lock, so
/// a handle can be shared between threads. The extension may still run its
/// own threads and invoke a registered callback at any time; the callback
/// must not assume it runs on the thread that made a call.
///
/// Calls block until the foreign function returns. There is no timeout and
/// no cancellation; a fault inside the extension takes down the process.
pub struct Extension {
    id: usize,
    path: PathBuf,
    image: ImageInfo,
    state: Mutex<State>,
}

impl Extension {
    /// Load the extension at `path`
    ///
    /// This performs the following steps:
    /// 1. Check the file exists
    /// 2. Read the image header and compare its pointer width with ours
    /// 3. Load the library
    /// 4. Resolve the four entry points
    ///
    /// If resolution fails the library is unloaded again before the error
    /// is returned.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.is_file() {
            return Err(ExtensionError::NotFound(path.to_path_buf()));
        }

        let image = machine::probe(path)?;
        check_architecture(&image, host_pointer_width())?;

        info!("Loading extension from: {}", path.display());

        // SAFETY: loading runs the library's initializers; trusting them is
        // inherent to hosting an extension
        let library = unsafe { Library::new(path) }
            .map_err(|source| ExtensionError::Load { path: path.to_path_buf(), source })?;

        // `library` drops (and unloads) here if any symbol is missing
        let entries = EntryPoints::resolve(&library)?;

        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        info!("Loaded extension #{}: {} ({} {})", id, path.display(), image.format, image.machine);

        Ok(Self {
            id,
            path: path.to_path_buf(),
            image,
            state: Mutex::new(State::Loaded(Loaded {
                entries,
                output: vec![0u8; RVEXTENSION_OUTPUT_SIZE].into_boxed_slice(),
                library,
                callback: None,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header information read before loading
    pub fn image(&self) -> ImageInfo {
        self.image
    }

    pub fn is_released(&self) -> bool {
        // inside a call on this thread the lock is ours and the library loaded
        if self.is_active() {
            return false;
        }
        matches!(*self.state.lock().unwrap_or_else(PoisonError::into_inner), State::Released)
    }

    /// Call `RVExtension` with `input`
    pub fn call(&self, input: &str) -> Result<String> {
        self.timed_call(input).map(|(output, _)| output)
    }

    /// [`call`](Self::call), also reporting how long the extension took
    pub fn timed_call(&self, input: &str) -> Result<(String, Duration)> {
        const ENTRY: &str = "RVExtension";
        let function = CString::new(input).map_err(|e| ExtensionError::invocation(ENTRY, e))?;

        self.with_loaded(ENTRY, |loaded| {
            loaded.clear_output();
            let call = loaded.entries.call;
            let output = loaded.output_ptr();

            // SAFETY: output holds RVEXTENSION_OUTPUT_SIZE bytes and the
            // extension is told so; `function` outlives the call
            let ((), elapsed) = timed(ENTRY, || unsafe {
                call(output, RVEXTENSION_OUTPUT_SIZE as c_int, function.as_ptr())
            });

            Ok((loaded.output_text(), elapsed))
        })
    }

    /// Call `RVExtensionArgs` with a function name and its arguments
    pub fn call_args<S: AsRef<str>>(&self, function: &str, args: &[S]) -> Result<String> {
        self.invoke_args(function, args).map(|(output, _, _)| output)
    }

    /// [`call_args`](Self::call_args), also returning the extension's status code
    pub fn call_args_status<S: AsRef<str>>(&self, function: &str, args: &[S]) -> Result<(String, i32)> {
        self.invoke_args(function, args).map(|(output, status, _)| (output, status))
    }

    /// [`call_args`](Self::call_args), also reporting how long the extension took
    pub fn timed_call_args<S: AsRef<str>>(&self, function: &str, args: &[S]) -> Result<(String, Duration)> {
        self.invoke_args(function, args).map(|(output, _, elapsed)| (output, elapsed))
    }

    /// [`call_args`](Self::call_args) with both the status code and the duration
    pub fn timed_call_args_status<S: AsRef<str>>(
        &self,
        function: &str,
        args: &[S],
    ) -> Result<(String, i32, Duration)> {
        self.invoke_args(function, args)
    }

    fn invoke_args<S: AsRef<str>>(&self, function: &str, args: &[S]) -> Result<(String, i32, Duration)> {
        const ENTRY: &str = "RVExtensionArgs";

        let argc = c_int::try_from(args.len())
            .map_err(|_| ExtensionError::invocation(ENTRY, InvocationCause::TooManyArguments(args.len())))?;
        let function = CString::new(function).map_err(|e| ExtensionError::invocation(ENTRY, e))?;
        let owned = args.iter()
            .map(|arg| CString::new(arg.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ExtensionError::invocation(ENTRY, e))?;
        // our own pointer array; the caller's slice is never handed over
        let mut argv: Vec<*const c_char> = owned.iter().map(|arg| arg.as_ptr()).collect();

        self.with_loaded(ENTRY, |loaded| {
            loaded.clear_output();
            let call_args = loaded.entries.call_args;
            let output = loaded.output_ptr();
            let argv_ptr = argv.as_mut_ptr();

            // SAFETY: argv holds argc pointers into `owned`, which outlives
            // the call; output is sized as advertised
            let (status, elapsed) = timed(ENTRY, || unsafe {
                call_args(output, RVEXTENSION_OUTPUT_SIZE as c_int, function.as_ptr(), argv_ptr, argc)
            });

            debug!("{}({}, {} args) returned {}", ENTRY, function.to_string_lossy(), argc, status);
            Ok((loaded.output_text(), status, elapsed))
        })
    }

    /// Hand the extension a callback it may invoke from any thread, at any time
    ///
    /// The closure stays alive until this handle is released. Registering
    /// again replaces the previous closure.
    pub fn register_callback<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&str, &str, &str) -> i32 + Send + Sync + 'static,
    {
        self.timed_register_callback(callback).map(|_| ())
    }

    /// [`register_callback`](Self::register_callback), also reporting how long the extension took
    pub fn timed_register_callback<F>(&self, callback: F) -> Result<Duration>
    where
        F: Fn(&str, &str, &str) -> i32 + Send + Sync + 'static,
    {
        const ENTRY: &str = "RVExtensionRegisterCallback";

        self.with_loaded(ENTRY, |loaded| {
            let slot = match loaded.callback.take() {
                Some(slot) => slot,
                None => CallbackSlot::claim().ok_or_else(|| {
                    ExtensionError::invocation(ENTRY, InvocationCause::CallbackSlotsExhausted(CALLBACK_SLOTS))
                })?,
            };

            // stored before registering: the extension may call back at once
            slot.set(Arc::new(callback));
            let trampoline = slot.trampoline();
            debug!("Registering callback slot {} for {}", slot.index(), self.path.display());
            loaded.callback = Some(slot);

            let register = loaded.entries.register_callback;
            // SAFETY: the trampoline is a 'static function; its slot lives
            // until after the library is unloaded
            let ((), elapsed) = timed(ENTRY, || unsafe { register(trampoline) });
            Ok(elapsed)
        })
    }

    /// Ask the extension for its version string
    pub fn version(&self) -> Result<String> {
        self.timed_version().map(|(output, _)| output)
    }

    /// [`version`](Self::version), also reporting how long the extension took
    pub fn timed_version(&self) -> Result<(String, Duration)> {
        const ENTRY: &str = "RVExtensionVersion";

        self.with_loaded(ENTRY, |loaded| {
            loaded.clear_output();
            let version = loaded.entries.version;
            let output = loaded.output_ptr();

            // SAFETY: output is sized as advertised
            let ((), elapsed) = timed(ENTRY, || unsafe {
                version(output, RVEXTENSION_OUTPUT_SIZE as c_int)
            });

            Ok((loaded.output_text(), elapsed))
        })
    }

    /// Unload the library
    ///
    /// The first call unloads; later calls do nothing. Every other operation
    /// fails with [`ExtensionError::Released`] afterwards. Dropping the
    /// handle does the same.
    pub fn dispose(&self) -> Result<()> {
        let (_active, mut state) = self.lock("dispose")?;
        release(&mut state, &self.path)
    }

    /// Lock the handle, refusing re-entry from the thread already inside it
    fn lock(&self, entry: &'static str) -> Result<(ActiveGuard, MutexGuard<'_, State>)> {
        if self.is_active() {
            return Err(ExtensionError::invocation(entry, InvocationCause::Reentrant));
        }

        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ACTIVE.with(|active| active.borrow_mut().push(self.id));
        Ok((ActiveGuard { id: self.id }, state))
    }

    /// True while this thread holds the handle's lock
    fn is_active(&self) -> bool {
        ACTIVE.with(|active| active.borrow().contains(&self.id))
    }

    fn with_loaded<T>(&self, entry: &'static str, f: impl FnOnce(&mut Loaded) -> Result<T>) -> Result<T> {
        let (_active, mut state) = self.lock(entry)?;
        match &mut *state {
            State::Loaded(loaded) => f(loaded),
            State::Released => Err(ExtensionError::Released),
        }
    }
}

fn release(state: &mut State, path: &Path) -> Result<()> {
    match std::mem::replace(state, State::Released) {
        State::Released => {
            debug!("Extension already released: {}", path.display());
            Ok(())
        }
        State::Loaded(Loaded { library, callback, .. }) => {
            let closed = library.close();
            drop(callback);
            closed.map_err(ExtensionError::Unload)?;
            info!("Released extension: {}", path.display());
            Ok(())
        }
    }
}

/// Reject a library whose pointer width differs from the host's
pub(crate) fn check_architecture(image: &ImageInfo, host_bits: u32) -> Result<()> {
    match image.pointer_width {
        Some(library_bits) if library_bits != host_bits => Err(ExtensionError::ArchitectureMismatch {
            machine: image.machine,
            library_bits,
            host_bits,
        }),
        _ => Ok(()),
    }
}

struct ActiveGuard {
    id: usize,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|&id| id == self.id) {
                active.remove(pos);
            }
        });
    }
}

impl Drop for Extension {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = release(state, &self.path) {
            warn!("Failed to unload {} on drop: {}", self.path.display(), e);
        }
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("image", &self.image)
            // try_lock: formatting from inside a callback must not deadlock
            .field("released", &self.state.try_lock().ok().map(|s| matches!(*s, State::Released)))
            .finish()
    }
}
