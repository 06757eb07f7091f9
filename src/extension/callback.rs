/*
 *  extension/callback.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Callback routing from extension threads back into Rust closures
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

//! Callback slots
//!
//! `RVExtensionRegisterCallback` takes a bare function pointer with no user
//! data, so a closure cannot be handed over directly. Instead there is a
//! fixed table of slots, each with its own monomorphized trampoline. A handle
//! claims a slot, stores its closure there and registers that slot's
//! trampoline. The slot is freed only after the library is unloaded.

use std::ffi::{CStr, c_char};
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use log::{error, trace, warn};

use super::ffi::ExtensionCallbackFn;

/// Closure invoked with (name, function, data) from an extension thread
pub type ExtensionCallback = dyn Fn(&str, &str, &str) -> i32 + Send + Sync;

/// Number of extensions that can hold a callback at the same time
pub const CALLBACK_SLOTS: usize = 8;

/// Status returned to the extension when nothing handled the callback
pub const CALLBACK_UNHANDLED: c_int = -1;

const EMPTY: Option<Arc<ExtensionCallback>> = None;

struct SlotTable {
    claimed: [bool; CALLBACK_SLOTS],
    callbacks: [Option<Arc<ExtensionCallback>>; CALLBACK_SLOTS],
}

static SLOTS: Mutex<SlotTable> = Mutex::new(SlotTable {
    claimed: [false; CALLBACK_SLOTS],
    callbacks: [EMPTY; CALLBACK_SLOTS],
});

static TRAMPOLINES: [ExtensionCallbackFn; CALLBACK_SLOTS] = [
    trampoline::<0>,
    trampoline::<1>,
    trampoline::<2>,
    trampoline::<3>,
    trampoline::<4>,
    trampoline::<5>,
    trampoline::<6>,
    trampoline::<7>,
];

fn slots() -> MutexGuard<'static, SlotTable> {
    // A panic while holding the table lock leaves it consistent; every
    // mutation is a single assignment.
    SLOTS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive ownership of one callback slot
///
/// Dropping the slot clears the stored closure and returns the slot to the
/// pool. Late invocations through the trampoline then report
/// [`CALLBACK_UNHANDLED`].
#[derive(Debug)]
pub struct CallbackSlot {
    index: usize,
}

impl CallbackSlot {
    /// Claim a free slot, or `None` when all are taken
    pub fn claim() -> Option<Self> {
        let mut table = slots();
        let index = table.claimed.iter().position(|claimed| !claimed)?;
        table.claimed[index] = true;
        table.callbacks[index] = None;
        trace!("Claimed callback slot {}", index);
        Some(Self { index })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Store (or replace) the closure behind this slot
    pub fn set(&self, callback: Arc<ExtensionCallback>) {
        slots().callbacks[self.index] = Some(callback);
    }

    /// Function pointer to hand to the extension
    pub fn trampoline(&self) -> ExtensionCallbackFn {
        TRAMPOLINES[self.index]
    }
}

impl Drop for CallbackSlot {
    fn drop(&mut self) {
        let mut table = slots();
        table.callbacks[self.index] = None;
        table.claimed[self.index] = false;
        trace!("Released callback slot {}", self.index);
    }
}

unsafe extern "system" fn trampoline<const SLOT: usize>(
    name: *const c_char,
    function: *const c_char,
    data: *const c_char,
) -> c_int {
    // Clone out so the table lock is not held while user code runs
    let callback = slots().callbacks[SLOT].clone();

    let Some(callback) = callback else {
        warn!("Extension callback arrived on released slot {}", SLOT);
        return CALLBACK_UNHANDLED;
    };

    // SAFETY: the extension passes NUL-terminated strings (or null) that
    // stay valid for the duration of the call
    let (name, function, data) = unsafe { (lossy(name), lossy(function), lossy(data)) };
    trace!("Callback slot {}: {} {} ({} bytes)", SLOT, name, function, data.len());

    match panic::catch_unwind(AssertUnwindSafe(|| callback(&name, &function, &data))) {
        Ok(status) => status,
        Err(panic_info) => {
            let message = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown error".to_string()
            };
            error!("Caught panic in extension callback {}/{}: {}", name, function, message);
            CALLBACK_UNHANDLED
        }
    }
}

/// Copy a C string out, tolerating null and invalid UTF-8
unsafe fn lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
