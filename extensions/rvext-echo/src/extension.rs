/*
 *  RVExt Echo Extension - Entry Points
 */

#![allow(non_snake_case)]

use std::ffi::{c_char, CString};
use std::os::raw::c_int;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::ffi::*;

const NAME: &str = "rvext-echo";
#[cfg(not(feature = "no-version"))]
const VERSION: &str = concat!("rvext-echo ", env!("CARGO_PKG_VERSION"));

static CALLBACK: Mutex<Option<ExtensionCallbackFn>> = Mutex::new(None);
static FIRED: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());
static LAST_STATUS: AtomicI32 = AtomicI32::new(0);

fn registered() -> Option<ExtensionCallbackFn> {
    *CALLBACK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Invoke the host callback from a fresh thread, like a real extension
/// reporting asynchronous results
fn fire(data: String) -> &'static str {
    let Some(callback) = registered() else {
        return "no callback";
    };

    let handle = thread::spawn(move || {
        let name = CString::new(NAME).unwrap_or_default();
        let function = CString::new("fire").unwrap_or_default();
        let data = CString::new(data).unwrap_or_default();

        #[cfg(feature = "debug-logging")]
        log::debug!("firing callback with {:?}", data);

        let status = unsafe { callback(name.as_ptr(), function.as_ptr(), data.as_ptr()) };
        LAST_STATUS.store(status, Ordering::SeqCst);
    });

    FIRED.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    "fired"
}

/// Invoke the host callback on the calling thread, before returning
fn fire_sync(data: &str) -> String {
    let Some(callback) = registered() else {
        return "no callback".to_string();
    };

    let name = CString::new(NAME).unwrap_or_default();
    let function = CString::new("fire-sync").unwrap_or_default();
    let data = CString::new(data).unwrap_or_default();
    let status = unsafe { callback(name.as_ptr(), function.as_ptr(), data.as_ptr()) };
    LAST_STATUS.store(status, Ordering::SeqCst);
    format!("status:{}", status)
}

fn join() -> String {
    let handles: Vec<_> = FIRED.lock().unwrap_or_else(|e| e.into_inner()).drain(..).collect();
    for handle in handles {
        let _ = handle.join();
    }
    format!("joined:{}", LAST_STATUS.load(Ordering::SeqCst))
}

fn sleep_ms(ms: &str) -> &'static str {
    thread::sleep(Duration::from_millis(ms.trim().parse().unwrap_or(0)));
    "slept"
}

/// # Safety
///
/// Called by the host with a buffer of `output_size` bytes.
#[no_mangle]
pub unsafe extern "system" fn RVExtension(output: *mut c_char, output_size: c_int, function: *const c_char) {
    let input = unsafe { read_input(function) };

    let reply = if let Some(data) = input.strip_prefix("fire:") {
        fire(data.to_string()).to_string()
    } else if let Some(data) = input.strip_prefix("fire-sync:") {
        fire_sync(data)
    } else if input == "join" {
        join()
    } else if let Some(ms) = input.strip_prefix("sleep:") {
        sleep_ms(ms).to_string()
    } else if input == "callback" {
        if registered().is_some() { "registered" } else { "none" }.to_string()
    } else {
        input
    };

    unsafe { write_output(output, output_size, &reply) };
}

/// # Safety
///
/// `argv` must hold `argc` valid strings.
#[no_mangle]
pub unsafe extern "system" fn RVExtensionArgs(
    output: *mut c_char,
    output_size: c_int,
    function: *const c_char,
    argv: *mut *const c_char,
    argc: c_int,
) -> c_int {
    let function = unsafe { read_input(function) };

    let args: Vec<String> = if argv.is_null() || argc <= 0 {
        Vec::new()
    } else {
        (0..argc as usize)
            .map(|i| unsafe { read_input(*argv.add(i)) })
            .collect()
    };

    let reply = match function.as_str() {
        "count" => argc.to_string(),
        "sleep" => sleep_ms(args.first().map(String::as_str).unwrap_or("0")).to_string(),
        _ => args.join(","),
    };

    unsafe { write_output(output, output_size, &reply) };
    argc
}

/// # Safety
///
/// `callback` must stay callable until the library is unloaded.
#[no_mangle]
pub unsafe extern "system" fn RVExtensionRegisterCallback(callback: ExtensionCallbackFn) {
    *CALLBACK.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
}

/// # Safety
///
/// Called by the host with a buffer of `output_size` bytes.
#[cfg(not(feature = "no-version"))]
#[no_mangle]
pub unsafe extern "system" fn RVExtensionVersion(output: *mut c_char, output_size: c_int) {
    unsafe { write_output(output, output_size, VERSION) };
}
