/*
 *  RVExt Echo Extension - FFI Types
 *
 *  C ABI types matching the RVExtension interface
 *  These types must match exactly with the host's FFI types
 */

use std::ffi::c_char;
use std::os::raw::c_int;

/// Callback the host registers
pub type ExtensionCallbackFn = unsafe extern "system" fn(
    name: *const c_char,
    function: *const c_char,
    data: *const c_char,
) -> c_int;

/// Copy `text` into a host buffer of `size` bytes, always NUL terminated
///
/// # Safety
///
/// `output` must be null or point to at least `size` writable bytes.
pub unsafe fn write_output(output: *mut c_char, size: c_int, text: &str) {
    if output.is_null() || size <= 0 {
        return;
    }

    let bytes = text.as_bytes();
    let len = bytes.len().min(size as usize - 1);

    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), output, len);
        *output.add(len) = 0;
    }
}

/// Borrow a C string from the host as UTF-8 (lossy)
///
/// # Safety
///
/// `ptr` must be null or a valid NUL-terminated string.
pub unsafe fn read_input(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { std::ffi::CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}
