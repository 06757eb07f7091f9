/*
 *  extension/ffi.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Raw RVExtension ABI - entry points, signatures, symbol decoration
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

//! FFI types for the RVExtension interface
//!
//! An extension exports four functions. They are compiled with the Windows
//! API calling convention, which Rust spells `extern "system"`: `__stdcall`
//! on 32-bit Windows, the platform C convention everywhere else.
//!
//! ```c
//! void __stdcall RVExtension(char *output, int outputSize, const char *function);
//! int  __stdcall RVExtensionArgs(char *output, int outputSize, const char *function,
//!                                const char **argv, int argc);
//! void __stdcall RVExtensionRegisterCallback(
//!     int (*callback)(const char *name, const char *function, const char *data));
//! void __stdcall RVExtensionVersion(char *output, int outputSize);
//! ```
//!
//! 32-bit `__stdcall` exports are decorated `_Name@N`, N being the bytes of
//! arguments popped by the callee. 64-bit exports are undecorated.

use std::ffi::c_char;
use std::os::raw::c_int;

/// Size of the output buffer handed to every call, in bytes
pub const RVEXTENSION_OUTPUT_SIZE: usize = 10240;

pub type RVExtensionFn = unsafe extern "system" fn(
    output: *mut c_char,
    output_size: c_int,
    function: *const c_char,
);

pub type RVExtensionArgsFn = unsafe extern "system" fn(
    output: *mut c_char,
    output_size: c_int,
    function: *const c_char,
    argv: *mut *const c_char,
    argc: c_int,
) -> c_int;

/// Callback signature the extension stores and invokes later
pub type ExtensionCallbackFn = unsafe extern "system" fn(
    name: *const c_char,
    function: *const c_char,
    data: *const c_char,
) -> c_int;

pub type RVExtensionRegisterCallbackFn = unsafe extern "system" fn(callback: ExtensionCallbackFn);

pub type RVExtensionVersionFn = unsafe extern "system" fn(
    output: *mut c_char,
    output_size: c_int,
);

/// The four well-known entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Call,
    CallArgs,
    RegisterCallback,
    Version,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 4] = [
        EntryPoint::Call,
        EntryPoint::CallArgs,
        EntryPoint::RegisterCallback,
        EntryPoint::Version,
    ];

    /// Undecorated export name
    pub fn name(self) -> &'static str {
        match self {
            EntryPoint::Call => "RVExtension",
            EntryPoint::CallArgs => "RVExtensionArgs",
            EntryPoint::RegisterCallback => "RVExtensionRegisterCallback",
            EntryPoint::Version => "RVExtensionVersion",
        }
    }

    /// Argument bytes on a 32-bit stack, the `@N` of the decorated name
    pub fn stack_bytes(self) -> u32 {
        match self {
            EntryPoint::Call => 12,
            EntryPoint::CallArgs => 20,
            EntryPoint::RegisterCallback => 4,
            EntryPoint::Version => 8,
        }
    }

    /// Export name for a process of the given pointer width
    pub fn symbol_for_width(self, pointer_width: u32) -> String {
        if pointer_width == 32 {
            format!("_{}@{}", self.name(), self.stack_bytes())
        } else {
            self.name().to_string()
        }
    }

    /// Export name for this process
    pub fn symbol(self) -> String {
        self.symbol_for_width(usize::BITS)
    }
}

/// Pointer width of the running process
pub const fn host_pointer_width() -> u32 {
    usize::BITS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decorated_names() {
        let names: Vec<String> = EntryPoint::ALL.iter().map(|e| e.symbol_for_width(32)).collect();
        assert_eq!(
            names,
            [
                "_RVExtension@12",
                "_RVExtensionArgs@20",
                "_RVExtensionRegisterCallback@4",
                "_RVExtensionVersion@8",
            ]
        );
    }

    #[test]
    fn test_plain_names_on_64_bit() {
        let names: Vec<String> = EntryPoint::ALL.iter().map(|e| e.symbol_for_width(64)).collect();
        assert_eq!(
            names,
            ["RVExtension", "RVExtensionArgs", "RVExtensionRegisterCallback", "RVExtensionVersion"]
        );
    }

    #[test]
    fn test_stack_bytes_match_signatures() {
        // every argument is a 4-byte int or pointer on 32-bit targets
        assert_eq!(EntryPoint::Call.stack_bytes(), 3 * 4);
        assert_eq!(EntryPoint::CallArgs.stack_bytes(), 5 * 4);
        assert_eq!(EntryPoint::RegisterCallback.stack_bytes(), 4);
        assert_eq!(EntryPoint::Version.stack_bytes(), 2 * 4);
    }

    #[test]
    fn test_host_symbol_follows_pointer_width() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(EntryPoint::Call.symbol(), "RVExtension");

        #[cfg(target_pointer_width = "32")]
        assert_eq!(EntryPoint::Call.symbol(), "_RVExtension@12");
    }
}
