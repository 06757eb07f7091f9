/*
 *  extension/mod.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Host side of the RVExtension plugin interface
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

//! Loading and calling RVExtension libraries
//!
//! An extension is a shared library (.dll/.so) exporting four functions
//! with the Windows API calling convention. This module lets a program other
//! than the simulation host load one and drive it.
//!
//! ## Layers
//!
//! 1. **Machine check** (`machine.rs`) - reads the image header and rejects
//!    libraries built for the other pointer width before loading them
//! 2. **FFI layer** (`ffi.rs`) - raw signatures and symbol decoration
//! 3. **Callbacks** (`callback.rs`) - routes the extension's bare callback
//!    pointer back to a Rust closure
//! 4. **Handle** (`handle.rs`) - load, resolve, call, unload
//!
//! ## Symbol names
//!
//! - 64-bit: `RVExtension`, `RVExtensionArgs`, `RVExtensionRegisterCallback`,
//!   `RVExtensionVersion`
//! - 32-bit: `_RVExtension@12`, `_RVExtensionArgs@20`,
//!   `_RVExtensionRegisterCallback@4`, `_RVExtensionVersion@8`
//!
//! ## Example
//!
//! ```no_run
//! use rvext::extension::Extension;
//!
//! let ext = Extension::open("my_extension_x64.dll")?;
//! println!("{}", ext.version()?);
//! println!("{}", ext.call_args("echo", &["a", "b"])?);
//! ext.dispose()?;
//! # Ok::<(), rvext::extension::ExtensionError>(())
//! ```

pub mod ffi;
pub mod machine;
pub mod callback;
pub mod error;
pub mod handle;

// Re-exports for convenience
pub use callback::{CallbackSlot, ExtensionCallback, CALLBACK_SLOTS};
pub use error::{ErrorKind, ExtensionError, InvocationCause};
pub use ffi::{EntryPoint, RVEXTENSION_OUTPUT_SIZE};
pub use handle::Extension;
pub use machine::{ImageFormat, ImageInfo, MachineType};
