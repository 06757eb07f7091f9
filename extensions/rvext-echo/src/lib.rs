/*
 *  RVExt Echo Extension
 *
 *  A minimal RVExtension library used to exercise the RVExt host:
 *  it echoes input, joins arguments and fires callbacks from its own
 *  threads.
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 */

//! # RVExt echo extension
//!
//! ## Behavior
//!
//! `RVExtension(input)`:
//!
//! - `fire:<data>` - spawn a thread that invokes the registered callback with
//!   `("rvext-echo", "fire", <data>)`; writes `fired` (or `no callback`)
//! - `fire-sync:<data>` - invoke the callback on the calling thread with
//!   `("rvext-echo", "fire-sync", <data>)`; writes `status:<returned status>`
//! - `join` - wait for fired threads; writes `joined:<last status>`
//! - `sleep:<ms>` - sleep, then write `slept`
//! - `callback` - writes `registered` or `none`
//! - anything else is echoed back, truncated to the output size
//!
//! `RVExtensionArgs(function, args)`:
//!
//! - `count` - writes the argument count
//! - `sleep` - sleeps `args[0]` ms, writes `slept`
//! - anything else writes the arguments joined with `,`
//!
//! Returns the argument count as status.
//!
//! Built with the `no-version` feature, `RVExtensionVersion` is not exported.

mod ffi;
mod extension;

pub use extension::{
    RVExtension,
    RVExtensionArgs,
    RVExtensionRegisterCallback,
};
#[cfg(not(feature = "no-version"))]
pub use extension::RVExtensionVersion;
