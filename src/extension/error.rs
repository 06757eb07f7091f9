/*
 *  extension/error.rs
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 *
 *  Error types for extension loading and invocation
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

use std::ffi::NulError;
use std::path::PathBuf;
use thiserror::Error;

use super::machine::MachineType;

/// Coarse classification of an [`ExtensionError`]
///
/// Several variants share a kind: a failed `LoadLibrary`/`dlopen` and a
/// missing export are both load failures to a caller deciding what to do
/// next, but keep separate variants for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ArchitectureMismatch,
    Format,
    Load,
    Invocation,
    Released,
}

/// Unified error type for everything that touches an extension library
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Path does not reference an existing file
    #[error("no dll found: {}", .0.display())]
    NotFound(PathBuf),

    /// Library built for a different pointer width than this process
    #[error("you can not run a {library_bits}-bit dll ({machine}) in a {host_bits}-bit process")]
    ArchitectureMismatch {
        machine: MachineType,
        library_bits: u32,
        host_bits: u32,
    },

    /// Not a recognizable executable image
    #[error("{0}")]
    Format(String),

    /// I/O failure while reading the image header
    #[error("error loading the dll: failed to read header of {}", path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dynamic loader refused the library
    #[error("error loading the dll: {}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A required entry point is missing or exported as null
    #[error("error loading the dll: entry point {symbol} not resolved")]
    Symbol {
        symbol: String,
        #[source]
        source: Option<libloading::Error>,
    },

    /// The library could not be closed cleanly
    #[error("error unloading the dll")]
    Unload(#[source] libloading::Error),

    /// A call could not be carried across the boundary
    #[error("error calling the dll ({entry})")]
    Invocation {
        entry: &'static str,
        #[source]
        cause: InvocationCause,
    },

    /// Operation attempted after `dispose`
    #[error("extension handle already released")]
    Released,
}

impl ExtensionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtensionError::NotFound(_) => ErrorKind::NotFound,
            ExtensionError::ArchitectureMismatch { .. } => ErrorKind::ArchitectureMismatch,
            ExtensionError::Format(_) => ErrorKind::Format,
            ExtensionError::Header { .. }
            | ExtensionError::Load { .. }
            | ExtensionError::Symbol { .. }
            | ExtensionError::Unload(_) => ErrorKind::Load,
            ExtensionError::Invocation { .. } => ErrorKind::Invocation,
            ExtensionError::Released => ErrorKind::Released,
        }
    }

    pub(crate) fn invocation(entry: &'static str, cause: impl Into<InvocationCause>) -> Self {
        ExtensionError::Invocation { entry, cause: cause.into() }
    }
}

/// Why a foreign call was refused before crossing the boundary
#[derive(Debug, Error)]
pub enum InvocationCause {
    #[error("string argument contains an interior NUL byte")]
    InteriorNul(#[from] NulError),

    #[error("{0} arguments exceed the ABI argument count limit")]
    TooManyArguments(usize),

    #[error("all {0} callback slots are in use")]
    CallbackSlotsExhausted(usize),

    #[error("re-entrant call on the same extension handle from inside a callback")]
    Reentrant,
}

pub type Result<T> = std::result::Result<T, ExtensionError>;
