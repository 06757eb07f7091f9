/*
 *  tests/common/mod.rs
 *
 *  Shared helpers for the integration tests
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 */

#![allow(dead_code)]

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard, OnceLock};

/// The echo extension keeps its callback in a process-wide static, so tests
/// that load it must not overlap.
static EXTENSION_LOCK: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    EXTENSION_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path to a freshly built `rvext-echo` library
///
/// The library is built with the same cargo into its own target directory;
/// the directory of the running `cargo test` is locked for its duration.
pub fn echo_extension() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| build_echo_extension("rvext-echo", &[])).clone()
}

/// `rvext-echo` built without its `RVExtensionVersion` export
pub fn echo_extension_without_version() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| build_echo_extension("rvext-echo-no-version", &["no-version"])).clone()
}

/// Whether `library` is currently mapped into this process
#[cfg(target_os = "linux")]
pub fn is_mapped(library: &Path) -> bool {
    let library = std::fs::canonicalize(library).expect("library path");
    let maps = std::fs::read_to_string("/proc/self/maps").expect("read /proc/self/maps");
    maps.lines().any(|line| line.ends_with(&*library.to_string_lossy()))
}

fn build_echo_extension(dir: &str, features: &[&str]) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR")).join("Cargo.toml");

    // <target>/<profile>/deps/<test binary>
    let exe = std::env::current_exe().expect("test binary path");
    let target_root = exe
        .ancestors()
        .nth(3)
        .expect("test binary lives under a target directory")
        .to_path_buf();
    let target_dir = target_root.join(dir);

    let mut cargo = Command::new(env!("CARGO"));
    cargo
        .arg("build")
        .arg("--manifest-path")
        .arg(&manifest)
        .args(["-p", "rvext-echo"])
        .arg("--target-dir")
        .arg(&target_dir);
    if !features.is_empty() {
        let features: Vec<String> = features.iter().map(|f| format!("rvext-echo/{}", f)).collect();
        cargo.arg("--features").arg(features.join(","));
    }
    let status = cargo.status().expect("failed to run cargo");
    assert!(status.success(), "building rvext-echo failed: {}", status);

    let library = target_dir
        .join("debug")
        .join(format!("{}rvext_echo{}", DLL_PREFIX, DLL_SUFFIX));
    assert!(library.exists(), "rvext-echo not found at {}", library.display());
    library
}
