/*
 *  tests/unload.rs
 *
 *  Library lifetime: unmapped on dispose, on drop and after failed resolution.
 *  Kept in its own test binary so no other test has the library mapped.
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 */

#![cfg(target_os = "linux")]

mod common;

use rvext::extension::{ErrorKind, Extension, ExtensionError};

#[test]
fn test_dispose_unloads_exactly_once() {
    let _serial = common::serial();
    let library = common::echo_extension();

    let ext = Extension::open(&library).unwrap();
    assert!(common::is_mapped(&library));
    assert_eq!(ext.call("still here").unwrap(), "still here");

    ext.dispose().unwrap();
    assert!(!common::is_mapped(&library), "library still mapped after dispose");

    // neither a second dispose nor the drop touches the loader again
    ext.dispose().unwrap();
    assert!(!common::is_mapped(&library));
    drop(ext);
    assert!(!common::is_mapped(&library));
}

#[test]
fn test_drop_unloads() {
    let _serial = common::serial();
    let library = common::echo_extension();

    let ext = Extension::open(&library).unwrap();
    assert!(common::is_mapped(&library));
    drop(ext);
    assert!(!common::is_mapped(&library), "library still mapped after drop");
}

#[test]
fn test_failed_resolution_unloads() {
    let _serial = common::serial();
    let library = common::echo_extension_without_version();

    match Extension::open(&library) {
        Err(err @ ExtensionError::Symbol { .. }) => {
            assert_eq!(err.kind(), ErrorKind::Load);
            assert!(err.to_string().contains("RVExtensionVersion"), "{}", err);
        }
        other => panic!("Expected Symbol error, got {:?}", other),
    }
    assert!(!common::is_mapped(&library), "library left mapped after failed resolution");
}
