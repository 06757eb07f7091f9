/*
 *  tests/echo_extension.rs
 *
 *  Integration tests against the rvext-echo extension
 *
 *  RVExt - extension test bench
 *  (c) 2020-26 Stuart Hunter
 */

mod common;

use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use rvext::extension::{
    ErrorKind, Extension, ExtensionError, ImageFormat, InvocationCause, CALLBACK_SLOTS,
    RVEXTENSION_OUTPUT_SIZE,
};

fn open_echo() -> Extension {
    Extension::open(common::echo_extension()).expect("load rvext-echo")
}

#[test]
fn test_version() {
    let _serial = common::serial();
    let ext = open_echo();

    assert_eq!(ext.version().unwrap(), "rvext-echo 1.0.0");
    ext.dispose().unwrap();
}

#[test]
fn test_image_matches_host() {
    let _serial = common::serial();
    let ext = open_echo();

    let image = ext.image();
    #[cfg(windows)]
    assert_eq!(image.format, ImageFormat::Pe);
    #[cfg(target_os = "linux")]
    assert_eq!(image.format, ImageFormat::Elf);
    assert_eq!(image.pointer_width, Some(usize::BITS));
}

#[test]
fn test_call_echoes_without_stale_output() {
    let _serial = common::serial();
    let ext = open_echo();

    assert_eq!(ext.call("x").unwrap(), "x");
    assert_eq!(ext.call("a much longer input string").unwrap(), "a much longer input string");
    // nothing of the previous, longer output survives
    assert_eq!(ext.call("y").unwrap(), "y");
    assert_eq!(ext.call("").unwrap(), "");
}

#[test]
fn test_call_output_is_bounded() {
    let _serial = common::serial();
    let ext = open_echo();

    let input = "z".repeat(RVEXTENSION_OUTPUT_SIZE * 2);
    let output = ext.call(&input).unwrap();
    assert_eq!(output.len(), RVEXTENSION_OUTPUT_SIZE - 1);
}

#[test]
fn test_call_args_joins() {
    let _serial = common::serial();
    let ext = open_echo();

    assert_eq!(ext.call_args("f", &["a", "b", "c"]).unwrap(), "a,b,c");

    let args = vec!["1".to_string(), "2".to_string(), "3".to_string()];
    let (output, status) = ext.call_args_status("count", args.as_slice()).unwrap();
    assert_eq!(output, "3");
    assert_eq!(status, 3);
    // the caller's arguments are untouched
    assert_eq!(args, ["1", "2", "3"]);

    let (output, status, elapsed) = ext.timed_call_args_status("count", &["x", "y"]).unwrap();
    assert_eq!((output.as_str(), status), ("2", 2));
    assert!(elapsed < Duration::from_secs(5));

    let none: [&str; 0] = [];
    assert_eq!(ext.call_args_status("f", &none).unwrap(), (String::new(), 0));
}

#[test]
fn test_interior_nul_is_invocation_error() {
    let _serial = common::serial();
    let ext = open_echo();

    let err = ext.call("bad\0input").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);

    let err = ext.call_args("f", &["ok", "not\0ok"]).unwrap_err();
    assert!(matches!(
        err,
        ExtensionError::Invocation { cause: InvocationCause::InteriorNul(_), .. }
    ));

    // the handle is still usable
    assert_eq!(ext.call("fine").unwrap(), "fine");
}

#[test]
fn test_timed_variants_measure_the_call() {
    let _serial = common::serial();
    let ext = open_echo();

    let (output, elapsed) = ext.timed_call("sleep:50").unwrap();
    assert_eq!(output, "slept");
    assert!(elapsed >= Duration::from_millis(50), "timed_call measured {:?}", elapsed);

    let (output, elapsed) = ext.timed_call_args("sleep", &["50"]).unwrap();
    assert_eq!(output, "slept");
    assert!(elapsed >= Duration::from_millis(50), "timed_call_args measured {:?}", elapsed);

    let (version, elapsed) = ext.timed_version().unwrap();
    assert_eq!(version, "rvext-echo 1.0.0");
    assert!(elapsed < Duration::from_secs(5));

    let elapsed = ext.timed_register_callback(|_, _, _| 0).unwrap();
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_dispose_is_idempotent() {
    let _serial = common::serial();
    let ext = open_echo();
    assert!(!ext.is_released());

    ext.dispose().unwrap();
    assert!(ext.is_released());
    ext.dispose().unwrap();
    assert!(ext.is_released());

    for err in [
        ext.call("x").unwrap_err(),
        ext.call_args("f", &["a"]).unwrap_err(),
        ext.version().unwrap_err(),
        ext.register_callback(|_, _, _| 0).unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Released);
        assert_eq!(err.to_string(), "extension handle already released");
    }
    // drop after dispose must not unload a second time
    drop(ext);
}

#[test]
fn test_callback_from_extension_thread() {
    let _serial = common::serial();
    let ext = open_echo();

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let caller = thread::current().id();
    ext.register_callback(move |name, function, data| {
        let on_other_thread = thread::current().id() != caller;
        tx.lock()
            .unwrap()
            .send((name.to_string(), function.to_string(), data.to_string(), on_other_thread))
            .unwrap();
        7
    })
    .unwrap();

    assert_eq!(ext.call("callback").unwrap(), "registered");
    assert_eq!(ext.call("fire:payload with spaces").unwrap(), "fired");

    let (name, function, data, on_other_thread) =
        rx.recv_timeout(Duration::from_secs(5)).expect("callback never arrived");
    assert_eq!(name, "rvext-echo");
    assert_eq!(function, "fire");
    assert_eq!(data, "payload with spaces");
    assert!(on_other_thread);

    // the extension saw our return value; also waits for its thread to finish
    assert_eq!(ext.call("join").unwrap(), "joined:7");
    ext.dispose().unwrap();
}

#[test]
fn test_register_again_replaces_callback() {
    let _serial = common::serial();
    let ext = open_echo();

    ext.register_callback(|_, _, _| 1).unwrap();
    ext.register_callback(|_, _, data| data.len() as i32).unwrap();

    assert_eq!(ext.call("fire-sync:four").unwrap(), "status:4");
    ext.dispose().unwrap();
}

#[test]
fn test_reentrant_call_is_refused() {
    let _serial = common::serial();
    let ext = Arc::new(open_echo());
    let weak: Weak<Extension> = Arc::downgrade(&ext);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    ext.register_callback(move |_, _, _| {
        let Some(ext) = weak.upgrade() else { return -2 };
        let result = ext.call("nested").map_err(|e| e.kind());
        tx.lock().unwrap().send(result).unwrap();
        0
    })
    .unwrap();

    // the extension calls back on this thread while the handle is busy
    assert_eq!(ext.call("fire-sync:x").unwrap(), "status:0");
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Err(ErrorKind::Invocation));

    ext.dispose().unwrap();
}

#[test]
fn test_is_released_inside_callback() {
    let _serial = common::serial();
    let ext = Arc::new(open_echo());
    let weak: Weak<Extension> = Arc::downgrade(&ext);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    ext.register_callback(move |_, _, _| {
        let Some(ext) = weak.upgrade() else { return -2 };
        tx.lock().unwrap().send(ext.is_released()).unwrap();
        0
    })
    .unwrap();

    // run the call elsewhere so a blocked lock fails the test instead of hanging it
    let caller = {
        let ext = Arc::clone(&ext);
        thread::spawn(move || ext.call("fire-sync:x").map_err(|e| e.kind()))
    };

    let released = rx.recv_timeout(Duration::from_secs(5)).expect("is_released blocked inside the callback");
    assert!(!released);
    assert_eq!(caller.join().unwrap(), Ok("status:0".to_string()));

    assert!(!ext.is_released());
    ext.dispose().unwrap();
    assert!(ext.is_released());
}

#[test]
fn test_callback_slots_run_out() {
    let _serial = common::serial();

    let handles: Vec<Extension> = (0..CALLBACK_SLOTS).map(|_| open_echo()).collect();
    for ext in &handles {
        ext.register_callback(|_, _, _| 0).unwrap();
    }

    let extra = open_echo();
    let err = extra.register_callback(|_, _, _| 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invocation);
    assert!(matches!(
        err,
        ExtensionError::Invocation { cause: InvocationCause::CallbackSlotsExhausted(n), .. } if n == CALLBACK_SLOTS
    ));
    // the handle itself is fine
    assert_eq!(extra.call("ok").unwrap(), "ok");

    // releasing one handle hands its slot back
    handles[0].dispose().unwrap();
    extra.register_callback(|_, _, data| data.len() as i32).unwrap();
    assert_eq!(extra.call("fire-sync:abc").unwrap(), "status:3");

    drop(handles);
    extra.dispose().unwrap();
}

#[test]
fn test_calls_from_many_threads_are_serialized() {
    let _serial = common::serial();
    let ext = Arc::new(open_echo());

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let ext = Arc::clone(&ext);
            thread::spawn(move || {
                for i in 0..50 {
                    let input = format!("thread {} call {}", t, i);
                    assert_eq!(ext.call(&input).unwrap(), input);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    ext.dispose().unwrap();
}

#[test]
fn test_handle_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Extension>();
}
