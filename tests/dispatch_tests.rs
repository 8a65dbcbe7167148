//! Trampoline dispatch: serialization, error routing and value access.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use common::{Harness, failing_callback, recording_callback};
use parambridge::native::{ParamValue, RecordStore};
use parambridge::prelude::*;
use parking_lot::Mutex;

fn two_params(function: ScriptFunction) -> ScriptFunction {
    function
        .with_param(ParamSpec::new("param"))
        .with_param(ParamSpec::new("offset"))
}

// =============================================================================
// Serialization
// =============================================================================

#[test]
fn test_callbacks_from_many_threads_are_serialized() {
    const THREADS: usize = 8;
    const EVENTS: usize = 50;

    let h = Harness::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    // Unsynchronized read-modify-write: only exact under mutual exclusion.
    let callback = two_params(ScriptFunction::new("count", move |_| {
        let current = seen.load(Ordering::SeqCst);
        thread::yield_now();
        seen.store(current + 1, Ordering::SeqCst);
        Ok(Value::None)
    }));
    let param = Parameter::create(&h.runtime, 30, "hot", ParamType::Uint32)
        .callback(callback)
        .build()
        .unwrap();
    let record = param.record();

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let list = h.params.clone();
            thread::spawn(move || {
                for n in 0..EVENTS {
                    if i % 2 == 0 {
                        list.notify(record, -1).unwrap();
                    } else {
                        list.set_value(record, -1, ParamValue::UInt(n as u64)).unwrap();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::SeqCst), THREADS * EVENTS);
    assert!(h.runtime.token().acquisitions() >= (THREADS * EVENTS) as u64);
}

#[test]
fn test_events_racing_destruction_are_ignored() {
    let h = Harness::new();
    let (callback, _calls) = recording_callback("on_change");
    let record = h
        .params
        .register_static(RecordSpec::new(31, "racy", ParamType::Int32))
        .unwrap();

    let list = h.params.clone();
    let notifier = thread::spawn(move || {
        for _ in 0..500 {
            list.notify(record, -1).unwrap();
        }
    });
    for _ in 0..50 {
        let param = Parameter::find(&h.runtime, 31, None).unwrap();
        param.set_callback(Some(callback.clone())).unwrap();
        param.forget();
    }
    notifier.join().unwrap();

    assert_eq!(h.runtime.record_state(record), OwnershipState::NativeOnly);
    assert!(!h.params.has_callback(record));
}

#[test]
fn test_event_on_unbridged_record_is_noop() {
    let h = Harness::new();
    let record = h
        .params
        .register_static(RecordSpec::new(32, "quiet", ParamType::Int8))
        .unwrap();
    h.params.notify(record, -1).unwrap();
    assert_eq!(h.runtime.bridged_parameters(), 0);
}

// =============================================================================
// Error routing
// =============================================================================

#[test]
fn test_callback_error_reaches_scripting_caller() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 40, "p", ParamType::Int32)
        .callback(failing_callback("boom"))
        .build()
        .unwrap();

    let err = param.set_cached_value(1).unwrap_err();
    assert!(err.is_propagated());
    assert_eq!(err.to_string(), "Error calling script callback");
    assert_eq!(err.root_cause().to_string(), "boom");

    // The write itself happened, and nothing is left pending.
    param.set_callback(None).unwrap();
    assert_eq!(param.cached_value().unwrap(), Value::Int(1));
}

#[test]
fn test_callback_error_on_native_thread_is_cleared() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 41, "p", ParamType::Int32)
        .callback(failing_callback("boom"))
        .build()
        .unwrap();
    let record = param.record();

    let list = h.params.clone();
    let result = thread::spawn(move || list.set_value(record, -1, ParamValue::Int(3)))
        .join()
        .unwrap();
    assert!(result.is_ok());

    param.set_callback(None).unwrap();
    assert_eq!(param.value().unwrap(), Value::Int(3));
    assert!(param.set_cached_value(4).is_ok());
}

#[test]
fn test_callback_error_during_remote_pull_is_propagated() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 42, "p", ParamType::Int32)
        .host(6)
        .callback(failing_callback("remote boom"))
        .build()
        .unwrap();
    h.link.set_remote(6, 42, 0, ParamValue::Int(12));

    let err = param.value().unwrap_err();
    assert!(err.is_propagated());
    assert_eq!(err.root_cause().to_string(), "remote boom");
}

#[test]
fn test_callback_receives_handle_and_offset() {
    let h = Harness::new();
    let (callback, calls) = recording_callback("on_change");
    let param = Parameter::create(&h.runtime, 43, "arr", ParamType::Int16)
        .arity(3)
        .callback(callback)
        .build()
        .unwrap();

    param
        .set_value(Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        .unwrap();
    param.set_value_at(-1, 9).unwrap();

    let offsets: Vec<i64> = calls.lock().iter().map(|(_, offset)| *offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 2]);
    assert!(calls.lock().iter().all(|(name, _)| name == "arr"));
    // Handles passed to the callback were released.
    assert_eq!(param.ref_count(), 1);
}

// =============================================================================
// Values
// =============================================================================

#[test]
fn test_array_access() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 50, "arr", ParamType::Int16)
        .arity(3)
        .build()
        .unwrap();

    param
        .set_value(Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        .unwrap();
    assert_eq!(
        param.value().unwrap(),
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
    assert_eq!(param.value_at(-1).unwrap(), Value::Int(3));

    param.set_value_at(0, 7).unwrap();
    assert_eq!(param.value_at(0).unwrap(), Value::Int(7));

    assert!(matches!(
        param.value_at(3),
        Err(BridgeError::IndexOutOfRange { index: 3, len: 3 })
    ));
    assert!(matches!(
        param.set_value(Value::List(vec![Value::Int(1)])),
        Err(BridgeError::TypeMismatch { .. })
    ));
    assert!(matches!(
        param.set_value(5),
        Err(BridgeError::TypeMismatch { .. })
    ));
}

#[test]
fn test_out_of_range_write_leaves_value() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 51, "small", ParamType::Uint8)
        .build()
        .unwrap();
    param.set_value(200).unwrap();
    assert!(matches!(
        param.set_value(300),
        Err(BridgeError::TypeMismatch { .. })
    ));
    assert!(param.set_value(-1).is_err());
    assert_eq!(param.value().unwrap(), Value::Int(200));
}

#[test]
fn test_partial_array_write_is_rejected_whole() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 52, "arr", ParamType::Int8)
        .arity(2)
        .build()
        .unwrap();
    let result = param.set_value(Value::List(vec![Value::Int(1), Value::Int(1000)]));
    assert!(matches!(result, Err(BridgeError::TypeMismatch { .. })));
    assert_eq!(
        param.value().unwrap(),
        Value::List(vec![Value::Int(0), Value::Int(0)])
    );
}

#[test]
fn test_string_parameter() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 53, "label", ParamType::String)
        .arity(16)
        .build()
        .unwrap();
    assert!(!param.is_array());
    param.set_value("hello").unwrap();
    assert_eq!(param.value().unwrap(), Value::Str("hello".into()));
    assert!(matches!(
        param.value_at(0),
        Err(BridgeError::TypeMismatch { .. })
    ));
}

#[test]
fn test_float_parameter_accepts_integers() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 54, "ratio", ParamType::Double)
        .build()
        .unwrap();
    param.set_value(2).unwrap();
    assert_eq!(param.value().unwrap(), Value::Float(2.0));
}

#[test]
fn test_uint64_parameter_holds_full_range() {
    let h = Harness::new();
    let record = h
        .params
        .register_static(RecordSpec::new(55, "uptime", ParamType::Uint64))
        .unwrap();
    h.params
        .set_value(record, -1, ParamValue::UInt(u64::MAX))
        .unwrap();

    let param = Parameter::find(&h.runtime, 55, None).unwrap();
    assert_eq!(param.value().unwrap(), Value::UInt(u64::MAX));
    assert_eq!(u64::from_value(&param.value().unwrap()).unwrap(), u64::MAX);

    param.set_value(u64::MAX - 1).unwrap();
    assert_eq!(
        h.params.get_value(record, 0).unwrap(),
        ParamValue::UInt(u64::MAX - 1)
    );
    param.set_value(3u64).unwrap();
    assert_eq!(param.value().unwrap(), Value::Int(3));
    assert!(matches!(
        param.set_value(-1),
        Err(BridgeError::TypeMismatch { .. })
    ));
}

// =============================================================================
// Remote
// =============================================================================

#[test]
fn test_remote_get_and_set() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 60, "remote", ParamType::Int32)
        .host(4)
        .build()
        .unwrap();

    h.link.set_remote(4, 60, 0, ParamValue::Int(-8));
    assert_eq!(param.value().unwrap(), Value::Int(-8));
    assert_eq!(param.cached_value().unwrap(), Value::Int(-8));

    param.set_value(9).unwrap();
    assert_eq!(h.link.remote(4, 60, 0), Some(ParamValue::Int(9)));
    // Pushing does not touch the local copy.
    assert_eq!(param.cached_value().unwrap(), Value::Int(-8));
}

#[test]
fn test_remote_retries_then_succeeds() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 61, "remote", ParamType::Int32)
        .host(4)
        .retries(3)
        .build()
        .unwrap();
    h.link.fail_next(2);
    h.link.set_remote(4, 61, 0, ParamValue::Int(5));

    assert_eq!(param.value().unwrap(), Value::Int(5));
    assert_eq!(h.link.attempts(), 3);
}

#[test]
fn test_remote_gives_up_after_retries() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 62, "remote", ParamType::Int32)
        .host(4)
        .retries(2)
        .build()
        .unwrap();
    h.link.fail_next(5);

    assert!(matches!(
        param.set_value(1),
        Err(BridgeError::NoResponse { node: 4 })
    ));
    assert_eq!(h.link.attempts(), 2);
    assert!(h.link.remote(4, 62, 0).is_none());
}

#[test]
fn test_remote_releases_token_while_blocking() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 63, "slow", ParamType::Int32)
        .host(4)
        .build()
        .unwrap();
    h.link.set_latency(std::time::Duration::from_millis(50));

    let runtime = h.runtime.clone();
    let observer = thread::spawn(move || {
        thread::sleep(std::time::Duration::from_millis(10));
        let guard = runtime.token().acquire();
        drop(guard);
    });
    param.value().unwrap();
    observer.join().unwrap();
    assert_eq!(h.runtime.token().contended_acquisitions(), 0);
}

// =============================================================================
// Getter / setter
// =============================================================================

#[test]
fn test_getset_parameter() {
    let h = Harness::new();
    let stored = Arc::new(Mutex::new(Vec::<(i64, Value)>::new()));
    let sink = stored.clone();

    let getter = two_params(ScriptFunction::new("get", |frame| {
        let param: Parameter = frame.arg(0)?;
        Ok(Value::Int(param.id() as i64 * 2))
    }));
    let setter = ScriptFunction::new("set", move |frame| {
        let offset: i64 = frame.arg(1)?;
        sink.lock().push((offset, frame.arg_value(2)?.clone()));
        Ok(Value::None)
    })
    .with_param(ParamSpec::new("param"))
    .with_param(ParamSpec::new("offset"))
    .with_param(ParamSpec::new("value"));

    let param = Parameter::create(&h.runtime, 70, "virtual", ParamType::Int32)
        .getter(getter)
        .setter(setter)
        .build()
        .unwrap();
    assert_eq!(param.kind(), HandleKind::GetSetParameter);

    assert_eq!(param.value().unwrap(), Value::Int(140));
    param.set_value(11).unwrap();
    assert_eq!(stored.lock().as_slice(), &[(-1, Value::Int(11))]);
    // Writes are routed to the setter only.
    assert_eq!(param.value().unwrap(), Value::Int(140));
}

#[test]
fn test_getter_error_propagates() {
    let h = Harness::new();
    let getter = two_params(ScriptFunction::new("get", |_| {
        Err(BridgeError::script("no value"))
    }));
    let param = Parameter::create(&h.runtime, 71, "virtual", ParamType::Int32)
        .getter(getter)
        .build()
        .unwrap();

    let err = param.value().unwrap_err();
    assert_eq!(err.root_cause().to_string(), "no value");
}

#[test]
fn test_getset_record_freed_with_handle() {
    let h = Harness::new();
    let getter = two_params(ScriptFunction::new("get", |_| Ok(Value::Int(1))));
    let param = Parameter::create(&h.runtime, 72, "virtual", ParamType::Int32)
        .getter(getter)
        .build()
        .unwrap();
    let record = param.record();
    param.list_forget().unwrap();
    drop(param);
    assert!(!h.params.is_allocated(record));
}

#[test]
fn test_reassigned_accessors_are_dispatched() {
    let h = Harness::new();
    let stored = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = stored.clone();
    let param = Parameter::create(&h.runtime, 73, "virtual", ParamType::Int32)
        .getter(two_params(ScriptFunction::new("get", |_| Ok(Value::Int(1)))))
        .build()
        .unwrap();
    assert_eq!(param.value().unwrap(), Value::Int(1));

    param
        .set_getter(Some(two_params(ScriptFunction::new("get2", |_| {
            Ok(Value::Int(2))
        }))))
        .unwrap();
    assert_eq!(param.value().unwrap(), Value::Int(2));

    let setter = two_params(ScriptFunction::new("set", move |frame| {
        sink.lock().push(frame.arg_value(2)?.clone());
        Ok(Value::None)
    }))
    .with_param(ParamSpec::new("value"));
    param.set_setter(Some(setter)).unwrap();
    param.set_value(5).unwrap();
    assert_eq!(stored.lock().as_slice(), &[Value::Int(5)]);

    // With the getter gone, reads come from the cache again.
    param.set_getter(None).unwrap();
    assert!(param.getter().is_none());
    assert!(param.setter().is_some());
}

#[test]
fn test_rejected_accessor_keeps_previous() {
    let h = Harness::new();
    let param = Parameter::create(&h.runtime, 74, "virtual", ParamType::Int32)
        .getter(two_params(ScriptFunction::new("get", |_| Ok(Value::Int(1)))))
        .build()
        .unwrap();

    let one_arg =
        ScriptFunction::new("get2", |_| Ok(Value::Int(2))).with_param(ParamSpec::new("param"));
    assert!(matches!(
        param.set_getter(Some(one_arg)),
        Err(BridgeError::InvalidCallbackSignature { .. })
    ));
    let two_arg_setter = two_params(ScriptFunction::new("set", |_| Ok(Value::None)));
    assert!(matches!(
        param.set_setter(Some(two_arg_setter)),
        Err(BridgeError::InvalidCallbackSignature { .. })
    ));
    assert!(matches!(
        param.set_getter(None),
        Err(BridgeError::TypeMismatch { .. })
    ));
    assert_eq!(param.getter().map(|g| g.name().to_string()), Some("get".into()));
    assert!(param.setter().is_none());
    assert_eq!(param.value().unwrap(), Value::Int(1));

    let plain = Parameter::create(&h.runtime, 75, "plain", ParamType::Int32)
        .build()
        .unwrap();
    let getter = two_params(ScriptFunction::new("get", |_| Ok(Value::Int(1))));
    assert!(matches!(
        plain.set_getter(Some(getter)),
        Err(BridgeError::TypeMismatch { .. })
    ));
}
