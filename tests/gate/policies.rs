use super::{await_waiting, scope, spawn_arrivals};
use request_gate::{AnyRequest, GateConfig, GateState, ReleasePolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn incremental_release_goes_out_in_batches() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let peak = Arc::new(AtomicUsize::new(0));

    let scope = scope("batches");
    let config = {
        let batches = Arc::clone(&batches);
        let peak = Arc::clone(&peak);
        GateConfig::builder()
            .policy(ReleasePolicy::ReleaseIncrementally { max_concurrent: 2 })
            .on_request_arrived(move |waiting, _| {
                peak.fetch_max(waiting, Ordering::SeqCst);
            })
            .on_requests_released(move |released| {
                batches.lock().unwrap().push(released);
            })
            .build()
    };
    let gate = scope.expect_with(config, AnyRequest::<usize>::times(6));

    for worker in spawn_arrivals(&gate, 0..6) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![2, 2, 2]);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn incremental_release_flushes_a_short_last_batch() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&batches);

    let scope = scope("short-batch");
    let gate = scope.expect_with(
        GateConfig::builder()
            .policy(ReleasePolicy::ReleaseIncrementally { max_concurrent: 2 })
            .on_requests_released(move |released| recorded.lock().unwrap().push(released))
            .build(),
        AnyRequest::<usize>::times(5),
    );

    for worker in spawn_arrivals(&gate, 0..5) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![2, 2, 1]);
}

#[test]
fn incremental_bound_larger_than_set_behaves_like_barrier() {
    let scope = scope("wide");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ReleaseIncrementally { max_concurrent: 10 },
        AnyRequest::<usize>::times(3),
    );
    assert!(gate.is_auto_release());

    let workers = spawn_arrivals(&gate, 0..2);
    await_waiting(&gate, 2);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(gate.waiting(), 2);

    gate.on_request_arrived(&2).unwrap();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(gate.state(), GateState::Closed);
}

#[test]
fn manual_gate_holds_everything_until_told() {
    let scope = scope("manual");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ManualRelease {
            max_concurrent: None,
        },
        AnyRequest::<usize>::times(4),
    );
    assert!(!gate.is_auto_release());

    let workers = spawn_arrivals(&gate, 0..4);
    assert_eq!(gate.wait_for_all_pending_calls().unwrap(), 4);

    // Nothing moves on its own.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(gate.waiting(), 4);
    assert_eq!(gate.state(), GateState::Active);

    assert_eq!(gate.release(2).unwrap(), 2);
    assert_eq!(gate.waiting(), 2);
    assert_eq!(gate.release_all().unwrap(), 2);

    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();
}

#[test]
fn bounded_manual_gate_waits_for_each_batch() {
    let scope = scope("bounded");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ManualRelease {
            max_concurrent: Some(2),
        },
        AnyRequest::<usize>::times(3),
    );

    let first = spawn_arrivals(&gate, 0..2);
    assert_eq!(gate.wait_for_all_pending_calls().unwrap(), 2);
    assert_eq!(gate.release_all().unwrap(), 2);
    for worker in first {
        worker.join().unwrap().unwrap();
    }

    // Only one expected request is left, so one parked request is enough.
    let last = spawn_arrivals(&gate, [2]);
    assert_eq!(gate.wait_for_all_pending_calls().unwrap(), 1);
    assert_eq!(gate.release(1).unwrap(), 1);
    for worker in last {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();
}

#[test]
fn release_zero_is_a_no_op() {
    let scope = scope("zero");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ManualRelease {
            max_concurrent: None,
        },
        AnyRequest::<usize>::times(1),
    );

    assert_eq!(gate.release(0).unwrap(), 0);
    assert_eq!(gate.release_all().unwrap(), 0);

    let worker = spawn_arrivals(&gate, [0]);
    await_waiting(&gate, 1);
    assert_eq!(gate.release_all().unwrap(), 1);
    for worker in worker {
        worker.join().unwrap().unwrap();
    }
}

#[test]
fn default_policy_is_release_all_when_full() {
    let scope = scope("default");
    let gate = scope.expect_concurrent(AnyRequest::<u8>::times(2));
    assert_eq!(gate.policy(), ReleasePolicy::ReleaseAllWhenFull);
    assert_eq!(ReleasePolicy::default(), ReleasePolicy::ReleaseAllWhenFull);
}

/// Parking alone has to wake a driver blocked on the manual gate; otherwise
/// it sleeps until the deadline and the phase fails with every request in.
#[test]
fn driver_wakes_as_soon_as_manual_gate_fills() {
    let scope = scope("driver-wakeup");
    let gate = scope.expect_with(
        GateConfig::builder()
            .timeout(Duration::from_secs(2))
            .policy(ReleasePolicy::ManualRelease {
                max_concurrent: None,
            })
            .build(),
        AnyRequest::<usize>::times(2),
    );

    let driver = {
        let gate = gate.clone();
        thread::spawn(move || {
            let started = std::time::Instant::now();
            (gate.wait_for_all_pending_calls(), started.elapsed())
        })
    };
    let workers = spawn_arrivals(&gate, 0..2);

    let (pending, took) = driver.join().unwrap();
    assert_eq!(pending.unwrap(), 2);
    assert!(took < Duration::from_secs(1), "driver woke after {took:?}");
    assert_eq!(gate.state(), GateState::Active);

    assert_eq!(gate.release_all().unwrap(), 2);
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();
}
