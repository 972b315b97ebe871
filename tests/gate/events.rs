use super::{scope, spawn_arrivals};
use request_gate::{AnyRequest, Exact, GateConfig, GateError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn listeners_see_the_whole_phase() {
    let arrived = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    let config = {
        let (a, r, c, f) = (
            Arc::clone(&arrived),
            Arc::clone(&released),
            Arc::clone(&completed),
            Arc::clone(&failed),
        );
        GateConfig::builder()
            .name("observed")
            .on_request_arrived(move |_, _| {
                a.fetch_add(1, Ordering::SeqCst);
            })
            .on_requests_released(move |n| {
                r.fetch_add(n, Ordering::SeqCst);
            })
            .on_phase_completed(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_phase_failed(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    };

    let scope = scope("events");
    let gate = scope.expect_with(config, AnyRequest::<usize>::times(4));
    assert_eq!(gate.name(), "observed");

    for worker in spawn_arrivals(&gate, 0..4) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();

    assert_eq!(arrived.load(Ordering::SeqCst), 4);
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
}

#[test]
fn arrival_events_count_down_outstanding_requests() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);

    let scope = scope("countdown");
    let gate = scope.expect_with(
        GateConfig::builder()
            .on_request_arrived(move |waiting, outstanding| {
                recorded.lock().unwrap().push((waiting, outstanding));
            })
            .build(),
        AnyRequest::<usize>::times(3),
    );

    for worker in spawn_arrivals(&gate, 0..3) {
        worker.join().unwrap().unwrap();
    }

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![(1, 2), (2, 1), (3, 0)]);
}

#[test]
fn unexpected_request_is_reported_with_its_rendering() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);

    let scope = scope("unexpected");
    let gate = scope.expect_with(
        GateConfig::builder()
            .on_unexpected_request(move |request| {
                recorded.lock().unwrap().push(request.to_string());
            })
            .build(),
        vec![Exact("/a")],
    );

    assert!(gate.on_request_arrived(&"/nope").is_err());
    assert_eq!(*requests.lock().unwrap(), vec!["\"/nope\"".to_string()]);
}

#[test]
fn timeout_is_reported_once() {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&failures);

    let scope = scope("timeout-event");
    let gate = scope.expect_with(
        GateConfig::builder()
            .timeout(Duration::from_millis(100))
            .on_phase_failed(move |error: &GateError| {
                recorded.lock().unwrap().push(error.clone());
            })
            .build(),
        AnyRequest::<usize>::times(3),
    );

    let outcomes: Vec<_> = spawn_arrivals(&gate, 0..2)
        .into_iter()
        .map(|w| w.join().unwrap())
        .collect();
    assert!(outcomes.iter().all(|o| o.as_ref().is_err_and(GateError::is_timeout)));
    assert!(gate.wait().is_err());

    // Give the watchdog time to observe the failed phase as well.
    std::thread::sleep(Duration::from_millis(200));
    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is_timeout());
}

#[test]
fn panicking_listener_does_not_wedge_the_gate() {
    let scope = scope("panicky");
    let gate = scope.expect_with(
        GateConfig::builder()
            .on_request_arrived(|_, _| panic!("listener bug"))
            .build(),
        AnyRequest::<usize>::times(2),
    );

    for worker in spawn_arrivals(&gate, 0..2) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();
}
