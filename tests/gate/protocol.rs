use super::{await_waiting, scope, spawn_arrivals};
use request_gate::{
    AnyRequest, ConcurrencyGate, Exact, GateError, GateState, ReleasePolicy, RequestExpectation,
};
use std::thread;

#[test]
fn each_request_gets_back_its_own_expectation() {
    let scope = scope("exact");
    let gate = scope.expect_concurrent(vec![Exact("/a"), Exact("/b"), Exact("/c")]);

    let workers: Vec<_> = ["/c", "/a", "/b"]
        .into_iter()
        .map(|path| {
            let gate = gate.clone();
            thread::spawn(move || {
                let matched = gate.on_request_arrived(&path).unwrap().clone();
                (path, matched)
            })
        })
        .collect();

    for worker in workers {
        let (path, matched) = worker.join().unwrap();
        assert_eq!(matched, Exact(path));
    }
    gate.wait().unwrap();
}

#[test]
fn duplicate_expectations_each_take_one_request() {
    let scope = scope("duplicates");
    let gate = scope.expect_concurrent(vec![Exact("/x"), Exact("/x")]);

    for worker in spawn_arrivals(&gate, ["/x", "/x"]) {
        worker.join().unwrap().unwrap();
    }
    let err = gate.on_request_arrived(&"/x").unwrap_err();
    assert!(matches!(err, GateError::UnexpectedRequest { expected: 2, .. }));
    assert_eq!(gate.received(), 2);
    assert_eq!(gate.wait(), Err(err));
}

#[test]
fn request_after_close_is_unexpected() {
    let scope = scope("after-close");
    let gate = scope.expect_concurrent(AnyRequest::<u8>::times(2));

    for worker in spawn_arrivals(&gate, [1, 2]) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();

    let err = gate.on_request_arrived(&3).unwrap_err();
    assert!(err.is_unexpected_request());
    assert_eq!(gate.state(), GateState::Closed);
    assert_eq!(gate.received(), 2);
    assert_eq!(gate.verify(), Err(err));
}

/// A full manual gate turns extra requests away immediately instead of
/// parking them.
#[test]
fn extra_request_while_full_is_refused() {
    let scope = scope("full");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ManualRelease {
            max_concurrent: None,
        },
        AnyRequest::<u8>::times(2),
    );

    let parked = spawn_arrivals(&gate, [1, 2]);
    await_waiting(&gate, 2);

    let err = gate.on_request_arrived(&3).unwrap_err();
    assert!(matches!(
        err,
        GateError::TooManyConcurrent {
            max_concurrent: 2,
            ..
        }
    ));
    assert_eq!(gate.waiting(), 2);
    assert_eq!(gate.received(), 2);

    gate.release_all().unwrap();
    for worker in parked {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(gate.wait(), Err(err));
}

#[test]
fn refused_request_can_retry_after_release() {
    let scope = scope("retry");
    let gate = scope.expect_concurrent_with(
        ReleasePolicy::ManualRelease {
            max_concurrent: Some(1),
        },
        AnyRequest::<u8>::times(2),
    );

    let first = spawn_arrivals(&gate, [1]);
    await_waiting(&gate, 1);
    assert!(matches!(
        gate.on_request_arrived(&2),
        Err(GateError::TooManyConcurrent { .. })
    ));

    assert_eq!(gate.release(1).unwrap(), 1);
    for worker in first {
        worker.join().unwrap().unwrap();
    }

    let second = spawn_arrivals(&gate, [2]);
    await_waiting(&gate, 1);
    gate.release_all().unwrap();
    for worker in second {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(gate.state(), GateState::Closed);
    // The refusal stays on record.
    assert!(matches!(
        gate.verify(),
        Err(GateError::TooManyConcurrent { .. })
    ));
}

#[test]
fn unmatched_request_does_not_consume_an_expectation() {
    let scope = scope("unmatched");
    let gate = scope.expect_concurrent(vec![Exact(10u32), Exact(20u32)]);

    let err = gate.on_request_arrived(&30).unwrap_err();
    assert!(err.is_unexpected_request());
    assert!(err.to_string().contains("30"));

    for worker in spawn_arrivals(&gate, [20, 10]) {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(gate.state(), GateState::Closed);
    assert_eq!(gate.wait(), Err(err));
}

#[test]
fn boxed_expectations_mix_matchers() {
    let scope = scope("boxed");
    let set: Vec<Box<dyn RequestExpectation<Request = u32>>> =
        vec![Box::new(Exact(7u32)), Box::new(AnyRequest::<u32>::new())];
    let gate: ConcurrencyGate<Box<dyn RequestExpectation<Request = u32>>> =
        scope.expect_concurrent(set);

    for worker in spawn_arrivals(&gate, [99, 7]) {
        worker.join().unwrap().unwrap();
    }
    gate.wait().unwrap();
}

#[test]
fn release_on_failed_gate_reports_the_failure() {
    let scope = scope("release-failed");
    let gate = ConcurrencyGate::new(
        &scope,
        request_gate::GateConfig::builder()
            .timeout(std::time::Duration::from_millis(50))
            .policy(ReleasePolicy::ManualRelease {
                max_concurrent: None,
            })
            .build(),
        scope.tail(),
        AnyRequest::<u8>::times(1),
    );

    assert!(gate.on_request_arrived(&1).unwrap_err().is_timeout());
    assert!(gate.release_all().unwrap_err().is_timeout());
    assert!(gate.release(1).unwrap_err().is_timeout());
}
