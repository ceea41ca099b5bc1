//! Graceful shutdown
//!
//! Closing a runtime must fail, never drop, every foreign request still
//! awaiting a response: callers observe a definite `ServiceClosed` within a
//! bounded time instead of hanging.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use selkie_core::SelkieConfig;
use selkie_runtime::{ExceptionHandler, Reply, Request, Response, Runtime};

fn test_runtime(workers: usize) -> Arc<Runtime> {
    let mut config = SelkieConfig::default();
    config.scheduler.worker_threads_count = workers;
    Runtime::new(config).unwrap()
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// N callers blocked on a runtime that closes get exactly N
/// `ServiceClosed` errors, with zero hangs.
#[test]
fn test_close_fails_every_pending_call() {
    let runtime = test_runtime(2);
    let service = runtime.create_mailbox().unwrap();

    let callers: usize = 8;
    let stashed: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));
    let (result_tx, result_rx) = crossbeam_channel::unbounded();

    for _ in 0..callers {
        let service = service.clone();
        let stashed = stashed.clone();
        let result_tx = result_tx.clone();
        std::thread::spawn(move || {
            let result = service.call(Request::new(move |reply| {
                // Never answered: the reply is parked in actor state.
                stashed.lock().unwrap().push(reply);
                Ok(())
            }));
            result_tx.send(result).unwrap();
        });
    }

    // Every request is being held before the close begins.
    wait_until(Duration::from_secs(10), || {
        stashed.lock().unwrap().len() == callers
    });

    runtime.close();

    let mut closed_errors = 0;
    for _ in 0..callers {
        let result = result_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("a caller hung through close");
        match result {
            Err(error) if error.is_service_closed() => closed_errors += 1,
            other => panic!("expected ServiceClosed, got {:?}", other.map(|_| "value")),
        }
    }
    assert_eq!(closed_errors, callers);
}

/// A cross-runtime send whose target runtime closes delivers the failure
/// into the source's exception-handler chain, in the context of the
/// original send.
#[test]
fn test_close_fails_cross_runtime_send_into_source_handler() {
    let source_runtime = test_runtime(2);
    let target_runtime = test_runtime(2);

    let source = source_runtime.create_mailbox().unwrap();
    let target = target_runtime.create_mailbox().unwrap();

    let stashed: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));
    let (error_tx, error_rx) = crossbeam_channel::bounded(1);

    let stash_for_target = stashed.clone();
    let target_for_request = target.clone();
    let call_thread = std::thread::spawn(move || {
        source.call(Request::new(move |reply| {
            let source_mb = reply.mailbox().clone();

            // The handler completes this call once the downstream failure
            // arrives.
            let error_tx = error_tx.clone();
            let handler: ExceptionHandler = Arc::new(move |error| {
                error_tx.send(error.to_string()).unwrap();
                Ok(Box::new(()) as Response)
            });
            let _previous = source_mb.set_exception_handler(Some(handler))?;

            target_for_request.send(
                &source_mb,
                Request::new(move |inner| {
                    stash_for_target.lock().unwrap().push(inner);
                    Ok(())
                }),
                Box::new(|_value| Ok(())),
            )?;
            Ok(())
        }))
    });

    // The call completes via the handler's synthesized response once the
    // target runtime is closed under it.
    wait_until(Duration::from_secs(10), || {
        stashed.lock().unwrap().len() == 1
    });
    target_runtime.close();

    let outcome = call_thread.join().unwrap();
    outcome.expect("handler should have completed the call");
    let observed = error_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("failure never reached the source handler");
    assert!(observed.contains("service closed"));

    source_runtime.close();
}

/// Close drains quickly even with messages still queued, and a second
/// close is a no-op.
#[test]
fn test_close_with_queued_backlog() {
    let runtime = test_runtime(1);
    let mailbox = runtime.create_mailbox().unwrap();

    // Queue a backlog; some will run, the rest are dropped at close.
    for _ in 0..1000 {
        mailbox.signal(Request::sync(|| Ok(())));
    }

    let started = Instant::now();
    runtime.close();
    runtime.close();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "close did not complete in bounded time"
    );
    assert!(runtime.is_closing());
}
