use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use kitchensink_dispatchers::dispatchers::{MAIN_THREAD_NAME, is_main_thread};
use kitchensink_dispatchers::prelude::*;

const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

async fn join_within(job: &Job) {
    tokio::time::timeout(JOIN_TIMEOUT, job.join())
        .await
        .expect("job should complete on the production dispatcher");
}

#[tokio::test(flavor = "current_thread")]
async fn tokio_test_sees_production_singletons() {
    let dispatchers = current_dispatchers();
    assert!(!dispatchers.is_test());
    for role in Role::ALL {
        assert_eq!(dispatchers.get(role), Dispatchers::get(role));
        assert!(!dispatchers.get(role).is_test());
    }
    assert_eq!(dispatchers.io(), Dispatchers::io());
}

#[test]
fn plain_threads_see_production_singletons() {
    let io = thread::spawn(|| current_dispatchers().io())
        .join()
        .expect("thread should join");
    assert_eq!(io, Dispatchers::io());
}

#[test]
fn production_provider_rejects_overrides() {
    let dispatchers = current_dispatchers();
    assert_eq!(
        dispatchers.set(Role::Io, unconfined_test_dispatcher),
        Err(DispatchError::NotTestDispatchers)
    );
    assert_eq!(
        dispatchers.set_all(standard_test_dispatcher),
        Err(DispatchError::NotTestDispatchers)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn io_work_runs_off_the_calling_thread() {
    let caller = thread::current().id();
    let observed = Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&observed);

    let job = launch(&Context::new().with_dispatcher(Dispatchers::io()), async move {
        assert!(!current_dispatchers().is_test());
        *sink.lock().expect("observer lock") = Some(thread::current().id());
    });
    join_within(&job).await;

    let worker = observed.lock().expect("observer lock").expect("job should record its thread");
    assert_ne!(worker, caller);
}

#[tokio::test(flavor = "current_thread")]
async fn main_work_runs_on_the_main_thread() {
    let on_main = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&on_main);

    let job = launch(&Context::new().with_dispatcher(Dispatchers::main()), async move {
        let name_matches = thread::current().name() == Some(MAIN_THREAD_NAME);
        flag.store(name_matches && is_main_thread(), Ordering::SeqCst);
    });
    join_within(&job).await;

    assert!(on_main.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "current_thread")]
async fn with_dispatcher_hops_to_io_and_back() {
    let outer = launch(&Context::new(), async {
        let value = with_dispatcher(Dispatchers::io(), async {
            delay(Duration::from_millis(5)).await;
            21 * 2
        })
        .await;
        assert_eq!(value, 42);
    });
    join_within(&outer).await;
    assert!(!outer.is_cancelled());
}

#[tokio::test(flavor = "current_thread")]
async fn production_delay_uses_wall_clock() {
    let started = std::time::Instant::now();
    delay(Duration::from_millis(20)).await;
    assert!(started.elapsed() >= Duration::from_millis(20));
}
