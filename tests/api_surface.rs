use std::time::Duration;

use kitchensink_dispatchers::prelude::*;

#[test]
fn prelude_compiles_and_exports_core() {
    let context = create_test_context(&Context::new());
    let provider: DispatcherProvider = context.dispatchers();
    let dispatchers: &TestDispatchers = provider.as_test().expect("test provider installed");
    let scheduler: &TestScheduler = dispatchers.scheduler();
    let io: Dispatcher = provider.get(Role::Io);
    assert_eq!(io.scheduler().as_ref(), Some(scheduler));

    let scope: TestScope = test_scope(&context);
    let deferred: Deferred<u8> = scope.async_with(async {
        yield_now().await;
        delay(Duration::from_millis(1)).await;
        7
    });
    let job: &Job = deferred.job();
    scope.advance_until_idle();
    assert!(job.is_completed());
    assert_eq!(deferred.try_take(), Some(7));

    let config = RunTestConfig::default().with_timeout(Duration::from_secs(1));
    let result: Result<(), DispatchError> = run_test_with(&context, config, |_| async {});
    assert_eq!(result, Ok(()));
    assert!(!Dispatchers::unconfined().is_dispatch_needed());

    let eager = unconfined_test_dispatcher(scheduler);
    let queued = standard_test_dispatcher(scheduler);
    let hopped = launch(&scope.context().with_dispatcher(eager), async move {
        with_dispatcher(queued, async {}).await;
    });
    scope.advance_until_idle();
    assert!(hopped.is_completed());
    assert_eq!(run_test(|_| async {}), Ok(()));
}

#[cfg(feature = "advisory")]
#[test]
fn prelude_exports_advisory_checks() {
    let config = AdvisoryConfig::default();
    let site = CallSite {
        location: None,
        text: "kitchensink_dispatchers::run_test".to_string(),
        kind: CallKind::RunTest {
            path: "kitchensink_dispatchers::run_test".to_string(),
            has_context_arg: false,
        },
    };
    let finding: Option<Finding> = check(&config, &site);
    assert!(finding.is_none());
}
