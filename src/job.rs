//! Units of work launched onto dispatchers.
//!
//! A launched future becomes a [`Job`]. The job's task is polled wherever its dispatcher
//! runs work: inline for eager dispatchers, on a queue drained by the scheduler for queued
//! test dispatchers, on tokio for production ones. While polled, the task's [`Context`] is
//! the [`current`](crate::context::current) context, so `current_dispatchers()` and
//! [`delay`] resolve against it.
//!
//! Jobs form a tree. A job completes once its own future has finished and every child has
//! completed. Cancelling a job cancels its children. A panicking future cancels its job,
//! and the panic payload travels to the root of the tree, where the test harness re-raises
//! it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::task::{self, Poll, Waker};
use std::time::Duration;

use futures::task::{ArcWake, AtomicWaker, waker_ref};
use tracing::trace;

use crate::context::{self, Context};
use crate::dispatcher::Dispatcher;
use crate::dispatchers::{Dispatchers, shared_runtime};
use crate::sync::lock;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Panic payload captured from a failed unit of work.
pub(crate) type Panic = Box<dyn Any + Send + 'static>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct JobState {
    body_done: bool,
    completed: bool,
    cancelled: bool,
    active_children: usize,
    children: Vec<Weak<JobInner>>,
    failure: Option<Panic>,
    waiters: Vec<Waker>,
}

struct JobInner {
    id: u64,
    parent: OnceLock<Job>,
    // Owned until the task finishes or is cancelled, so a parked future stays alive even
    // when nothing else holds its waker.
    task: Mutex<Option<Arc<Task>>>,
    state: Mutex<JobState>,
}

/// Handle to a launched unit of work.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    /// Create a job, attached to `parent` when the parent still accepts children. A job
    /// whose parent is no longer active starts out cancelled.
    pub(crate) fn new(parent: Option<&Job>) -> Job {
        let job = Job {
            inner: Arc::new(JobInner {
                id: NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed),
                parent: OnceLock::new(),
                task: Mutex::new(None),
                state: Mutex::new(JobState::default()),
            }),
        };
        if let Some(parent) = parent {
            if parent.attach_child(&job) {
                let _ = job.inner.parent.set(parent.clone());
            } else {
                lock(&job.inner.state).cancelled = true;
            }
        }
        job
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Neither completed nor cancelled.
    pub fn is_active(&self) -> bool {
        let state = lock(&self.inner.state);
        !state.completed && !state.cancelled
    }

    /// The job's future and all of its children have finished.
    pub fn is_completed(&self) -> bool {
        lock(&self.inner.state).completed
    }

    /// The job was cancelled or failed.
    pub fn is_cancelled(&self) -> bool {
        lock(&self.inner.state).cancelled
    }

    /// Cancel the job and every child. A future that is not running is dropped right away;
    /// one that is running is dropped when its current poll returns.
    pub fn cancel(&self) {
        let children: Vec<Arc<JobInner>> = {
            let mut state = lock(&self.inner.state);
            if state.completed || state.cancelled {
                return;
            }
            state.cancelled = true;
            state.children.iter().filter_map(Weak::upgrade).collect()
        };
        trace!(job = self.id(), children = children.len(), "job cancelled");
        for child in children {
            Job { inner: child }.cancel();
        }
        let task = lock(&self.inner.task).take();
        match task {
            Some(task) => task.cancel(),
            // Scope jobs, jobs that never started and finished jobs hold no task.
            None => self.body_finished(None),
        }
    }

    /// Wait for completion, whether normal or through cancellation.
    pub fn join(&self) -> Join {
        Join { job: self.clone() }
    }

    pub(crate) fn take_failure(&self) -> Option<Panic> {
        lock(&self.inner.state).failure.take()
    }

    fn attach_child(&self, child: &Job) -> bool {
        let mut state = lock(&self.inner.state);
        if state.completed || state.cancelled {
            return false;
        }
        state.children.retain(|child| child.strong_count() > 0);
        state.children.push(Arc::downgrade(&child.inner));
        state.active_children += 1;
        true
    }

    fn body_finished(&self, failure: Option<Panic>) {
        if let Some(payload) = failure {
            self.fail(payload);
        }
        lock(&self.inner.state).body_done = true;
        self.try_complete();
    }

    fn fail(&self, payload: Panic) {
        match self.inner.parent.get() {
            Some(parent) => parent.fail(payload),
            None => {
                let mut state = lock(&self.inner.state);
                if state.failure.is_none() {
                    state.failure = Some(payload);
                }
            }
        }
        self.cancel();
    }

    fn try_complete(&self) {
        let waiters = {
            let mut state = lock(&self.inner.state);
            if state.completed || !state.body_done || state.active_children > 0 {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.waiters)
        };
        trace!(job = self.id(), "job completed");
        for waiter in waiters {
            waiter.wake();
        }
        if let Some(parent) = self.inner.parent.get() {
            parent.child_completed();
        }
    }

    fn child_completed(&self) {
        {
            let mut state = lock(&self.inner.state);
            state.active_children = state.active_children.saturating_sub(1);
        }
        self.try_complete();
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("completed", &state.completed)
            .field("cancelled", &state.cancelled)
            .field("active_children", &state.active_children)
            .finish()
    }
}

/// Future returned by [`Job::join`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Join {
    job: Job,
}

impl Future for Join {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<()> {
        let mut state = lock(&self.job.inner.state);
        if state.completed {
            return Poll::Ready(());
        }
        if !state.waiters.iter().any(|waiter| waiter.will_wake(cx.waker())) {
            state.waiters.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Scheduled,
    Running,
    Notified,
    Done,
}

struct TaskSlot {
    run: RunState,
    future: Option<BoxFuture>,
}

struct Task {
    job: Job,
    context: Context,
    dispatcher: Dispatcher,
    slot: Mutex<TaskSlot>,
}

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.schedule();
    }
}

impl Task {
    fn schedule(self: &Arc<Self>) {
        {
            let mut slot = lock(&self.slot);
            match slot.run {
                RunState::Idle => slot.run = RunState::Scheduled,
                RunState::Running => {
                    slot.run = RunState::Notified;
                    return;
                }
                RunState::Scheduled | RunState::Notified | RunState::Done => return,
            }
        }
        if self.dispatcher.is_dispatch_needed() {
            self.submit();
        } else {
            self.run();
        }
    }

    fn submit(self: &Arc<Self>) {
        let task = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || task.run()));
    }

    fn run(self: &Arc<Self>) {
        loop {
            let mut future = {
                let mut slot = lock(&self.slot);
                if slot.run != RunState::Scheduled {
                    return;
                }
                match slot.future.take() {
                    Some(future) => {
                        slot.run = RunState::Running;
                        future
                    }
                    None => {
                        slot.run = RunState::Done;
                        return;
                    }
                }
            };

            if self.job.is_cancelled() {
                self.finish(future, None);
                return;
            }

            let outcome = {
                let _current = context::enter(self.context.clone());
                let waker = waker_ref(self);
                let mut cx = task::Context::from_waker(&waker);
                catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
            };

            match outcome {
                Ok(Poll::Pending) if !self.job.is_cancelled() => {
                    let notified = {
                        let mut slot = lock(&self.slot);
                        let notified = slot.run == RunState::Notified;
                        slot.run = if notified {
                            RunState::Scheduled
                        } else {
                            RunState::Idle
                        };
                        slot.future = Some(future);
                        notified
                    };
                    if !notified {
                        return;
                    }
                    if self.dispatcher.is_dispatch_needed() {
                        self.submit();
                        return;
                    }
                }
                Ok(_) => {
                    self.finish(future, None);
                    return;
                }
                Err(payload) => {
                    self.finish(future, Some(payload));
                    return;
                }
            }
        }
    }

    fn finish(&self, future: BoxFuture, failure: Option<Panic>) {
        lock(&self.slot).run = RunState::Done;
        drop(future);
        let released = lock(&self.job.inner.task).take();
        self.job.body_finished(failure);
        drop(released);
    }

    fn cancel(&self) {
        let future = {
            let mut slot = lock(&self.slot);
            match slot.run {
                RunState::Idle | RunState::Scheduled => {
                    slot.run = RunState::Done;
                    slot.future.take()
                }
                // A running poll observes the cancellation when it returns.
                RunState::Running | RunState::Notified | RunState::Done => return,
            }
        };
        drop(future);
        self.job.body_finished(None);
    }
}

/// Start `future` as the body of `job` on `dispatcher`.
pub(crate) fn start(context: &Context, dispatcher: Dispatcher, job: Job, future: BoxFuture) {
    if job.is_cancelled() {
        job.body_finished(None);
        return;
    }
    let task = Arc::new(Task {
        job: job.clone(),
        context: context.with_dispatcher(dispatcher.clone()).with_job(job.clone()),
        dispatcher,
        slot: Mutex::new(TaskSlot {
            run: RunState::Idle,
            future: Some(future),
        }),
    });
    *lock(&job.inner.task) = Some(Arc::clone(&task));
    trace!(job = job.id(), dispatcher = task.dispatcher.name(), "job launched");
    task.schedule();
}

/// Launch `future` on the context's dispatcher ([`Dispatchers::default`] when the context
/// names none), as a child of the context's job.
pub fn launch<F>(context: &Context, future: F) -> Job
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = context
        .dispatcher()
        .cloned()
        .unwrap_or_else(Dispatchers::default);
    let job = Job::new(context.job());
    start(context, dispatcher, job.clone(), Box::pin(future));
    job
}

/// Launch `future` like [`launch`] and keep its output.
pub fn async_with<F>(context: &Context, future: F) -> Deferred<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    let job = launch(context, async move {
        let value = future.await;
        *lock(&sink) = Some(value);
    });
    Deferred { job, slot }
}

/// Job that produces a value.
pub struct Deferred<T> {
    job: Job,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Deferred<T> {
    /// Underlying job.
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// See [`Job::is_completed`].
    pub fn is_completed(&self) -> bool {
        self.job.is_completed()
    }

    /// Take the output if the future has produced it.
    pub fn try_take(&self) -> Option<T> {
        lock(&self.slot).take()
    }

    /// Wait for completion and take the output; `None` when the job was cancelled or failed.
    pub async fn await_result(self) -> Option<T> {
        self.job.join().await;
        self.try_take()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("job", &self.job).finish()
    }
}

/// Run `future` on `dispatcher` as a child of the calling job and resume with its output.
///
/// # Panics
///
/// Re-raises a panic from `future` when no enclosing job took it over, and panics when the
/// child was cancelled while the caller was not.
pub async fn with_dispatcher<F>(dispatcher: Dispatcher, future: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let context = context::current().with_dispatcher(dispatcher);
    let deferred = async_with(&context, future);
    let child = deferred.job().clone();
    if let Some(value) = deferred.await_result().await {
        return value;
    }
    if let Some(payload) = child.take_failure() {
        resume_unwind(payload);
    }
    if context.job().is_some_and(Job::is_cancelled) {
        // The caller is being torn down; its task drops this future after this poll.
        return std::future::pending().await;
    }
    panic!("with_dispatcher: child job {} was cancelled", child.id());
}

struct VirtualWait {
    fired: AtomicBool,
    waker: AtomicWaker,
}

enum DelayState {
    Init,
    Virtual(Arc<VirtualWait>),
    Real(Pin<Box<tokio::time::Sleep>>),
    Done,
}

/// Future returned by [`delay`].
#[must_use = "futures do nothing unless awaited"]
pub struct Delay {
    duration: Duration,
    state: DelayState,
}

/// Timed wait. Inside a job bound to a test scheduler the wait is registered on that
/// scheduler's virtual clock; elsewhere it is a tokio timer.
pub fn delay(duration: Duration) -> Delay {
    Delay {
        duration,
        state: DelayState::Init,
    }
}

fn real_sleep(duration: Duration) -> tokio::time::Sleep {
    if tokio::runtime::Handle::try_current().is_ok() {
        return tokio::time::sleep(duration);
    }
    let _runtime = shared_runtime().enter();
    tokio::time::sleep(duration)
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<()> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                DelayState::Init => {
                    if this.duration.is_zero() {
                        this.state = DelayState::Done;
                        continue;
                    }
                    this.state = match context::current().time_source() {
                        Some(scheduler) => {
                            let wait = Arc::new(VirtualWait {
                                fired: AtomicBool::new(false),
                                waker: AtomicWaker::new(),
                            });
                            wait.waker.register(cx.waker());
                            let fire = Arc::clone(&wait);
                            scheduler.register_event(
                                this.duration,
                                Box::new(move || {
                                    fire.fired.store(true, Ordering::Release);
                                    fire.waker.wake();
                                }),
                            );
                            DelayState::Virtual(wait)
                        }
                        None => DelayState::Real(Box::pin(real_sleep(this.duration))),
                    };
                }
                DelayState::Virtual(wait) => {
                    wait.waker.register(cx.waker());
                    if !wait.fired.load(Ordering::Acquire) {
                        return Poll::Pending;
                    }
                    this.state = DelayState::Done;
                }
                DelayState::Real(sleep) => {
                    if sleep.as_mut().poll(cx).is_pending() {
                        return Poll::Pending;
                    }
                    this.state = DelayState::Done;
                }
                DelayState::Done => return Poll::Ready(()),
            }
        }
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            DelayState::Init => "init",
            DelayState::Virtual(_) => "virtual",
            DelayState::Real(_) => "real",
            DelayState::Done => "done",
        };
        f.debug_struct("Delay")
            .field("duration", &self.duration)
            .field("state", &state)
            .finish()
    }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

/// Give other ready work on the same dispatcher a chance to run.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::scheduler::TestScheduler;
    use crate::test_dispatcher::{standard_test_dispatcher, unconfined_test_dispatcher};

    fn queued() -> (TestScheduler, Context) {
        let scheduler = TestScheduler::new();
        let context = Context::new().with_dispatcher(standard_test_dispatcher(&scheduler));
        (scheduler, context)
    }

    #[test]
    fn queued_job_runs_on_drain() {
        let (scheduler, context) = queued();
        let job = launch(&context, async {});

        assert!(job.is_active());
        assert!(!job.is_completed());
        scheduler.run_current();
        assert!(job.is_completed());
        assert!(!job.is_cancelled());
    }

    #[test]
    fn parked_job_without_waker_stays_active() {
        let (scheduler, context) = queued();
        let job = launch(&context, std::future::pending::<()>());

        scheduler.run_current();
        assert!(job.is_active());
        assert!(!job.is_cancelled());
        assert!(!job.is_completed());

        job.cancel();
        assert!(job.is_cancelled());
        assert!(job.is_completed());
    }

    #[test]
    fn eager_job_completes_on_launch() {
        let scheduler = TestScheduler::new();
        let context = Context::new().with_dispatcher(unconfined_test_dispatcher(&scheduler));

        let job = launch(&context, async {});
        assert!(job.is_completed());
        assert!(scheduler.is_idle());
    }

    #[test]
    fn parent_waits_for_children() {
        let (scheduler, context) = queued();
        let parent = Job::new(None);
        let scoped = context.with_job(parent.clone());
        let child = launch(&scoped, async {});

        parent.body_finished(None);
        assert!(!parent.is_completed());

        scheduler.run_current();
        assert!(child.is_completed());
        assert!(parent.is_completed());
    }

    #[test]
    fn cancel_reaches_children_and_drops_idle_futures() {
        let (scheduler, context) = queued();
        let parent = Job::new(None);
        let scoped = context.with_job(parent.clone());
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);
        let child = launch(&scoped, async move {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
        });
        scheduler.run_current();
        assert_eq!(polled.load(Ordering::SeqCst), 1);

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.is_completed());
        assert!(parent.is_completed());
    }

    #[test]
    fn launching_into_a_cancelled_parent_never_runs() {
        let (scheduler, context) = queued();
        let parent = Job::new(None);
        parent.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let child = launch(&context.with_job(parent), async move {
            flag.store(true, Ordering::SeqCst);
        });

        scheduler.run_current();
        assert!(child.is_cancelled());
        assert!(child.is_completed());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn panic_moves_to_root_and_cancels_siblings() {
        let (scheduler, context) = queued();
        let root = Job::new(None);
        let scoped = context.with_job(root.clone());
        let sibling = launch(&scoped, std::future::pending::<()>());
        let failing = launch(&scoped, async { panic!("boom") });

        scheduler.run_current();
        assert!(failing.is_cancelled());
        assert!(sibling.is_cancelled());
        assert!(root.is_cancelled());
        let payload = root.take_failure().expect("root should hold the panic");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
    }

    #[test]
    fn virtual_delay_follows_the_clock() {
        let (scheduler, context) = queued();
        let job = launch(&context, delay(Duration::from_secs(10)));

        scheduler.run_current();
        assert!(!job.is_completed());
        scheduler.advance_time_by(Duration::from_secs(9));
        assert!(!job.is_completed());
        scheduler.advance_time_by(Duration::from_secs(1));
        scheduler.run_current();
        assert!(job.is_completed());
    }

    #[test]
    fn deferred_keeps_output_and_with_dispatcher_switches() {
        let (scheduler, context) = queued();
        let io = standard_test_dispatcher(&scheduler);
        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let target = io.clone();
        let deferred = async_with(&context, async move {
            let name = with_dispatcher(target, async {
                context::current()
                    .dispatcher()
                    .map(|dispatcher| dispatcher.name().to_string())
            })
            .await;
            *lock(&sink) = name;
            21 * 2
        });

        scheduler.advance_until_idle();
        assert_eq!(deferred.try_take(), Some(42));
        assert_eq!(
            lock(&observed).as_deref(),
            Some("StandardTestDispatcher")
        );
    }

    #[test]
    fn yield_now_lets_queued_work_interleave() {
        let (scheduler, context) = queued();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&log);
        let second = Arc::clone(&log);
        launch(&context, async move {
            lock(&first).push("a1");
            yield_now().await;
            lock(&first).push("a2");
        });
        launch(&context, async move {
            lock(&second).push("b1");
        });

        scheduler.run_current();
        assert_eq!(*lock(&log), vec!["a1", "b1", "a2"]);
    }

    #[test]
    fn join_resolves_when_job_completes() {
        let (scheduler, context) = queued();
        let inner = launch(&context, async {});
        let waiting = inner.clone();
        let outer = launch(&context, async move { waiting.join().await });

        scheduler.run_current();
        assert!(inner.is_completed());
        assert!(outer.is_completed());
    }
}
