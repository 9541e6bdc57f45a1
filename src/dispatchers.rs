//! Production dispatchers backed by tokio.
//!
//! Every accessor returns the same process-wide instance:
//! - [`Dispatchers::default`] polls work on the workers of a shared multi-thread runtime.
//! - [`Dispatchers::io`] polls work on that runtime's blocking pool.
//! - [`Dispatchers::main`] and [`Dispatchers::main_immediate`] confine work to one
//!   dedicated event-loop thread named [`MAIN_THREAD_NAME`].
//! - [`Dispatchers::unconfined`] runs work inline on the submitting thread.

use std::cell::Cell;
use std::sync::OnceLock;
use std::thread;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tracing::{trace, warn};

use crate::dispatcher::{Dispatch, Dispatcher, Runnable};
use crate::role::Role;

/// Name of the thread that runs main-confined work.
pub const MAIN_THREAD_NAME: &str = "kitchensink-main";

const WORKER_THREAD_NAME: &str = "kitchensink-default";

thread_local! {
    static ON_MAIN_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Shared tokio runtime behind the CPU and IO roles and production timers.
pub(crate) fn shared_runtime() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .expect("failed to build the shared dispatcher runtime")
    })
}

fn main_loop() -> &'static UnboundedSender<Runnable> {
    static MAIN_LOOP: OnceLock<UnboundedSender<Runnable>> = OnceLock::new();
    MAIN_LOOP.get_or_init(|| {
        let (sender, mut receiver) = unbounded_channel::<Runnable>();
        thread::Builder::new()
            .name(MAIN_THREAD_NAME.to_string())
            .spawn(move || {
                ON_MAIN_THREAD.with(|flag| flag.set(true));
                let _runtime = shared_runtime().enter();
                while let Some(runnable) = receiver.blocking_recv() {
                    runnable();
                }
            })
            .expect("failed to spawn the main dispatcher thread");
        sender
    })
}

/// Whether the calling thread is the main dispatcher thread.
pub fn is_main_thread() -> bool {
    ON_MAIN_THREAD.with(Cell::get)
}

struct DefaultDispatcher;

impl Dispatch for DefaultDispatcher {
    fn name(&self) -> &str {
        "Dispatchers.Default"
    }

    fn dispatch(&self, runnable: Runnable) {
        shared_runtime().spawn(async move { runnable() });
    }
}

struct IoDispatcher;

impl Dispatch for IoDispatcher {
    fn name(&self) -> &str {
        "Dispatchers.IO"
    }

    fn dispatch(&self, runnable: Runnable) {
        shared_runtime().spawn_blocking(runnable);
    }
}

struct MainDispatcher {
    immediate: bool,
}

impl Dispatch for MainDispatcher {
    fn name(&self) -> &str {
        if self.immediate {
            "Dispatchers.Main.immediate"
        } else {
            "Dispatchers.Main"
        }
    }

    fn is_dispatch_needed(&self) -> bool {
        !self.immediate || !is_main_thread()
    }

    fn dispatch(&self, runnable: Runnable) {
        if main_loop().send(runnable).is_err() {
            warn!("main dispatcher loop has stopped; work dropped");
        }
    }
}

struct UnconfinedDispatcher;

impl Dispatch for UnconfinedDispatcher {
    fn name(&self) -> &str {
        "Dispatchers.Unconfined"
    }

    fn is_dispatch_needed(&self) -> bool {
        false
    }

    fn dispatch(&self, runnable: Runnable) {
        runnable();
    }
}

/// Accessors for the process-wide production dispatchers.
#[derive(Debug, Clone, Copy)]
pub struct Dispatchers;

impl Dispatchers {
    /// CPU-bound work.
    pub fn default() -> Dispatcher {
        static DEFAULT: OnceLock<Dispatcher> = OnceLock::new();
        DEFAULT.get_or_init(|| Dispatcher::new(DefaultDispatcher)).clone()
    }

    /// Disk and network IO.
    pub fn io() -> Dispatcher {
        static IO: OnceLock<Dispatcher> = OnceLock::new();
        IO.get_or_init(|| Dispatcher::new(IoDispatcher)).clone()
    }

    /// Main-thread work, always queued behind the current loop turn.
    pub fn main() -> Dispatcher {
        static MAIN: OnceLock<Dispatcher> = OnceLock::new();
        MAIN.get_or_init(|| Dispatcher::new(MainDispatcher { immediate: false }))
            .clone()
    }

    /// Main-thread work, run inline when already on the main thread.
    pub fn main_immediate() -> Dispatcher {
        static MAIN_IMMEDIATE: OnceLock<Dispatcher> = OnceLock::new();
        MAIN_IMMEDIATE
            .get_or_init(|| Dispatcher::new(MainDispatcher { immediate: true }))
            .clone()
    }

    /// Work not confined to any thread.
    pub fn unconfined() -> Dispatcher {
        static UNCONFINED: OnceLock<Dispatcher> = OnceLock::new();
        UNCONFINED
            .get_or_init(|| Dispatcher::new(UnconfinedDispatcher))
            .clone()
    }

    /// Production dispatcher for `role`.
    pub fn get(role: Role) -> Dispatcher {
        trace!(%role, "production dispatcher requested");
        match role {
            Role::Cpu => Self::default(),
            Role::Io => Self::io(),
            Role::Main => Self::main(),
            Role::MainImmediate => Self::main_immediate(),
            Role::Unconfined => Self::unconfined(),
        }
    }
}
