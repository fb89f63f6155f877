//! Async bridging and the thread-local "current run".
//!
//! [`Executor::execute_async`] captures the run as an `Arc` snapshot before
//! leaving the caller's task and rebinds it on the blocking worker, so two
//! concurrent async calls never observe each other's run.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::step::{RunContext, Step, StepResult};
use super::Executor;

thread_local! {
    static CURRENT_RUN: RefCell<Option<Arc<RunContext>>> = const { RefCell::new(None) };
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no run passed and none bound on the calling thread")]
    NoActiveRun,

    #[error("blocking worker failed: {0}")]
    Join(String),
}

/// Restores the previous binding on drop. Not `Send`: a binding belongs to
/// the thread that created it.
#[must_use = "the run is unbound as soon as the binding is dropped"]
pub struct RunBinding {
    previous: Option<Arc<RunContext>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for RunBinding {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_RUN.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Bind `run` as the current run of this thread until the guard drops.
pub fn bind_run(run: Arc<RunContext>) -> RunBinding {
    let previous = CURRENT_RUN.with(|slot| slot.borrow_mut().replace(run));
    RunBinding {
        previous,
        _not_send: PhantomData,
    }
}

pub fn current_run() -> Option<Arc<RunContext>> {
    CURRENT_RUN.with(|slot| slot.borrow().clone())
}

impl Executor {
    /// Run the synchronous pipeline on tokio's blocking pool.
    ///
    /// `run` defaults to the run bound on the calling thread, resolved when
    /// this method is called rather than when the future is first polled.
    pub fn execute_async(
        self: &Arc<Self>,
        step: Step,
        run: Option<Arc<RunContext>>,
    ) -> impl Future<Output = Result<StepResult, BridgeError>> + Send + 'static {
        let snapshot = run.or_else(current_run);
        let executor = Arc::clone(self);
        async move {
            let run = snapshot.ok_or(BridgeError::NoActiveRun)?;
            tokio::task::spawn_blocking(move || {
                let _binding = bind_run(Arc::clone(&run));
                executor.execute(&step, &run)
            })
            .await
            .map_err(|err| BridgeError::Join(err.to_string()))
        }
    }
}
