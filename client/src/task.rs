use async_std::task::{
    self,
    JoinHandle,
};
use core::{
    future::Future,
    ops::ControlFlow,
    time::Duration,
};
use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

/// Background task owned by whoever spawned it. Dropping the handle
/// cancels the task, so a timer can never outlive its owner.
pub struct ScopedTask {
    name: &'static str,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ScopedTask {
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let handle = task::spawn(async move {
            future.await;
            flag.store(true, Ordering::Release);
        });
        Self {
            name,
            stopped,
            handle: Some(handle),
        }
    }

    /// Runs `tick` once per `period`, first after one full period, until it
    /// breaks or the handle is dropped.
    pub fn every<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let handle = task::spawn(async move {
            loop {
                task::sleep(period).await;
                if flag.load(Ordering::Acquire) {
                    break
                }
                if let ControlFlow::Break(()) = tick().await {
                    break
                }
            }
            flag.store(true, Ordering::Release);
        });
        Self {
            name,
            stopped,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Cancels the task now.
    pub fn cancel(self) {
        drop(self)
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            task::spawn(async move {
                handle.cancel().await;
            });
            log::debug!("cancelled {} task", self.name);
        }
    }
}
