//! Shared server state: the kernel handle, stream pacing, and the shutdown
//! signal every background loop watches.

use std::time::Duration;

use hive_kernel::Kernel;
use tokio::sync::watch;

#[derive(Clone)]
pub(crate) struct AppState {
    kernel: Kernel,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(kernel: Kernel, poll_interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            kernel,
            poll_interval,
            shutdown,
        }
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> (AppState, watch::Sender<bool>) {
    let kernel = Kernel::open_with_db(hive_store::Db::open_sqlite_memory().unwrap()).unwrap();
    let (tx, rx) = watch::channel(false);
    (
        AppState::new(kernel, Duration::from_millis(10), rx),
        tx,
    )
}
