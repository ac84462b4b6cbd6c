use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error::FormError;

/// A one-shot timer tied to its owner's lifetime: dropping it (or replacing
/// it) aborts the pending task, so a stale timer can never fire into a node
/// that has moved on.
#[derive(Debug)]
pub struct ScopedTimer {
    token: u64,
    handle: JoinHandle<()>,
}

impl ScopedTimer {
    pub fn spawn<F>(delay: Duration, token: u64, on_fire: F) -> Result<Self, FormError>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| FormError::NoRuntime)?;
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire();
        });
        Ok(Self { token, handle })
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
