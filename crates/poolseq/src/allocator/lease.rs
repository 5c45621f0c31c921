use crate::{DistributedLock, LeaseToken};
use std::sync::Arc;
use tracing::{error, warn};

/// A granted lease on the allocation lock.
///
/// Released with [`Self::release`]. If the future holding it is dropped
/// first (a caller-side timeout, `select!`, or an aborted task), the release
/// is handed to the current Tokio runtime instead of waiting out the lease.
pub(super) struct LeaseGuard<L: DistributedLock + 'static> {
    lock: Arc<L>,
    name: String,
    token: Option<LeaseToken>,
}

impl<L: DistributedLock + 'static> LeaseGuard<L> {
    pub(super) fn new(lock: Arc<L>, name: String, token: LeaseToken) -> Self {
        Self {
            lock,
            name,
            token: Some(token),
        }
    }

    pub(super) async fn release(mut self) {
        if let Some(token) = self.token {
            release(&*self.lock, &self.name, token).await;
            self.token = None;
        }
    }
}

impl<L: DistributedLock + 'static> Drop for LeaseGuard<L> {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    lock = %self.name,
                    %token,
                    "allocation dropped while holding the lock; releasing in the background"
                );
                let lock = Arc::clone(&self.lock);
                let name = core::mem::take(&mut self.name);
                runtime.spawn(async move { release(&*lock, &name, token).await });
            }
            Err(_) => error!(
                lock = %self.name,
                %token,
                "allocation dropped outside a runtime; lease will expire on its own"
            ),
        }
    }
}

async fn release<L: DistributedLock>(lock: &L, name: &str, token: LeaseToken) {
    match lock.release(name, token).await {
        Ok(true) => {}
        Ok(false) => error!(
            lock = name,
            %token,
            "lease expired before release; critical section outlived its lease"
        ),
        Err(e) => warn!(
            lock = name,
            %token,
            error = %e,
            "failed to release lock; lease will expire on its own"
        ),
    }
}
