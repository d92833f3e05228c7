//! LIFO cleanup registry. A single process-scoped object with a documented lifecycle:
//! pipeline stages register actions as they create transient state, and the registry
//! drains them in reverse order on any process exit path (normal completion, error
//! propagation, or a terminating signal).

use std::sync::Mutex;

use tracing::warn;

/// A single cleanup action. Boxed so the registry can hold a heterogeneous stack of
/// closures created by different pipeline stages.
type CleanupAction = Box<dyn FnOnce() + Send>;

/// LIFO stack of cleanup actions, drained once. Registration and draining are
/// idempotent: draining an empty or already-drained registry is a no-op, and each
/// action runs at most once even if `drain` is called more than once (e.g. once from
/// normal shutdown and once from a signal handler racing it).
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Mutex<Vec<CleanupAction>>,
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.actions.lock().map(|g| g.len()).unwrap_or(0);
        f.debug_struct("CleanupRegistry")
            .field("pending", &len)
            .finish()
    }
}

impl CleanupRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cleanup action to run, LIFO, on drain.
    pub fn register(&self, action: impl FnOnce() + Send + 'static) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(Box::new(action));
        }
    }

    /// Drain and run every registered action in reverse registration order. Tolerates
    /// being called more than once: a prior drain leaves nothing to run.
    pub fn drain(&self) {
        let pending: Vec<CleanupAction> = match self.actions.lock() {
            Ok(mut actions) => std::mem::take(&mut *actions),
            Err(_) => return,
        };
        for action in pending.into_iter().rev() {
            action();
        }
    }

    /// Number of actions still pending (for logging/tests).
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.actions.lock().map(|g| g.len()).unwrap_or(0)
    }
}

/// Install a signal handler that drains `registry` on SIGTERM or SIGINT, then
/// re-raises the default disposition by exiting with the conventional 128+signal code.
#[cfg(unix)]
pub async fn install_signal_drain(registry: std::sync::Arc<CleanupRegistry>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGINT handler");
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {
            warn!("received SIGTERM, draining cleanup registry");
            registry.drain();
            std::process::exit(128 + 15);
        }
        _ = int.recv() => {
            warn!("received SIGINT, draining cleanup registry");
            registry.drain();
            std::process::exit(128 + 2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn drains_in_lifo_order() {
        let registry = CleanupRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        registry.register(move || o1.lock().unwrap().push(1));
        let o2 = order.clone();
        registry.register(move || o2.lock().unwrap().push(2));
        let o3 = order.clone();
        registry.register(move || o3.lock().unwrap().push(3));

        registry.drain();
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[test]
    fn double_drain_is_a_no_op() {
        let registry = CleanupRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.register(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        registry.drain();
        registry.drain();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_count_reflects_registrations() {
        let registry = CleanupRegistry::new();
        assert_eq!(registry.pending_count(), 0);
        registry.register(|| {});
        registry.register(|| {});
        assert_eq!(registry.pending_count(), 2);
        registry.drain();
        assert_eq!(registry.pending_count(), 0);
    }
}
