//! One-way latch used for the readiness, green-light and finished gates.

use std::sync::Arc;

use tokio::sync::watch;

/// A gate starts closed and, once opened, stays open.
#[derive(Debug, Clone)]
pub struct Gate {
    state: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// Opens the gate and wakes every waiter. Idempotent.
    pub fn open(&self) {
        self.state.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Waits until the gate is open; returns at once if it already is.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in self, so wait_for cannot fail with a closed channel
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_open() {
        let gate = Gate::new();
        assert!(!gate.is_open());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_open_gate_does_not_block() {
        let gate = Gate::new();
        gate.open();
        gate.open();
        tokio::time::timeout(Duration::from_millis(100), gate.wait())
            .await
            .unwrap();
    }
}
