//! # Branch gate.
//!
//! Each executor owns one gate. It is open except between a rendezvous arrival and
//! the coordinator's release. The executor waits on it after every attempt:
//!
//! ```text
//! rendezvous action ─► gate.close(release_rx)
//! after attempt     ─► gate.wait(token)
//!                        ├─ open              ─► Ok(())
//!                        ├─ release received  ─► Ok(())   gate reopens
//!                        └─ scope cancelled   ─► Err(())  branch unwinds
//! ```

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct Gate {
    pending: Option<oneshot::Receiver<()>>,
}

impl Gate {
    pub(crate) fn close(&mut self, release: oneshot::Receiver<()>) {
        self.pending = Some(release);
    }

    #[cfg(test)]
    pub(crate) fn is_open(&self) -> bool {
        self.pending.is_none()
    }

    /// Blocks until the gate is open; `Err` when the scope is cancelled first.
    pub(crate) async fn wait(&mut self, token: &CancellationToken) -> Result<(), ()> {
        if token.is_cancelled() {
            return Err(());
        }
        let Some(rx) = self.pending.as_mut() else {
            return Ok(());
        };
        let released = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(()),
            r = rx => r,
        };
        if released.is_err() {
            warn!("rendezvous coordinator dropped the release; reopening gate");
        }
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_gate_passes() {
        let mut gate = Gate::default();
        assert!(gate.wait(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_gate_waits_for_release() {
        let mut gate = Gate::default();
        let (tx, rx) = oneshot::channel();
        gate.close(rx);
        assert!(!gate.is_open());

        tx.send(()).unwrap();
        assert!(gate.wait(&CancellationToken::new()).await.is_ok());
        assert!(gate.is_open());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_closed_gate() {
        let mut gate = Gate::default();
        let (_tx, rx) = oneshot::channel();
        gate.close(rx);

        let token = CancellationToken::new();
        let t2 = token.clone();
        tokio::spawn(async move { t2.cancel() });
        assert!(gate.wait(&token).await.is_err());
        assert!(!gate.is_open());
    }
}
