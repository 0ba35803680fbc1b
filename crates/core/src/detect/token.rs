//! Run/suspend/stop control token for the detection loop.
//!
//! The orchestrator hands a [`ControlToken`] to the detection source; the
//! source calls [`ControlToken::checkpoint`] at each iteration boundary.
//! Commands travel on one watch channel, the state the loop last observed
//! travels back on a second, so `pause()` can wait for the source to actually
//! acknowledge suspension instead of racing on a shared boolean.

use std::time::Duration;

use tokio::sync::watch;

/// Commanded state of the detection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Suspended,
    Stopped,
}

/// Cloneable pause/cancel token checked by the detection loop.
#[derive(Debug, Clone)]
pub struct ControlToken {
    cmd_tx: watch::Sender<RunState>,
    cmd_rx: watch::Receiver<RunState>,
    ack_tx: watch::Sender<RunState>,
    ack_rx: watch::Receiver<RunState>,
}

impl ControlToken {
    /// Create a token in the `Suspended` state.
    pub fn new() -> Self {
        let (cmd_tx, cmd_rx) = watch::channel(RunState::Suspended);
        let (ack_tx, ack_rx) = watch::channel(RunState::Suspended);
        Self {
            cmd_tx,
            cmd_rx,
            ack_tx,
            ack_rx,
        }
    }

    /// Current commanded state.
    pub fn state(&self) -> RunState {
        *self.cmd_rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    /// Command the loop to run. Ignored after `stop()`.
    pub fn resume(&self) {
        self.command(RunState::Running);
    }

    /// Command the loop to suspend at its next iteration boundary.
    /// Ignored after `stop()`.
    pub fn suspend(&self) {
        self.command(RunState::Suspended);
    }

    /// Command the loop to stop. Terminal and idempotent.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(RunState::Stopped);
    }

    fn command(&self, state: RunState) {
        self.cmd_tx.send_if_modified(|current| {
            if *current == RunState::Stopped || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Called by the detection loop at each iteration boundary.
    ///
    /// Publishes the observed state, then blocks while suspended. Returns
    /// `true` if the loop should process the next frame, `false` if it
    /// should exit.
    pub async fn checkpoint(&mut self) -> bool {
        loop {
            let state = *self.cmd_rx.borrow_and_update();
            let _ = self.ack_tx.send(state);
            match state {
                RunState::Running => return true,
                RunState::Stopped => return false,
                RunState::Suspended => {
                    // Wake on the next command.
                    if self.cmd_rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Wait for the next command change. Used by sources that block on
    /// external input so a stop or suspend can interrupt the wait.
    pub async fn changed(&mut self) {
        let _ = self.cmd_rx.changed().await;
    }

    /// Wait until the loop has acknowledged the given state.
    ///
    /// Returns `false` if the acknowledgment did not arrive within `timeout`
    /// (e.g. the source is blocked inside a frame or was never started).
    pub async fn wait_acknowledged(&self, state: RunState, timeout: Duration) -> bool {
        let mut rx = self.ack_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

impl Default for ControlToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_suspended() {
        let token = ControlToken::new();
        assert_eq!(token.state(), RunState::Suspended);
    }

    #[tokio::test]
    async fn test_checkpoint_runs_when_resumed() {
        let token = ControlToken::new();
        token.resume();
        let mut loop_token = token.clone();
        assert!(loop_token.checkpoint().await);
    }

    #[tokio::test]
    async fn test_checkpoint_exits_on_stop() {
        let token = ControlToken::new();
        token.stop();
        let mut loop_token = token.clone();
        assert!(!loop_token.checkpoint().await);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let token = ControlToken::new();
        token.stop();
        token.resume();
        assert_eq!(token.state(), RunState::Stopped);
        token.suspend();
        assert_eq!(token.state(), RunState::Stopped);
    }

    #[tokio::test]
    async fn test_suspend_blocks_until_resume() {
        let token = ControlToken::new();
        token.resume();

        let mut loop_token = token.clone();
        let handle = tokio::spawn(async move {
            // First checkpoint passes, second blocks on the suspension.
            assert!(loop_token.checkpoint().await);
            loop_token.checkpoint().await
        });

        token.suspend();
        assert!(
            token
                .wait_acknowledged(RunState::Suspended, Duration::from_secs(1))
                .await
        );

        token.resume();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_acknowledged_times_out() {
        let token = ControlToken::new();
        token.resume();
        // No loop is running, so the ack never arrives.
        assert!(
            !token
                .wait_acknowledged(RunState::Running, Duration::from_millis(50))
                .await
        );
    }
}
