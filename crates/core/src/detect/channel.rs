//! Channel-backed detection source.
//!
//! Frames are pushed in from outside (an inference sidecar, an ingest API
//! route) through a [`ChannelSourceHandle`]; the source replays them to the
//! registered frame handler, honoring the control token at every iteration.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::token::ControlToken;
use super::traits::{DetectError, DetectionSource, FrameHandler};
use super::types::{Detection, Frame};

/// Producer half: push `(frame, detections)` pairs into the source.
#[derive(Clone)]
pub struct ChannelSourceHandle {
    tx: mpsc::Sender<(Frame, Vec<Detection>)>,
}

impl ChannelSourceHandle {
    /// Push a frame. Returns `false` if the source has shut down or the
    /// buffer is full (the frame is dropped; detection is lossy by nature).
    pub fn push(&self, frame: Frame, detections: Vec<Detection>) -> bool {
        match self.tx.try_send((frame, detections)) {
            Ok(()) => true,
            Err(e) => {
                debug!("Frame dropped at source: {}", e);
                false
            }
        }
    }
}

/// Consumer half implementing [`DetectionSource`].
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<(Frame, Vec<Detection>)>>>,
}

/// Create a paired source and push handle with the given frame buffer.
pub fn channel_source(buffer: usize) -> (ChannelSource, ChannelSourceHandle) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        ChannelSource {
            rx: Mutex::new(Some(rx)),
        },
        ChannelSourceHandle { tx },
    )
}

#[async_trait]
impl DetectionSource for ChannelSource {
    fn name(&self) -> &str {
        "channel"
    }

    async fn run(
        &self,
        handler: Arc<dyn FrameHandler>,
        mut token: ControlToken,
    ) -> Result<(), DetectError> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| DetectError::Capture("channel source already running".to_string()))?;

        loop {
            if !token.checkpoint().await {
                break;
            }
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some((frame, detections)) => handler.on_frame(frame, detections).await,
                    None => {
                        warn!("Channel source input closed");
                        break;
                    }
                },
                // A suspend or stop lands here if we are blocked waiting for
                // input; the next checkpoint handles it.
                _ = token.changed() => continue,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHandler {
        frames: AtomicUsize,
    }

    #[async_trait]
    impl FrameHandler for CountingHandler {
        async fn on_frame(&self, _frame: Frame, _detections: Vec<Detection>) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(device: &str) -> Frame {
        Frame {
            device_id: device.to_string(),
            captured_at: Utc::now(),
            data: vec![0u8; 4],
            width: 2,
            height: 2,
        }
    }

    #[tokio::test]
    async fn test_frames_reach_handler() {
        let (source, handle) = channel_source(8);
        let handler = Arc::new(CountingHandler {
            frames: AtomicUsize::new(0),
        });
        let token = ControlToken::new();
        token.resume();

        let run_handler = Arc::clone(&handler) as Arc<dyn FrameHandler>;
        let run_token = token.clone();
        let task = tokio::spawn(async move { source.run(run_handler, run_token).await });

        assert!(handle.push(frame("cam1"), vec![]));
        assert!(handle.push(frame("cam1"), vec![]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.frames.load(Ordering::SeqCst), 2);

        token.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_interrupts_idle_wait() {
        let (source, _handle) = channel_source(8);
        let handler = Arc::new(CountingHandler {
            frames: AtomicUsize::new(0),
        });
        let token = ControlToken::new();
        token.resume();

        let run_token = token.clone();
        let task =
            tokio::spawn(async move { source.run(handler as Arc<dyn FrameHandler>, run_token).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.stop();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("source did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_run_fails() {
        let (source, _handle) = channel_source(1);
        let source = Arc::new(source);
        let handler = Arc::new(CountingHandler {
            frames: AtomicUsize::new(0),
        });
        let token = ControlToken::new();
        token.resume();

        let first = Arc::clone(&source);
        let h = Arc::clone(&handler) as Arc<dyn FrameHandler>;
        let t = token.clone();
        let task = tokio::spawn(async move { first.run(h, t).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = source
            .run(handler as Arc<dyn FrameHandler>, token.clone())
            .await;
        assert!(matches!(result, Err(DetectError::Capture(_))));

        token.stop();
        task.await.unwrap().unwrap();
    }
}
