//! ViewportGrabber - viewport capture frame source
//!
//! Each channel runs a producer thread that renders 8-bit RGBA frames at a
//! fixed rate and pushes them into a small bounded queue. Polling drains the
//! queue and keeps only the newest frame, like grabbing the last presented
//! viewport buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use contracts::{
    CaptureAttemptResult, ChannelHandle, ContractError, FrameSource, PixelData, RawFrame, TargetRef,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::BridgeError;

/// Producer settings
#[derive(Debug, Clone)]
pub struct ViewportConfig {
    /// Viewport name reported as the capture target
    pub viewport: String,
    /// Producer frame rate
    pub frequency_hz: f64,
    /// Queue depth between producer and poller
    pub queue_depth: usize,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            viewport: "Viewport".to_string(),
            frequency_hz: 30.0,
            queue_depth: 2,
        }
    }
}

struct Grab {
    frames: Receiver<RawFrame>,
    running: Arc<AtomicBool>,
}

/// Stand-in viewport capture
pub struct ViewportGrabber {
    config: ViewportConfig,
    next_id: AtomicU64,
    grabs: Mutex<HashMap<u64, Grab>>,
}

impl ViewportGrabber {
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            grabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_channels(&self) -> usize {
        self.grabs.lock().len()
    }

    fn render(width: u32, height: u32, frame_no: u64) -> RawFrame {
        let (w, h) = (width.max(1), height.max(1));
        let shift = (frame_no % 16) as u32;
        let mut data = Vec::with_capacity(w as usize * h as usize * 4);
        for y in 0..h {
            for x in 0..w {
                let light = ((x + shift) / 8 + y / 8) % 2 == 0;
                let v = if light { 200 } else { 40 };
                data.extend_from_slice(&[v, v, v / 2 + 60, 255]);
            }
        }
        RawFrame::new(w, h, 4, PixelData::U8(data))
    }

    fn spawn_producer(
        &self,
        id: u64,
        width: u32,
        height: u32,
        tx: Sender<RawFrame>,
        running: Arc<AtomicBool>,
    ) -> Result<(), BridgeError> {
        let interval = Duration::from_secs_f64(1.0 / self.config.frequency_hz.max(0.1));
        thread::Builder::new()
            .name(format!("viewport-grab-{id}"))
            .spawn(move || {
                debug!(channel = id, width, height, "Viewport producer started");
                let mut frame_no = 0u64;
                while running.load(Ordering::Relaxed) {
                    frame_no += 1;
                    match tx.try_send(Self::render(width, height, frame_no)) {
                        Ok(()) => trace!(channel = id, frame_no, "Viewport frame queued"),
                        // poller is behind; the frame is dropped
                        Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Closed(_)) => break,
                    }
                    thread::sleep(interval);
                }
                debug!(channel = id, frames = frame_no, "Viewport producer stopped");
            })
            .map(|_| ())
            .map_err(|e| BridgeError::Producer {
                message: e.to_string(),
            })
    }
}

impl Default for ViewportGrabber {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

impl FrameSource for ViewportGrabber {
    fn name(&self) -> &str {
        "viewport_grabber"
    }

    async fn list_active_capture_target(&self) -> Option<TargetRef> {
        Some(TargetRef::new(self.config.viewport.clone()))
    }

    async fn create_capture_channel(
        &self,
        target: &TargetRef,
        width: u32,
        height: u32,
    ) -> Result<ChannelHandle, ContractError> {
        if target.as_str() != self.config.viewport {
            return Err(BridgeError::target_unavailable(target.as_str()).into());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = async_channel::bounded(self.config.queue_depth.max(1));
        let running = Arc::new(AtomicBool::new(true));
        self.spawn_producer(id, width, height, tx, Arc::clone(&running))?;
        self.grabs.lock().insert(
            id,
            Grab {
                frames: rx,
                running,
            },
        );

        Ok(ChannelHandle {
            id,
            target: target.clone(),
            width,
            height,
        })
    }

    async fn poll_latest_frame(&self, channel: &ChannelHandle) -> CaptureAttemptResult {
        let grabs = self.grabs.lock();
        let Some(grab) = grabs.get(&channel.id) else {
            return CaptureAttemptResult::Unavailable;
        };

        let mut latest = None;
        loop {
            match grab.frames.try_recv() {
                Ok(frame) => latest = Some(frame),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => {
                    if latest.is_none() {
                        return CaptureAttemptResult::TransientError(
                            "viewport producer exited".into(),
                        );
                    }
                    break;
                }
            }
        }
        latest.map_or(CaptureAttemptResult::Empty, CaptureAttemptResult::Frame)
    }

    async fn destroy_channel(&self, channel: ChannelHandle) {
        if let Some(grab) = self.grabs.lock().remove(&channel.id) {
            grab.running.store(false, Ordering::Relaxed);
            grab.frames.close();
        }
    }
}

impl Drop for ViewportGrabber {
    fn drop(&mut self) {
        for (_, grab) in self.grabs.lock().drain() {
            grab.running.store(false, Ordering::Relaxed);
            grab.frames.close();
        }
    }
}
