//! SyntheticRenderer - render-product style frame source
//!
//! Produces float RGBA frames in `[0, 1]` on demand, the way a render
//! product annotator hands back linear color. When attached to a
//! [`MockEngine`] a marker follows the pendulum angle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{
    CaptureAttemptResult, ChannelHandle, ContractError, FrameSource, PixelData, RawFrame, TargetRef,
};
use parking_lot::Mutex;
use tracing::debug;

use crate::engine::MockEngine;
use crate::error::BridgeError;

/// Renderer behaviour
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Render product path reported as the capture target
    pub target: String,
    /// Target lookups that report nothing before the target shows up
    pub ready_after: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            target: "/Render/RenderProduct_main".to_string(),
            ready_after: 0,
        }
    }
}

/// Stand-in render product
pub struct SyntheticRenderer {
    config: RendererConfig,
    engine: Option<Arc<MockEngine>>,
    lookups: AtomicU32,
    next_id: AtomicU64,
    /// channel id -> frames rendered
    channels: Mutex<HashMap<u64, u64>>,
    pending_failures: AtomicU32,
    available: Mutex<bool>,
}

impl SyntheticRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            engine: None,
            lookups: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
            pending_failures: AtomicU32::new(0),
            available: Mutex::new(true),
        }
    }

    /// Draw the pendulum of `engine` into every frame
    pub fn with_engine(mut self, engine: Arc<MockEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Next `n` polls fail
    pub fn fail_next_polls(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Remove or restore the render target; removing it drops every channel
    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
        if !available {
            self.channels.lock().clear();
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    fn render(&self, width: u32, height: u32, frame_no: u64) -> RawFrame {
        let (w, h) = (width.max(1) as usize, height.max(1) as usize);
        let phase = frame_no as f32 * 0.05;
        let marker = self.engine.as_ref().map(|engine| {
            let angle = engine.pendulum_angle() as f32;
            let x = (0.5 + angle / std::f32::consts::PI).clamp(0.0, 1.0);
            (x * (w - 1) as f32) as usize
        });

        let mut samples = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let on_marker = marker.is_some_and(|m| x.abs_diff(m) <= w / 64);
                if on_marker {
                    samples.extend_from_slice(&[1.0, 1.0, 1.0, 1.0]);
                } else {
                    samples.extend_from_slice(&[
                        x as f32 / w as f32,
                        y as f32 / h as f32,
                        0.5 + 0.5 * phase.sin(),
                        1.0,
                    ]);
                }
            }
        }
        RawFrame::new(w as u32, h as u32, 4, PixelData::F32(samples))
    }
}

impl Default for SyntheticRenderer {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}

impl FrameSource for SyntheticRenderer {
    fn name(&self) -> &str {
        "synthetic_renderer"
    }

    async fn list_active_capture_target(&self) -> Option<TargetRef> {
        if !*self.available.lock() {
            return None;
        }
        let seen = self.lookups.fetch_add(1, Ordering::SeqCst);
        (seen >= self.config.ready_after).then(|| TargetRef::new(self.config.target.clone()))
    }

    async fn create_capture_channel(
        &self,
        target: &TargetRef,
        width: u32,
        height: u32,
    ) -> Result<ChannelHandle, ContractError> {
        if !*self.available.lock() || target.as_str() != self.config.target {
            return Err(BridgeError::target_unavailable(target.as_str()).into());
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().insert(id, 0);
        debug!(channel = id, target = %target, width, height, "Render channel attached");
        Ok(ChannelHandle {
            id,
            target: target.clone(),
            width,
            height,
        })
    }

    async fn poll_latest_frame(&self, channel: &ChannelHandle) -> CaptureAttemptResult {
        let failing = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return CaptureAttemptResult::TransientError("render product read failed".into());
        }

        let frame_no = {
            let mut channels = self.channels.lock();
            let Some(count) = channels.get_mut(&channel.id) else {
                return CaptureAttemptResult::Unavailable;
            };
            *count += 1;
            *count
        };
        CaptureAttemptResult::Frame(self.render(channel.width, channel.height, frame_no))
    }

    async fn destroy_channel(&self, channel: ChannelHandle) {
        if self.channels.lock().remove(&channel.id).is_some() {
            debug!(channel = channel.id, "Render channel released");
        }
    }
}
