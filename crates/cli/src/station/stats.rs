//! Session statistics and shutdown summary.

use std::time::Duration;

use dispatcher::{CommandSnapshot, RegistrySnapshot};
use frame_pipeline::{PipelineSnapshot, PipelineStatus};
use observability::{StatsSummary, SuppressionSummary};
use telemetry::MonitorState;

/// Statistics from one station run
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Wall time between start and shutdown
    pub duration: Duration,

    /// Frame pipeline counters
    pub pipeline: PipelineSnapshot,

    /// Strategy state at shutdown
    pub pipeline_status: PipelineStatus,

    /// Successful capture latency in milliseconds
    pub capture_latency: StatsSummary,

    /// Telemetry loop counters
    pub monitor: MonitorState,

    /// Command dispatcher counters
    pub commands: CommandSnapshot,

    /// Message registry counters
    pub messages: RegistrySnapshot,

    /// Video registry counters
    pub video: RegistrySnapshot,

    /// Number of configured sinks attached at startup
    pub sinks: usize,

    /// Failure sites that were suppressed at least once
    pub suppressed: Vec<SuppressionSummary>,
}

impl SessionStats {
    /// Emitted frames per second over the whole run
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.pipeline.frames as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of emitted frames that came from a live capture, in percent
    pub fn live_rate(&self) -> f64 {
        if self.pipeline.frames > 0 {
            (self.pipeline.live as f64 / self.pipeline.frames as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!();
        println!("+--------------------------------------------------------------+");
        println!("|                    Station Statistics                        |");
        println!("+--------------------------------------------------------------+");
        println!();

        println!("Overview");
        println!("   |- Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   |- Sinks attached: {}", self.sinks);
        println!("   `- Commands: {} executed, {} debounced, {} failed, {} resets",
            self.commands.executed, self.commands.suppressed, self.commands.failed, self.commands.resets);

        let p = &self.pipeline;
        println!();
        println!("Video");
        println!("   |- Frames: {} ({:.2} fps, {:.1}% live)", p.frames, self.fps(), self.live_rate());
        println!("   |- Warm-up / placeholder / safe: {} / {} / {}", p.warmup, p.placeholder, p.safe);
        println!("   |- Idle ticks (no viewers): {}", p.idle_ticks);
        println!("   |- Capture latency (ms): {}", self.capture_latency);
        println!("   `- Deliveries: {}", p.deliveries);
        for status in &self.pipeline_status.strategies {
            println!(
                "      - {}: {} frames, initialized={}, failures={}",
                status.name, status.frames, status.initialized, status.consecutive_failures
            );
        }

        let m = &self.monitor;
        println!();
        println!("Telemetry");
        println!("   |- Ticks: {} ({} failed)", m.tick_count, m.failure_count);
        println!("   |- Samples broadcast: {}", m.telemetry_count);
        println!("   `- Auto-stops enforced: {} ({} notices)", m.auto_stop_count, m.notice_count);

        println!();
        println!("Subscribers");
        print_registry("messages", &self.messages);
        print_registry("video", &self.video);

        if !self.suppressed.is_empty() {
            println!();
            println!("Suppressed failures");
            for entry in &self.suppressed {
                println!(
                    "   - {} ({}): {} occurrences, {} suppressed",
                    entry.site,
                    entry.kind.as_str(),
                    entry.occurrences,
                    entry.suppressed_total
                );
            }
        }

        println!();
    }
}

fn print_registry(name: &str, snapshot: &RegistrySnapshot) {
    println!(
        "   - {}: {} broadcasts, {} deliveries, {} failures, {} removals",
        name, snapshot.broadcasts, snapshot.deliveries, snapshot.failures, snapshot.removals
    );
}
