//! LogSink - logs outbound control-plane messages via tracing

use async_trait::async_trait;
use contracts::{ContractError, ServerMessage, Subscriber};
use tracing::{debug, info, instrument};

/// Subscriber that mirrors the message channel into the log
pub struct LogSink {
    name: String,
    seen: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seen: 0,
        }
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    fn log_message(&self, message: &ServerMessage) {
        match message {
            // one per telemetry tick, too chatty for info
            ServerMessage::Telemetry(sample) => debug!(
                sink = %self.name,
                sim_time = sample.sim_time(),
                running = sample.is_running(),
                "telemetry"
            ),
            ServerMessage::SimulationState(state) => debug!(
                sink = %self.name,
                running = state.running,
                time = state.time,
                "simulation_state"
            ),
            ServerMessage::Error(report) => info!(
                sink = %self.name,
                command = ?report.command,
                kind = ?report.kind,
                message = %report.message,
                "error"
            ),
            other => info!(sink = %self.name, kind = other.kind(), "Message broadcast"),
        }
    }
}

#[async_trait]
impl Subscriber<ServerMessage> for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "log_sink_send", skip(self, message), fields(sink = %self.name, kind = message.kind()))]
    async fn send(&mut self, message: &ServerMessage) -> Result<(), ContractError> {
        self.seen += 1;
        self.log_message(message);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, messages = self.seen, "LogSink closed");
        Ok(())
    }
}
