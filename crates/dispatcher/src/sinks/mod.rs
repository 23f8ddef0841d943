//! Sink implementations
//!
//! Configured outputs that subscribe next to the network connections:
//! LogSink on the message channel, SnapshotSink on the video channel.

mod log;
mod snapshot;

use contracts::{ServerMessage, SinkConfig, SinkType, VideoFrame};
use tracing::{info, instrument};

use crate::error::{DispatchError, Result};
use crate::registry::SubscriberRegistry;

pub use self::log::LogSink;
pub use self::snapshot::{SnapshotSink, SnapshotSinkConfig};

/// Create every configured sink and register it with its channel
///
/// Returns how many sinks were attached.
#[instrument(name = "sinks_attach", skip_all, fields(sink_count = sinks.len()))]
pub fn attach_configured(
    sinks: &[SinkConfig],
    messages: &SubscriberRegistry<ServerMessage>,
    video: &SubscriberRegistry<VideoFrame>,
) -> Result<usize> {
    for config in sinks {
        match config.sink_type {
            SinkType::Log => {
                messages.add(LogSink::new(&config.name));
            }
            SinkType::Snapshot => {
                let sink = SnapshotSink::from_params(&config.name, &config.params)
                    .map_err(|e| DispatchError::sink_creation(&config.name, e.to_string()))?;
                video.add(sink);
            }
        }
        info!(sink = %config.name, sink_type = ?config.sink_type, "Sink attached");
    }
    Ok(sinks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_attach_configured() {
        let dir = tempdir().unwrap();
        let sinks = vec![
            SinkConfig {
                name: "audit".into(),
                sink_type: SinkType::Log,
                params: HashMap::new(),
            },
            SinkConfig {
                name: "frames".into(),
                sink_type: SinkType::Snapshot,
                params: HashMap::from([(
                    "base_path".to_string(),
                    dir.path().join("shots").display().to_string(),
                )]),
            },
        ];
        let messages = SubscriberRegistry::new("messages");
        let video = SubscriberRegistry::new("video");

        assert_eq!(attach_configured(&sinks, &messages, &video).unwrap(), 2);
        assert_eq!(messages.names(), vec!["audit".to_string()]);
        assert_eq!(video.names(), vec!["frames".to_string()]);
        assert!(dir.path().join("shots").is_dir());
    }

    #[test]
    fn test_bad_snapshot_params() {
        let sinks = vec![SinkConfig {
            name: "frames".into(),
            sink_type: SinkType::Snapshot,
            params: HashMap::from([("every_n".to_string(), "never".to_string())]),
        }];
        let messages = SubscriberRegistry::new("messages");
        let video = SubscriberRegistry::new("video");
        let err = attach_configured(&sinks, &messages, &video).unwrap_err();
        assert!(matches!(err, DispatchError::SinkCreation { .. }));
    }
}
