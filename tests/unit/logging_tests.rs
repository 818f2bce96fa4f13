use heartbeat_sequencer::logging::log_file_name;
use heartbeat_sequencer::sequencer::journal::InMemoryJournal;
use heartbeat_sequencer::sequencer::retry::NoOpIdleStrategy;
use heartbeat_sequencer::sequencer::TxResponse;
use heartbeat_sequencer::{ChannelId, FileLogSink, HeartbeatConfig, HeartbeatSequencer};

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    #[test]
    fn test_log_file_named_by_node_and_channel() {
        assert_eq!(log_file_name(3, channel(2)), "3-2.log");
    }

    #[test]
    fn test_sink_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let sink = FileLogSink::create(&nested, 1, channel(0)).unwrap();

        assert!(nested.is_dir());
        assert_eq!(sink.path(), nested.join("1-0.log"));
        assert!(sink.path().is_file());
    }

    #[test]
    fn test_diagnostics_written_to_channel_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HeartbeatConfig::new(7, channel(1));
        config.log_dir = Some(dir.path().to_path_buf());

        let mut sequencer =
            HeartbeatSequencer::from_config(&config).unwrap().with_idle_strategy(NoOpIdleStrategy);
        let mut log = InMemoryJournal::new();
        for tx_id in [1, 2, 4, 4] {
            sequencer
                .apply(&mut log, &TxResponse::new(channel(1), tx_id).encode())
                .unwrap();
        }

        let contents = std::fs::read_to_string(dir.path().join("7-1.log")).unwrap();
        assert!(contents.contains("TxResponse skipped message"));
        assert!(contents.contains("expected=3"));
        assert!(contents.contains("actual=4"));
        assert!(contents.contains("TxResponse duplicate"));
        assert!(contents.contains("WARN"));
    }

    #[test]
    fn test_co_hosted_channels_log_separately() {
        let dir = tempfile::tempdir().unwrap();
        let mut sequencers = Vec::new();
        for id in 0..2 {
            let mut config = HeartbeatConfig::new(0, channel(id));
            config.log_dir = Some(dir.path().to_path_buf());
            sequencers.push(HeartbeatSequencer::from_config(&config).unwrap());
        }

        let mut log = InMemoryJournal::new();
        // A gap only on channel 1
        for sequencer in &mut sequencers {
            sequencer
                .apply(&mut log, &TxResponse::new(channel(1), 5).encode())
                .unwrap();
        }

        let first = std::fs::read_to_string(dir.path().join("0-0.log")).unwrap();
        let second = std::fs::read_to_string(dir.path().join("0-1.log")).unwrap();
        assert!(!first.contains("skipped message"));
        assert!(second.contains("skipped message"));
    }
}
