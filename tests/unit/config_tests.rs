use heartbeat_sequencer::sequencer::retry::RetryPolicy;
use heartbeat_sequencer::sequencer::seen::SeenRetention;
use heartbeat_sequencer::sequencer::snapshot::TruncatedSnapshotPolicy;
use heartbeat_sequencer::{ChannelId, ConfigError, HeartbeatConfig, HeartbeatSequencer};
use std::io::Write;

#[cfg(test)]
mod tests {
    use super::*;

    // --- parsing ---

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = HeartbeatConfig::from_json_str(r#"{ "node_id": 2, "channel": 1 }"#).unwrap();

        assert_eq!(config.node_id, 2);
        assert_eq!(config.channel, ChannelId::new(1).unwrap());
        assert_eq!(config.log_dir, None);
        assert_eq!(config.seen_retention, SeenRetention::Unbounded);
        assert_eq!(config.publish_retry, RetryPolicy::unbounded());
        assert_eq!(
            config.truncated_snapshot,
            TruncatedSnapshotPolicy::UseDefaults
        );
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "node_id": 0,
            "channel": 2,
            "log_dir": "/tmp/heartbeat-logs",
            "seen_retention": { "kind": "window", "capacity": 4096 },
            "publish_retry": { "max_attempts": 100, "timeout_ms": 5000 },
            "snapshot_retry": { "timeout_ms": 250 },
            "truncated_snapshot": "fail"
        }"#;

        let config = HeartbeatConfig::from_json_str(json).unwrap();

        assert_eq!(
            config.seen_retention,
            SeenRetention::Window { capacity: 4096 }
        );
        assert_eq!(config.publish_retry.max_attempts, Some(100));
        assert_eq!(config.publish_retry.timeout_ms, Some(5000));
        assert_eq!(config.snapshot_retry.max_attempts, None);
        assert_eq!(config.truncated_snapshot, TruncatedSnapshotPolicy::Fail);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let mut config = HeartbeatConfig::new(4, ChannelId::new(0).unwrap());
        config.seen_retention = SeenRetention::Window { capacity: 8 };

        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(HeartbeatConfig::from_json_str(&json).unwrap(), config);
    }

    // --- validation ---

    #[test]
    fn test_out_of_range_channel_rejected() {
        let result = HeartbeatConfig::from_json_str(r#"{ "node_id": 0, "channel": 3 }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_node_id_rejected() {
        let result = HeartbeatConfig::from_json_str(r#"{ "channel": 0 }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let json = r#"{ "node_id": 0, "channel": 0, "seen_retention": { "kind": "window", "capacity": 0 } }"#;
        let result = HeartbeatConfig::from_json_str(json);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "seen_retention",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let json = r#"{ "node_id": 0, "channel": 0, "publish_retry": { "max_attempts": 0 } }"#;
        let result = HeartbeatConfig::from_json_str(json);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "publish_retry",
                ..
            })
        ));
    }

    #[test]
    fn test_sequencer_refuses_invalid_config() {
        let mut config = HeartbeatConfig::new(0, ChannelId::new(0).unwrap());
        config.snapshot_retry = RetryPolicy::attempts(0);
        assert!(HeartbeatSequencer::from_config(&config).is_err());
    }

    // --- files ---

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "node_id": 9, "channel": 2 }}"#).unwrap();

        let config = HeartbeatConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.node_id, 9);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        let result = HeartbeatConfig::from_json_file(&path);
        match result {
            Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
