use heartbeat_sequencer::sequencer::cluster::LocalCluster;
use heartbeat_sequencer::sequencer::journal::{InMemoryJournal, Journal};
use heartbeat_sequencer::sequencer::message::encode_request;
use heartbeat_sequencer::sequencer::retry::NoOpIdleStrategy;
use heartbeat_sequencer::sequencer::service::{ChunkedImage, ClusteredService, Role};
use heartbeat_sequencer::sequencer::{ApplyOutcome, TxResponse};
use heartbeat_sequencer::{ChannelId, Diagnostic, HeartbeatSequencer, SequencerSnapshot};
use std::sync::{Arc, Mutex};

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn collecting(
        sequencer: &mut HeartbeatSequencer<NoOpIdleStrategy>,
    ) -> Arc<Mutex<Vec<Diagnostic>>> {
        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let diagnostics_clone = diagnostics.clone();
        sequencer.add_listener(move |d| diagnostics_clone.lock().unwrap().push(*d));
        diagnostics
    }

    #[test]
    fn test_service_callbacks_drive_state_machine() {
        let mut service =
            HeartbeatSequencer::new(0, channel(0)).with_idle_strategy(NoOpIdleStrategy);
        let record = SequencerSnapshot::new([3, 0, 0], 3).encode();
        let mut image = ChunkedImage::split(&record, 16);

        service.on_start(Some(&mut image)).unwrap();
        service.on_role_change(Role::Leader);
        service.on_session_open(1);

        let mut log = InMemoryJournal::new();
        service.on_message(&mut log, &encode_request(0)).unwrap();
        service
            .on_message(&mut log, &TxResponse::new(channel(0), 4).encode())
            .unwrap();
        service.on_timer_event(99);

        let mut saved: Vec<bytes::Bytes> = Vec::new();
        service.on_take_snapshot(&mut saved).unwrap();
        service.on_session_close(1);
        service.on_terminate();

        assert_eq!(
            SequencerSnapshot::decode(&saved[0]).unwrap(),
            SequencerSnapshot::new([4, 0, 0], 4)
        );
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_three_channels_each_validate_their_own_traffic() {
        // One node hosting a service per channel, all fed the same log
        let mut services: Vec<_> = ChannelId::ALL
            .iter()
            .map(|&c| HeartbeatSequencer::new(0, c).with_idle_strategy(NoOpIdleStrategy))
            .collect();
        let collectors: Vec<_> = services.iter_mut().map(collecting).collect();

        let mut log = InMemoryJournal::new();
        for i in 0..10 {
            log.append(encode_request(i)).unwrap();
        }
        let mut position = 1;
        while let Some(entry) = log.get(position).cloned() {
            for service in &mut services {
                service.apply(&mut log, &entry.payload).unwrap();
            }
            position += 1;
        }

        // Each request yields one response per channel
        assert_eq!(log.len(), 10 + 30);
        for (service, collected) in services.iter().zip(&collectors) {
            assert_eq!(service.last_request_tx_id(), 10);
            assert_eq!(service.last_response_tx_id(service.channel()), 10);
            for other in ChannelId::ALL {
                if other != service.channel() {
                    assert_eq!(service.last_response_tx_id(other), 0);
                }
            }
            assert!(collected.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn test_duplicated_log_entry_is_detected_by_every_replica() {
        let mut cluster = LocalCluster::new();
        let mut collectors = Vec::new();
        for node_id in 0..3 {
            let mut replica =
                HeartbeatSequencer::new(node_id, channel(0)).with_idle_strategy(NoOpIdleStrategy);
            collectors.push(collecting(&mut replica));
            cluster.add_replica(replica).unwrap();
        }

        cluster.submit(TxResponse::new(channel(0), 1).encode()).unwrap();
        cluster.submit(TxResponse::new(channel(0), 2).encode()).unwrap();
        cluster.submit(TxResponse::new(channel(0), 2).encode()).unwrap();
        cluster.submit(TxResponse::new(channel(0), 5).encode()).unwrap();
        cluster.run_until_idle().unwrap();

        let expected = vec![
            Diagnostic::Duplicate {
                channel: channel(0),
                tx_id: 2,
            },
            Diagnostic::Gap {
                channel: channel(0),
                expected: 3,
                actual: 5,
            },
        ];
        for collected in &collectors {
            assert_eq!(*collected.lock().unwrap(), expected);
        }
    }

    #[test]
    fn test_apply_outcomes_classify_messages() {
        let mut sequencer =
            HeartbeatSequencer::new(0, channel(1)).with_idle_strategy(NoOpIdleStrategy);
        let mut log = InMemoryJournal::new();

        assert!(matches!(
            sequencer.apply(&mut log, &encode_request(0)).unwrap(),
            ApplyOutcome::RequestSequenced { tx_id: 1 }
        ));
        assert!(matches!(
            sequencer
                .apply(&mut log, &TxResponse::new(channel(1), 1).encode())
                .unwrap(),
            ApplyOutcome::ResponseValidated { tx_id: 1, .. }
        ));
        assert!(
            sequencer
                .apply(&mut log, &TxResponse::new(channel(2), 1).encode())
                .unwrap()
                .is_ignored()
        );
        assert!(sequencer.apply(&mut log, &[0xAA]).unwrap().is_ignored());
        assert_eq!(sequencer.messages_applied(), 4);
    }
}
