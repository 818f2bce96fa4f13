/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Tests for replicas hosted by the in-process cluster runtime.

#[cfg(test)]
mod tests {
    use crate::sequencer::cluster::{ClusterError, LocalCluster};
    use crate::sequencer::journal::Journal;
    use crate::sequencer::message::encode_request;
    use crate::sequencer::retry::{NoOpIdleStrategy, RetryPolicy};
    use crate::sequencer::{
        ChannelId, Diagnostic, HeartbeatSequencer, SequencerError, SequencerSnapshot, TxResponse,
    };
    use std::sync::{Arc, Mutex};

    type Replica = HeartbeatSequencer<NoOpIdleStrategy>;

    fn channel(id: u8) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn replica(node_id: u32, own: u8) -> Replica {
        HeartbeatSequencer::new(node_id, channel(own)).with_idle_strategy(NoOpIdleStrategy)
    }

    fn three_node_cluster(own: u8) -> LocalCluster<Replica> {
        let mut cluster = LocalCluster::new();
        for node_id in 0..3 {
            cluster.add_replica(replica(node_id, own)).unwrap();
        }
        cluster
    }

    #[test]
    fn test_replicas_converge_on_same_state() {
        let mut cluster = three_node_cluster(1);
        for i in 0..50 {
            cluster.submit(encode_request(i)).unwrap();
        }

        cluster.run_until_idle().unwrap();

        let expected = SequencerSnapshot::new([0, 50, 0], 50);
        for index in 0..3 {
            assert_eq!(cluster.replica(index).unwrap().snapshot(), expected);
            assert_eq!(cluster.replica_position(index), Some(100));
        }
        // Only the leader's responses reached the log
        assert_eq!(cluster.journal().len(), 100);
    }

    #[test]
    fn test_leader_responses_are_contiguous() {
        let mut cluster = three_node_cluster(0);
        for i in 0..20 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();

        let ids: Vec<u64> = cluster
            .journal()
            .read_from(21)
            .map(|e| TxResponse::decode(&e.payload).unwrap().tx_id)
            .collect();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_leader_change_keeps_sequence() {
        let mut cluster = three_node_cluster(2);
        for i in 0..5 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();

        cluster.set_leader(2).unwrap();
        for i in 5..10 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();

        assert_eq!(cluster.leader(), 2);
        for index in 0..3 {
            let replica = cluster.replica(index).unwrap();
            assert_eq!(replica.last_request_tx_id(), 10);
            assert_eq!(replica.last_response_tx_id(channel(2)), 10);
        }
    }

    #[test]
    fn test_snapshot_restart_converges_with_peers() {
        let mut cluster = three_node_cluster(0);
        for i in 0..10 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();
        let snapshot = cluster.take_snapshot(1).unwrap();
        assert_eq!(snapshot.position, 20);
        assert_eq!(snapshot.chunks.len(), 1);

        for i in 10..15 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();

        // Node 1 crashes and comes back from its snapshot, fragmented
        let mut restarted = replica(1, 0);
        let diagnostics = Arc::new(Mutex::new(Vec::<Diagnostic>::new()));
        let diagnostics_clone = diagnostics.clone();
        restarted.add_listener(move |d| diagnostics_clone.lock().unwrap().push(*d));
        cluster
            .restart_replica(1, restarted, Some(&snapshot), 5)
            .unwrap();
        assert_eq!(cluster.replica(1).unwrap().snapshot(), SequencerSnapshot::new([10, 0, 0], 10));

        cluster.run_until_idle().unwrap();

        let leader = cluster.replica(0).unwrap().snapshot();
        assert_eq!(cluster.replica(1).unwrap().snapshot(), leader);
        assert_eq!(leader, SequencerSnapshot::new([15, 0, 0], 15));
        assert!(diagnostics.lock().unwrap().is_empty());
    }

    #[test]
    fn test_leader_restart_does_not_republish() {
        let diagnostics = Arc::new(Mutex::new(Vec::<Diagnostic>::new()));
        let watched = |node_id| {
            let mut watched = replica(node_id, 0);
            let diagnostics_clone = diagnostics.clone();
            watched.add_listener(move |d| diagnostics_clone.lock().unwrap().push(*d));
            watched
        };

        let mut cluster = LocalCluster::new();
        for node_id in 0..3 {
            cluster.add_replica(watched(node_id)).unwrap();
        }
        for i in 0..10 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();
        let snapshot = cluster.take_snapshot(0).unwrap();

        for i in 10..15 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();
        assert_eq!(cluster.journal().len(), 30);

        // The leader comes back from its snapshot and catches up on 10 entries
        cluster
            .restart_replica(0, watched(0), Some(&snapshot), 8)
            .unwrap();
        cluster.run_until_idle().unwrap();

        assert_eq!(cluster.journal().len(), 30);
        assert_eq!(
            cluster.replica(0).unwrap().snapshot(),
            SequencerSnapshot::new([15, 0, 0], 15)
        );

        // Past its catch-up point the restarted leader publishes again
        cluster.submit(encode_request(15)).unwrap();
        cluster.run_until_idle().unwrap();

        assert_eq!(cluster.journal().len(), 32);
        for index in 0..3 {
            assert_eq!(
                cluster.replica(index).unwrap().snapshot(),
                SequencerSnapshot::new([16, 0, 0], 16)
            );
        }
        assert!(diagnostics.lock().unwrap().is_empty());
    }

    #[test]
    fn test_new_replica_joins_from_snapshot() {
        let mut cluster = three_node_cluster(0);
        for i in 0..6 {
            cluster.submit(encode_request(i)).unwrap();
        }
        cluster.run_until_idle().unwrap();
        let snapshot = cluster.take_snapshot(0).unwrap();

        let index = cluster
            .add_replica_from_snapshot(replica(3, 0), &snapshot, 32)
            .unwrap();
        assert_eq!(cluster.run_until_idle().unwrap(), 0);

        assert_eq!(
            cluster.replica(index).unwrap().snapshot(),
            cluster.replica(0).unwrap().snapshot()
        );
        assert_eq!(cluster.replica_count(), 4);
    }

    #[test]
    fn test_leader_backpressure_is_absorbed() {
        let mut cluster = three_node_cluster(0);
        cluster.submit(encode_request(0)).unwrap();
        cluster.journal_mut().reject_next(8);

        cluster.run_until_idle().unwrap();

        assert_eq!(cluster.journal().rejected_offers(), 8);
        assert_eq!(cluster.replica(2).unwrap().last_response_tx_id(channel(0)), 1);
    }

    #[test]
    fn test_leader_publish_failure_surfaces_position() {
        let mut cluster = LocalCluster::new();
        cluster
            .add_replica(replica(0, 0).with_publish_retry(RetryPolicy::attempts(2)))
            .unwrap();
        cluster.submit(encode_request(0)).unwrap();
        cluster.journal_mut().reject_next(5);

        let result = cluster.run_until_idle();

        assert!(matches!(
            result,
            Err(ClusterError::Service {
                replica: 0,
                position: 1,
                source: SequencerError::Publish(_),
            })
        ));
    }

    #[test]
    fn test_unknown_replica_index() {
        let mut cluster = three_node_cluster(0);
        assert!(matches!(
            cluster.set_leader(7),
            Err(ClusterError::UnknownReplica(7))
        ));
        assert!(matches!(
            cluster.take_snapshot(3),
            Err(ClusterError::UnknownReplica(3))
        ));
        cluster.shutdown();
    }
}
