//! Peer Module Tests
//!
//! Runs whole clusters in one runtime over `LocalTransport` with the clock
//! paused, so every interleaving and timeout is deterministic.
//!
//! ## Test Scopes
//! - **Protocol scenarios**: uncontended entry, tie-break, deferral on hold,
//!   crash of a required peer.
//! - **Failure handling**: RPC-failure eviction, quorum monotonicity,
//!   acquisition timeout, auto-release.
//! - **Cancellation and shutdown**: dropped callers and peer shutdown never
//!   leave a round open.
//! - **Safety and liveness**: randomized contention between three peers.
//! - **Control API**: the `/app` handlers.

#[cfg(test)]
mod tests {
    use crate::config::TimingConfig;
    use crate::directory::{Directory, InMemoryDirectory};
    use crate::error::MutexError;
    use crate::membership::types::PeerAddress;
    use crate::mutex::types::{MutexState, PeerName};
    use crate::peer::Peer;
    use crate::peer::handlers::{handle_acquire, handle_app_state, handle_release};
    use crate::transport::local::Message;
    use crate::transport::protocol::{Heartbeat, RequestEntry};
    use crate::transport::{LocalTransport, PeerService};
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use rand::Rng;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Cluster {
        transport: Arc<LocalTransport>,
        peers: Vec<Arc<Peer>>,
        addresses: Vec<PeerAddress>,
    }

    impl Cluster {
        fn peer(&self, index: usize) -> Arc<Peer> {
            self.peers[index].clone()
        }

        fn crash(&self, index: usize) {
            self.transport.detach(&self.addresses[index]);
        }

        fn revive(&self, index: usize) {
            self.transport
                .attach(&self.addresses[index], self.peers[index].clone());
        }

        /// `to` hears a heartbeat from `from`.
        fn heartbeat(&self, from: usize, to: usize) {
            self.peers[to].heartbeat(Heartbeat {
                sender: self.peers[from].name().clone(),
            });
        }
    }

    fn address(port: u16) -> PeerAddress {
        PeerAddress {
            rpc_addr: format!("127.0.0.1:{}", port).parse().unwrap(),
            heartbeat_addr: format!("127.0.0.1:{}", port + 500).parse().unwrap(),
        }
    }

    /// Builds a fully connected cluster: every peer knows every other peer's
    /// address and has heard a heartbeat from each of them.
    async fn cluster(names: &[&str], timing: TimingConfig) -> Cluster {
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = LocalTransport::new();
        let mut peers = Vec::new();
        let mut addresses = Vec::new();

        for (i, name) in names.iter().enumerate() {
            let name = PeerName::from(*name);
            let addr = address(5000 + i as u16);
            let peer = Peer::new(
                name.clone(),
                timing.clone(),
                directory.clone(),
                transport.clone(),
                vec![],
            );
            directory.register(&name, addr).await.unwrap();
            transport.attach(&addr, peer.clone());
            peers.push(peer);
            addresses.push(addr);
        }

        for peer in &peers {
            peer.detector().discover().await.unwrap();
        }

        let cluster = Cluster {
            transport,
            peers,
            addresses,
        };
        for to in 0..names.len() {
            for from in 0..names.len() {
                if from != to {
                    cluster.heartbeat(from, to);
                }
            }
        }
        settle().await;
        cluster
    }

    /// Lets every runnable task make progress without moving the clock.
    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_request(peer: &Arc<Peer>) -> tokio::task::JoinHandle<bool> {
        let peer = peer.clone();
        tokio::spawn(async move { peer.request_entry().await })
    }

    // ============================================================
    // PROTOCOL SCENARIOS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_uncontended_entry() {
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], TimingConfig::default()).await;
        let (a, b, c) = (cluster.peer(0), cluster.peer(1), cluster.peer(2));

        // ACT
        assert!(a.request_entry().await);

        // ASSERT
        assert_eq!(a.state(), MutexState::Held);
        assert_eq!(a.query_state().clock, 1);
        assert_eq!(b.query_state().clock, 2, "max(0, 1) + 1");
        assert_eq!(c.query_state().clock, 2);
        assert_eq!(b.state(), MutexState::Released);

        a.release_entry().unwrap();
        assert_eq!(a.state(), MutexState::Released);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_peer_enters_immediately() {
        let cluster = cluster(&["PeerA"], TimingConfig::default()).await;
        let a = cluster.peer(0);

        assert!(a.request_entry().await);

        assert_eq!(a.state(), MutexState::Held);
        assert!(cluster.transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_timestamps_break_ties_by_name() {
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], TimingConfig::default()).await;
        let (a, c) = (cluster.peer(0), cluster.peer(2));
        a.set_clock(4);
        c.set_clock(4);

        // ARRANGE: both requests are in flight before either is delivered
        cluster.transport.hold();
        let a_task = spawn_request(&a);
        let c_task = spawn_request(&c);
        settle().await;
        assert_eq!(a.query_state().pending_timestamp, Some(5));
        assert_eq!(c.query_state().pending_timestamp, Some(5));

        // ACT
        cluster.transport.deliver_held();
        settle().await;

        // ASSERT
        assert_eq!(a.state(), MutexState::Held, "(5, PeerA) < (5, PeerC)");
        assert_eq!(c.state(), MutexState::Wanted);
        assert_eq!(a.query_state().deferred_count, 1);
        assert!(a_task.await.unwrap());

        a.release_entry().unwrap();
        settle().await;

        assert_eq!(c.state(), MutexState::Held);
        assert!(c_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_during_hold_is_deferred_until_release() {
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], TimingConfig::default()).await;
        let (a, b) = (cluster.peer(0), cluster.peer(1));
        assert!(a.request_entry().await);

        // ACT
        let b_task = spawn_request(&b);
        settle().await;

        // ASSERT
        assert_eq!(b.state(), MutexState::Wanted);
        let snapshot = b.query_state();
        assert_eq!(snapshot.received_count, 1, "Only PeerC replied");
        assert_eq!(a.query_state().deferred_count, 1);

        a.release_entry().unwrap();
        settle().await;

        assert_eq!(b.state(), MutexState::Held);
        assert!(b_task.await.unwrap());
        assert_eq!(a.query_state().deferred_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_peer_is_evicted_and_request_completes() {
        let timing = TimingConfig {
            max_hold_ms: 600_000,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing.clone()).await;
        let (a, c) = (cluster.peer(0), cluster.peer(2));

        // ARRANGE: PeerC holds, defers PeerA, then dies
        assert!(c.request_entry().await);
        let a_task = spawn_request(&a);
        settle().await;
        cluster.crash(2);
        assert_eq!(a.state(), MutexState::Wanted);
        assert_eq!(a.query_state().received_count, 1);

        // ACT: PeerB keeps heartbeating, PeerC stays silent
        tokio::time::advance(timing.heartbeat_timeout() + Duration::from_secs(1)).await;
        cluster.heartbeat(1, 0);
        let evicted = a.detector().check_liveness(a.as_ref());
        settle().await;

        // ASSERT
        assert_eq!(evicted, vec![PeerName::from("PeerC")]);
        assert_eq!(a.state(), MutexState::Held);
        assert!(a_task.await.unwrap());
        assert!(!a.membership().is_active(&PeerName::from("PeerC")));
    }

    // ============================================================
    // FAILURE HANDLING
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_rpc_failure_evicts_and_quorum_never_grows() {
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], TimingConfig::default()).await;
        let (a, c) = (cluster.peer(0), cluster.peer(2));
        assert!(c.request_entry().await);

        // ACT: PeerB is unreachable when PeerA asks
        cluster.crash(1);
        let a_task = spawn_request(&a);
        settle().await;

        // ASSERT: PeerB evicted, only PeerC left to answer
        assert!(!a.membership().is_active(&PeerName::from("PeerB")));
        let snapshot = a.query_state();
        assert_eq!(snapshot.required_count, 1);
        assert_eq!(snapshot.received_count, 0);

        // PeerB comes back mid-round
        cluster.revive(1);
        cluster.heartbeat(1, 0);
        settle().await;
        assert!(a.membership().is_active(&PeerName::from("PeerB")));
        assert_eq!(
            a.query_state().required_count,
            1,
            "A rejoining peer is not added to an in-flight round"
        );

        c.release_entry().unwrap();
        settle().await;

        assert_eq!(a.state(), MutexState::Held);
        assert!(a_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisition_timeout_reverts_and_flushes_deferred() {
        let timing = TimingConfig {
            max_hold_ms: 600_000,
            acquire_timeout_ms: 30_000,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing).await;
        let (a, b, c) = (cluster.peer(0), cluster.peer(1), cluster.peer(2));
        assert!(c.request_entry().await);

        // ARRANGE: PeerA waits on PeerC, then defers PeerB's later request
        let a_task = spawn_request(&a);
        settle().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let b_task = spawn_request(&b);
        settle().await;
        assert_eq!(a.query_state().deferred_count, 1);
        assert_eq!(b.query_state().received_count, 0);

        // ACT: PeerA's deadline passes
        tokio::time::advance(Duration::from_secs(21)).await;
        settle().await;

        // ASSERT
        assert!(!a_task.await.unwrap());
        let snapshot = a.query_state();
        assert_eq!(snapshot.state, MutexState::Released);
        assert_eq!(snapshot.deferred_count, 0);
        assert_eq!(snapshot.pending_timestamp, None);
        assert_eq!(
            b.query_state().received_count,
            1,
            "Deferred reply flushed on abort"
        );

        c.release_entry().unwrap();
        settle().await;
        assert!(b_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_release_after_max_hold() {
        let timing = TimingConfig::default();
        let cluster = cluster(&["PeerA", "PeerB"], timing.clone()).await;
        let (a, b) = (cluster.peer(0), cluster.peer(1));
        assert!(a.request_entry().await);
        let b_task = spawn_request(&b);
        settle().await;
        assert_eq!(b.state(), MutexState::Wanted);

        // ACT
        tokio::time::advance(timing.max_hold() + Duration::from_millis(1)).await;
        settle().await;

        // ASSERT
        assert_eq!(a.state(), MutexState::Released);
        assert_eq!(b.state(), MutexState::Held);
        assert!(b_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_auto_release_does_not_end_next_hold() {
        let cluster = cluster(&["PeerA"], TimingConfig::default()).await;
        let a = cluster.peer(0);

        assert!(a.request_entry().await);
        tokio::time::advance(Duration::from_secs(5)).await;
        a.release_entry().unwrap();
        assert!(a.request_entry().await);

        // First hold's timer would have fired here
        tokio::time::advance(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(a.state(), MutexState::Held);

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(a.state(), MutexState::Released);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_while_pending_is_rejected() {
        let cluster = cluster(&["PeerA"], TimingConfig::default()).await;
        let a = cluster.peer(0);
        assert!(a.request_entry().await);

        let result = a.acquire().await;

        assert!(matches!(result, Err(MutexError::AlreadyPending)));
        assert_eq!(a.state(), MutexState::Held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_without_hold_is_harmless() {
        let cluster = cluster(&["PeerA", "PeerB"], TimingConfig::default()).await;
        let a = cluster.peer(0);

        assert!(matches!(a.release_entry(), Err(MutexError::NotHeld)));
        assert_eq!(a.state(), MutexState::Released);
        assert!(
            cluster
                .transport
                .sent()
                .iter()
                .all(|(_, msg)| matches!(msg, Message::Heartbeat(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_from_inactive_peer_is_ignored() {
        let cluster = cluster(&["PeerA", "PeerB"], TimingConfig::default()).await;
        let (a, b) = (cluster.peer(0), cluster.peer(1));
        a.membership().deactivate(b.name());

        let b_task = spawn_request(&b);
        settle().await;

        assert_eq!(b.state(), MutexState::Wanted, "No reply from PeerA");
        assert_eq!(a.query_state().clock, 2, "Clock still advanced");
        assert_eq!(a.query_state().deferred_count, 0);

        b_task.abort();
        settle().await;
        assert_eq!(b.state(), MutexState::Released, "Abandoned request is withdrawn");
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_from_unresolved_peer_is_ignored() {
        let cluster = cluster(&["PeerA", "PeerB"], TimingConfig::default()).await;
        let a = cluster.peer(0);
        let stranger = PeerName::from("PeerD");

        // ARRANGE: heard from, but not in the directory
        a.heartbeat(Heartbeat {
            sender: stranger.clone(),
        });
        settle().await;
        assert!(a.membership().is_active(&stranger));
        assert!(!a.membership().is_reachable(&stranger));

        // ACT
        PeerService::request_entry(
            a.as_ref(),
            RequestEntry {
                timestamp: 1,
                requester: stranger.clone(),
            },
        );
        settle().await;

        // ASSERT
        let snapshot = a.query_state();
        assert_eq!(snapshot.clock, 2);
        assert_eq!(snapshot.deferred_count, 0);
        assert!(
            !cluster
                .transport
                .sent()
                .iter()
                .any(|(_, msg)| matches!(msg, Message::ReplyEntry(_))),
            "No reply is granted to a peer that cannot be answered"
        );
    }

    // ============================================================
    // CANCELLATION AND SHUTDOWN
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_caller_withdraws_request() {
        let timing = TimingConfig {
            max_hold_ms: 600_000,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing).await;
        let (a, c) = (cluster.peer(0), cluster.peer(2));
        assert!(c.request_entry().await);

        // ACT: the caller gives up long before the acquisition timeout
        let result = tokio::time::timeout(Duration::from_secs(1), a.acquire()).await;
        settle().await;

        // ASSERT
        assert!(result.is_err());
        let snapshot = a.query_state();
        assert_eq!(snapshot.state, MutexState::Released);
        assert_eq!(snapshot.pending_timestamp, None);

        c.release_entry().unwrap();
        settle().await;
        assert!(a.request_entry().await, "A new request is accepted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_request_answers_deferred_peers() {
        let timing = TimingConfig {
            max_hold_ms: 600_000,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing).await;
        let (a, b, c) = (cluster.peer(0), cluster.peer(1), cluster.peer(2));
        assert!(c.request_entry().await);

        // ARRANGE: PeerA waits on PeerC and defers PeerB
        let a_task = spawn_request(&a);
        settle().await;
        let b_task = spawn_request(&b);
        settle().await;
        assert_eq!(a.query_state().deferred_count, 1);

        // ACT
        a_task.abort();
        settle().await;

        // ASSERT
        let snapshot = a.query_state();
        assert_eq!(snapshot.state, MutexState::Released);
        assert_eq!(snapshot.deferred_count, 0);
        assert_eq!(b.query_state().received_count, 1);

        c.release_entry().unwrap();
        settle().await;
        assert!(b_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_holding_answers_deferred() {
        let cluster = cluster(&["PeerA", "PeerB"], TimingConfig::default()).await;
        let (a, b) = (cluster.peer(0), cluster.peer(1));
        assert!(a.request_entry().await);
        let b_task = spawn_request(&b);
        settle().await;

        a.shutdown().await;
        settle().await;

        assert_eq!(a.state(), MutexState::Released);
        assert_eq!(b.state(), MutexState::Held);
        assert!(b_task.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_waiting_abandons_request() {
        let timing = TimingConfig {
            max_hold_ms: 600_000,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing).await;
        let (a, b, c) = (cluster.peer(0), cluster.peer(1), cluster.peer(2));
        assert!(c.request_entry().await);
        let a_task = spawn_request(&a);
        settle().await;
        let b_task = spawn_request(&b);
        settle().await;

        a.shutdown().await;

        assert_eq!(a.state(), MutexState::Released);
        assert_eq!(a.query_state().deferred_count, 0);
        assert_eq!(b.query_state().received_count, 1);

        a_task.abort();
        c.release_entry().unwrap();
        settle().await;
        assert!(b_task.await.unwrap());
    }

    // ============================================================
    // SAFETY AND LIVENESS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_contention_keeps_mutual_exclusion() {
        let timing = TimingConfig {
            max_response_delay_ms: 20,
            ..TimingConfig::default()
        };
        let cluster = cluster(&["PeerA", "PeerB", "PeerC"], timing).await;
        let holders = Arc::new(AtomicUsize::new(0));
        const ROUNDS: usize = 5;

        let mut tasks = Vec::new();
        for peer in &cluster.peers {
            let peer = peer.clone();
            let holders = holders.clone();
            tasks.push(tokio::spawn(async move {
                let mut entered = 0;
                for _ in 0..ROUNDS {
                    let think = rand::thread_rng().gen_range(0..30);
                    tokio::time::sleep(Duration::from_millis(think)).await;

                    if !peer.request_entry().await {
                        continue;
                    }
                    assert_eq!(
                        holders.fetch_add(1, Ordering::SeqCst),
                        0,
                        "{} entered while another peer held the section",
                        peer.name()
                    );
                    entered += 1;

                    let hold = rand::thread_rng().gen_range(1..50);
                    tokio::time::sleep(Duration::from_millis(hold)).await;

                    holders.fetch_sub(1, Ordering::SeqCst);
                    peer.release_entry().unwrap();
                }
                entered
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), ROUNDS, "Every request is eventually granted");
        }
        for peer in &cluster.peers {
            assert_eq!(peer.state(), MutexState::Released);
            assert_eq!(peer.query_state().deferred_count, 0);
        }
    }

    // ============================================================
    // CONTROL API
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_app_handlers() {
        let cluster = cluster(&["PeerA", "PeerB"], TimingConfig::default()).await;
        let a = cluster.peer(0);

        let (status, body) = handle_acquire(Extension(a.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.acquired);

        let (status, body) = handle_acquire(Extension(a.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.acquired);

        let state = handle_app_state(Extension(a.clone())).await;
        assert_eq!(state.state, MutexState::Held);
        assert_eq!(state.active_peers, vec![PeerName::from("PeerB")]);

        let (status, body) = handle_release(Extension(a.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.released);

        let (status, body) = handle_release(Extension(a)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.released);
    }
}
