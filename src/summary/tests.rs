//! Summary Module Tests
//!
//! Validates the retry throttle and the summarizer lifecycle state machine.
//!
//! ## Test Scopes
//! - **Throttler**: Non-decreasing delays inside a window, ceiling clamp, reset
//!   after the window elapses.
//! - **Lifecycle**: Election-driven start/stop, terminal `Disabled`, cancellable
//!   grace delay, duplicate-spawn guard, rate-bounded creation retries.
//! - **Telemetry**: One-shot ack-lag diagnostic, re-armed by acknowledgement.

#[cfg(test)]
mod tests {
    use crate::log::types::{ClientCapabilities, ClientId, ClientRecord, LogEvent};
    use crate::summary::manager::{
        LifecycleState, SummarizeBlocked, SummarizerFactory, SummarizerHandle, SummaryConfig,
        SummaryManager, SummaryNotification,
    };
    use crate::summary::throttler::Throttler;
    use anyhow::Result;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::sync::{oneshot, watch};

    // ============================================================
    // THROTTLER
    // ============================================================

    #[test]
    fn test_throttler_non_decreasing_within_window() {
        let mut throttler = Throttler::new(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Box::new(|attempts| Duration::from_secs(attempts as u64)),
        );

        let now = Instant::now();
        let mut last = Duration::ZERO;
        for _ in 0..5 {
            let delay = throttler.get_delay_at(now);
            assert!(delay >= last, "Delays must not decrease inside one window");
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(5));
    }

    #[test]
    fn test_throttler_clamps_at_max_delay() {
        let mut throttler = Throttler::new(
            Duration::from_secs(60),
            Duration::from_secs(4),
            Box::new(|attempts| Duration::from_secs(attempts as u64 * 3)),
        );

        let now = Instant::now();
        throttler.get_delay_at(now); // 3s
        let delay = throttler.get_delay_at(now); // 6s, clamped

        assert_eq!(delay, Duration::from_secs(4));
        assert!(throttler.at_ceiling(delay));
    }

    #[test]
    fn test_throttler_resets_after_window_elapses() {
        let mut throttler = Throttler::new(
            Duration::from_secs(10),
            Duration::from_secs(30),
            Box::new(|attempts| Duration::from_secs(attempts as u64)),
        );

        let now = Instant::now();
        throttler.get_delay_at(now);
        throttler.get_delay_at(now);
        assert_eq!(throttler.get_delay_at(now), Duration::from_secs(3));

        // ACT: next call lands beyond the window
        let later = now + Duration::from_secs(11);
        let delay = throttler.get_delay_at(later);

        // ASSERT: attempt count restarted, delay back to base
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(throttler.get_delay_at(later), Duration::from_secs(1));
    }

    #[test]
    fn test_throttler_exponential_growth() {
        let mut throttler = Throttler::exponential(
            Duration::from_secs(60),
            Duration::from_secs(30),
            Duration::from_millis(500),
        );

        let now = Instant::now();
        assert_eq!(throttler.get_delay_at(now), Duration::from_secs(1));
        assert_eq!(throttler.get_delay_at(now), Duration::from_secs(2));
        assert_eq!(throttler.get_delay_at(now), Duration::from_secs(4));
    }

    // ============================================================
    // LIFECYCLE TEST SUPPORT
    // ============================================================

    /// Factory whose instances run until their stop signal fires.
    struct TickingFactory {
        created: Arc<AtomicUsize>,
    }

    impl SummarizerFactory for TickingFactory {
        fn create(&self) -> Pin<Box<dyn Future<Output = Result<SummarizerHandle>> + Send>> {
            let created = self.created.clone();
            Box::pin(async move {
                created.fetch_add(1, Ordering::SeqCst);

                let (stop_tx, mut stop_rx) = watch::channel(false);
                let (done_tx, done_rx) = oneshot::channel();

                tokio::spawn(async move {
                    while !*stop_rx.borrow() {
                        if stop_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    let _ = done_tx.send(Ok(()));
                });

                Ok(SummarizerHandle {
                    stop: stop_tx,
                    done: done_rx,
                })
            })
        }
    }

    /// Factory whose creation always fails.
    struct FailingFactory {
        attempts: Arc<AtomicUsize>,
    }

    impl SummarizerFactory for FailingFactory {
        fn create(&self) -> Pin<Box<dyn Future<Output = Result<SummarizerHandle>> + Send>> {
            let attempts = self.attempts.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("no summarizer for you"))
            })
        }
    }

    fn fast_config() -> SummaryConfig {
        SummaryConfig {
            enabled: true,
            grace_delay: Duration::ZERO,
            initial_ops_threshold: 0,
            ack_lag_threshold: 3,
            throttle_window: Duration::from_secs(60),
            throttle_max_delay: Duration::from_secs(30),
            throttle_base_delay: Duration::ZERO,
        }
    }

    fn rec(name: &str, seq: u64) -> ClientRecord {
        ClientRecord {
            id: ClientId(name.to_string()),
            join_sequence: seq,
            capabilities: ClientCapabilities::interactive(),
        }
    }

    fn summarizer_rec(name: &str, seq: u64) -> ClientRecord {
        ClientRecord {
            id: ClientId(name.to_string()),
            join_sequence: seq,
            capabilities: ClientCapabilities::summarizer(),
        }
    }

    fn ticking_manager(
        config: SummaryConfig,
    ) -> (
        Arc<SummaryManager>,
        UnboundedReceiver<SummaryNotification>,
        Arc<AtomicUsize>,
    ) {
        let created = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(TickingFactory {
            created: created.clone(),
        });
        let (manager, notes) = SummaryManager::new(ClientCapabilities::interactive(), config, factory);
        (manager, notes, created)
    }

    async fn elect_and_connect(manager: &Arc<SummaryManager>, name: &str, seq: u64) {
        manager
            .handle_event(&LogEvent::MemberAdded {
                record: rec(name, seq),
            })
            .await;
        manager.set_connected(ClientId(name.to_string())).await;
    }

    async fn wait_for_state(manager: &Arc<SummaryManager>, expected: LifecycleState) {
        for _ in 0..400 {
            if manager.state().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "Timed out waiting for state {:?}; current: {:?}",
            expected,
            manager.state().await
        );
    }

    fn drain_notes(notes: &mut UnboundedReceiver<SummaryNotification>) -> Vec<SummaryNotification> {
        let mut out = Vec::new();
        while let Ok(note) = notes.try_recv() {
            out.push(note);
        }
        out
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    #[tokio::test]
    async fn test_elected_replica_reaches_running() {
        let (manager, mut notes, created) = ticking_manager(fast_config());

        elect_and_connect(&manager, "c1", 1).await;

        wait_for_state(&manager, LifecycleState::Running).await;
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(manager.should_summarize().await.is_ok());
        assert!(drain_notes(&mut notes).contains(&SummaryNotification::RoleHolderChanged(Some(
            ClientId("c1".to_string())
        ))));
    }

    #[tokio::test]
    async fn test_non_elected_replica_stays_off() {
        let (manager, _notes, created) = ticking_manager(fast_config());

        // Someone with a smaller join sequence is already present.
        manager
            .handle_event(&LogEvent::MemberAdded {
                record: rec("older", 1),
            })
            .await;
        elect_and_connect(&manager, "c2", 2).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state().await, LifecycleState::Off);
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(
            manager.should_summarize().await,
            Err(SummarizeBlocked::ParentShouldNotSummarize)
        );
        assert_eq!(
            manager.elected_role_holder().await,
            Some(ClientId("older".to_string()))
        );
    }

    #[tokio::test]
    async fn test_stop_fires_once_when_election_moves_away() {
        // ARRANGE: running on the elected replica
        let (manager, mut notes, created) = ticking_manager(fast_config());
        elect_and_connect(&manager, "c1", 1).await;
        wait_for_state(&manager, LifecycleState::Running).await;
        drain_notes(&mut notes);

        // ACT: the local client drops out of the quorum
        manager
            .handle_event(&LogEvent::MemberRemoved {
                client_id: ClientId("c1".to_string()),
            })
            .await;

        // ASSERT: cooperative stop, settling to Off, no respawn
        wait_for_state(&manager, LifecycleState::Off).await;
        assert_eq!(created.load(Ordering::SeqCst), 1, "No duplicate spawn");
        assert!(drain_notes(&mut notes).contains(&SummaryNotification::RoleHolderChanged(None)));
    }

    #[tokio::test]
    async fn test_disconnect_while_running_settles_to_off() {
        let (manager, _notes, created) = ticking_manager(fast_config());
        elect_and_connect(&manager, "c1", 1).await;
        wait_for_state(&manager, LifecycleState::Running).await;

        manager.set_disconnected().await;

        wait_for_state(&manager, LifecycleState::Off).await;
        assert_eq!(
            manager.should_summarize().await,
            Err(SummarizeBlocked::ParentNotConnected)
        );
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reconnect_restarts_the_summarizer() {
        let (manager, _notes, created) = ticking_manager(fast_config());
        elect_and_connect(&manager, "c1", 1).await;
        wait_for_state(&manager, LifecycleState::Running).await;

        manager.set_disconnected().await;
        wait_for_state(&manager, LifecycleState::Off).await;

        manager.set_connected(ClientId("c1".to_string())).await;
        wait_for_state(&manager, LifecycleState::Running).await;
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_globally_disabled_is_terminal() {
        let mut config = fast_config();
        config.enabled = false;
        let (manager, _notes, created) = ticking_manager(config);

        elect_and_connect(&manager, "c1", 1).await;

        wait_for_state(&manager, LifecycleState::Disabled).await;
        assert_eq!(created.load(Ordering::SeqCst), 0);

        // Absorbing: further triggers never leave Disabled.
        manager.set_disconnected().await;
        manager.set_connected(ClientId("c1".to_string())).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state().await, LifecycleState::Disabled);
    }

    #[tokio::test]
    async fn test_role_typed_replica_never_spawns_nested_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(TickingFactory {
            created: created.clone(),
        });
        let (manager, _notes) =
            SummaryManager::new(ClientCapabilities::summarizer(), fast_config(), factory);

        manager.start().await;

        assert_eq!(manager.state().await, LifecycleState::Disabled);
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_future_runs_on_a_spawned_task() {
        // The lifecycle hands start to background tasks throughout; drive one
        // by hand to cover the boxed entry point end to end.
        let (manager, _notes, created) = ticking_manager(fast_config());
        elect_and_connect(&manager, "c1", 1).await;

        let handle = tokio::spawn(manager.start());
        handle.await.unwrap();

        wait_for_state(&manager, LifecycleState::Running).await;
        assert_eq!(created.load(Ordering::SeqCst), 1, "No duplicate spawn");
    }

    #[tokio::test]
    async fn test_dispose_while_starting_cancels_grace_delay() {
        // ARRANGE: a fresh session that must sit out a long grace delay
        let mut config = fast_config();
        config.grace_delay = Duration::from_secs(30);
        config.initial_ops_threshold = 1_000;
        let (manager, _notes, created) = ticking_manager(config);

        elect_and_connect(&manager, "c1", 1).await;
        wait_for_state(&manager, LifecycleState::Starting).await;

        // ACT
        manager.dispose().await;

        // ASSERT: the pending timer is cancelled and Running is never reached
        wait_for_state(&manager, LifecycleState::Off).await;
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(
            manager.should_summarize().await,
            Err(SummarizeBlocked::Disposed)
        );
    }

    #[tokio::test]
    async fn test_draining_summarizer_client_blocks_start() {
        // ARRANGE: a summarizer-typed client is still present in the quorum
        let (manager, _notes, created) = ticking_manager(fast_config());
        manager
            .handle_event(&LogEvent::MemberAdded {
                record: summarizer_rec("old-summarizer", 1),
            })
            .await;
        elect_and_connect(&manager, "c1", 2).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.state().await, LifecycleState::Off, "Duplicate guard");
        assert_eq!(created.load(Ordering::SeqCst), 0);

        // ACT: the old instance finishes draining out of the quorum
        manager
            .handle_event(&LogEvent::MemberRemoved {
                client_id: ClientId("old-summarizer".to_string()),
            })
            .await;

        // ASSERT
        wait_for_state(&manager, LifecycleState::Running).await;
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_creation_failures_retry_at_throttled_rate() {
        let mut config = fast_config();
        config.throttle_base_delay = Duration::from_millis(10);
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory = Arc::new(FailingFactory {
            attempts: attempts.clone(),
        });
        let (manager, _notes) =
            SummaryManager::new(ClientCapabilities::interactive(), config, factory);

        elect_and_connect(&manager, "c1", 1).await;

        // ASSERT: retries keep coming, bounded by rate rather than count
        for _ in 0..400 {
            if attempts.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(
            attempts.load(Ordering::SeqCst) >= 3,
            "Creation failures must keep retrying"
        );
        assert_ne!(manager.state().await, LifecycleState::Disabled);

        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_throttle_ceiling_raises_warning_and_continues() {
        let mut config = fast_config();
        config.throttle_max_delay = Duration::ZERO;
        let (manager, mut notes, created) = ticking_manager(config);

        elect_and_connect(&manager, "c1", 1).await;
        wait_for_state(&manager, LifecycleState::Running).await;

        assert!(
            drain_notes(&mut notes)
                .iter()
                .any(|n| matches!(n, SummaryNotification::ThrottleCeiling { .. })),
            "Hitting the ceiling warns but does not stop the start"
        );
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    // ============================================================
    // TELEMETRY GATE
    // ============================================================

    #[tokio::test]
    async fn test_ack_lag_diagnostic_fires_once_and_rearms_on_ack() {
        let (manager, mut notes, _created) = ticking_manager(fast_config());

        // Someone must be elected for the gate to apply.
        manager
            .handle_event(&LogEvent::MemberAdded {
                record: rec("holder", 1),
            })
            .await;

        let op = LogEvent::EntryChanged {
            key: "t".to_string(),
            value: crate::log::types::RegisterValue::Unclaimed,
        };
        for _ in 0..6 {
            manager.handle_event(&op).await;
        }

        let lag_count = drain_notes(&mut notes)
            .iter()
            .filter(|n| matches!(n, SummaryNotification::AckLag { .. }))
            .count();
        assert_eq!(lag_count, 1, "Diagnostic is one-shot until acknowledged");

        // ACT: acknowledgement re-arms the gate
        manager.note_ack().await;
        for _ in 0..6 {
            manager.note_op().await;
        }

        let lag_count = drain_notes(&mut notes)
            .iter()
            .filter(|n| matches!(n, SummaryNotification::AckLag { .. }))
            .count();
        assert_eq!(lag_count, 1, "Re-armed after acknowledgement");
    }
}
