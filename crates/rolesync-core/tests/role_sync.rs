//! Scenario tests for RoleSynchronizer against in-memory peers.
//!
//! All tests run on a paused clock, so poll intervals and backoff waits
//! advance instantly and elapsed times are deterministic.

use std::sync::Arc;
use std::time::Duration;

use rolesync_core::fakes::{DispatchReply, FakeClientFactory, FakePeer, HeartbeatReply};
use rolesync_core::{
    AgentClientRegistry, AgentInstance, CancelToken, Component, ErrorReason, ExecutionState,
    ExecutionStatus, Instructions, InstructionsType, Phase, PortResolver, RoleSynchronizer,
    SyncError, SyncSettings, Topology,
};
use rolesync_retry::policies;
use rolesync_retry::RetrySettings;
use rolesync_state::fakes::MemoryStateStore;

struct Harness {
    factory: Arc<FakeClientFactory>,
    sync: RoleSynchronizer,
}

impl Harness {
    fn peer(&self, name: &str) -> FakePeer {
        self.factory.peer(name).unwrap()
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        heartbeat_timeout: Duration::from_secs(30),
        state_confirmation_timeout: Duration::from_secs(30),
        completion_timeout: Duration::from_secs(300),
        poll_interval: Duration::from_secs(1),
        reset_before_dispatch: false,
    }
}

fn harness(servers: usize) -> Harness {
    harness_with(servers, settings(), RetrySettings::new(3, 500))
}

fn harness_with(servers: usize, settings: SyncSettings, retry: RetrySettings) -> Harness {
    let mut agents = vec![AgentInstance::new("client-01", "Client", "10.0.0.100")];
    let factory = FakeClientFactory::new();
    factory.add_peer(FakePeer::new("client-01", "10.0.0.100"));
    for i in 1..=servers {
        let name = format!("server-{i:02}");
        let host = format!("10.0.0.{i}");
        factory.add_peer(FakePeer::new(name.clone(), host.clone()));
        agents.push(AgentInstance::new(name, "Server", host));
    }

    let factory = Arc::new(factory);
    let topology = Arc::new(Topology::new(agents).unwrap());
    let ports = PortResolver::new(4500).with_env_lookup(|_| None);
    let registry = Arc::new(AgentClientRegistry::new(factory.clone(), ports));
    let sync = RoleSynchronizer::new(
        topology,
        registry,
        policies::workflow(&retry).unwrap(),
        settings,
    );
    Harness { factory, sync }
}

fn workload() -> Instructions {
    Instructions::start_execution(vec![
        Component::new("ExampleWorkload").with_parameter("Duration", "00:05:00")
    ])
}

#[tokio::test(start_paused = true)]
async fn wait_for_role_two_healthy_peers() {
    let h = harness(2);

    let summary = h
        .sync
        .wait_for_role("Server", Duration::from_secs(30), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.peers.len(), 2);
    assert_eq!(h.peer("server-01").heartbeat_calls(), 1);
    assert_eq!(h.peer("server-02").heartbeat_calls(), 1);
    assert_eq!(h.peer("server-01").server_online_calls(), 1);
    assert_eq!(h.peer("client-01").heartbeat_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_role_heartbeat_fails_twice_then_succeeds() {
    let h = harness(1);
    h.peer("server-01").script_heartbeats([
        HeartbeatReply::Unreachable,
        HeartbeatReply::Unhealthy(503),
    ]);

    h.sync
        .wait_for_role("Server", Duration::from_secs(30), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(h.peer("server-01").heartbeat_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn wait_for_role_without_peers_completes_immediately() {
    let h = harness(2);

    let summary = h
        .sync
        .wait_for_role("Observer", Duration::from_secs(30), &CancelToken::new())
        .await
        .unwrap();

    assert!(summary.peers.is_empty());
    assert_eq!(summary.elapsed_ms, 0);
    assert_eq!(h.factory.constructions(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_role_times_out_on_dead_peer() {
    let h = harness(1);
    h.peer("server-01")
        .script_heartbeats(std::iter::repeat(HeartbeatReply::Unreachable).take(1_000));

    let err = h
        .sync
        .wait_for_role("Server", Duration::from_secs(10), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.phase(), Some(Phase::ConfirmingPeer));
    assert_eq!(err.peer(), Some("10.0.0.1"));
    // Eleven polls per ten-second check, one check per workflow attempt.
    let calls = h.peer("server-01").heartbeat_calls();
    assert!((30..=36).contains(&calls), "{calls} heartbeats");
    assert_eq!(h.peer("server-01").server_online_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_restarts_confirmation() {
    let h = harness(1);
    let peer = h.peer("server-01");
    // More failures than one ten-second check can absorb.
    peer.script_heartbeats(std::iter::repeat(HeartbeatReply::Unreachable).take(15));

    h.sync
        .wait_for_role("Server", Duration::from_secs(10), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(peer.heartbeat_calls(), 16);
    assert_eq!(peer.server_online_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn wait_for_role_waits_for_server_online() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_server_online([
        HeartbeatReply::Unreachable,
        HeartbeatReply::Unhealthy(503),
        HeartbeatReply::Unhealthy(503),
    ]);

    let summary = h
        .sync
        .wait_for_role("Server", Duration::from_secs(30), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(peer.heartbeat_calls(), 1);
    assert_eq!(peer.server_online_calls(), 4);
    // Confirmed only once the server side came online, three intervals later.
    assert!((3_000..4_000).contains(&summary.elapsed_ms), "{}", summary.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn server_never_online_times_out_in_confirmation() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_server_online(std::iter::repeat(HeartbeatReply::Unhealthy(503)).take(1_000));

    let err = h
        .sync
        .wait_for_role("Server", Duration::from_secs(5), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.phase(), Some(Phase::ConfirmingPeer));
    // Heartbeat is re-checked at the start of every attempt.
    assert_eq!(peer.heartbeat_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn dispatch_completes_after_pending_running_completed() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_statuses([
        ExecutionStatus::Pending,
        ExecutionStatus::Running,
        ExecutionStatus::ExecutionCompleted,
    ]);

    let summary = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(peer.dispatch_calls(), 1);
    assert_eq!(peer.state_calls(), 3);
    let instruction_id = summary.peers[0].instruction_id.clone().unwrap();
    assert_eq!(peer.deleted(), vec![instruction_id]);
    assert_eq!(peer.sent()[0], workload());
}

#[tokio::test(start_paused = true)]
async fn dispatch_surfaces_reported_error_reason() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_states([
        ExecutionState::new(ExecutionStatus::Running),
        ExecutionState::failed(ErrorReason::Other(42), "exit code 42"),
    ]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason().code(), 42);
    assert!(!err.is_timeout());
    match &err {
        SyncError::WorkloadFailed {
            peer: host,
            operation,
            message,
            ..
        } => {
            assert_eq!(host, "10.0.0.1");
            assert_eq!(operation, "ExampleWorkload");
            assert_eq!(message, "exit code 42");
        }
        other => panic!("expected workload failure, got {other:?}"),
    }
    // Reason 42 is transient, so the whole workflow was redone each attempt.
    assert_eq!(peer.dispatch_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn dispatch_failure_without_reason_defaults_to_workload_failed() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_statuses([ExecutionStatus::Failed]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason(), ErrorReason::WorkloadFailed);
}

#[tokio::test(start_paused = true)]
async fn contract_failure_reason_is_not_retried() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_states([ExecutionState::failed(
        ErrorReason::DependencyNotFound,
        "missing package",
    )]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.reason(), ErrorReason::DependencyNotFound);
    assert_eq!(peer.dispatch_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatch_times_out_distinctly_from_failure() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_statuses([ExecutionStatus::Pending, ExecutionStatus::Running]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(10),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.reason(), ErrorReason::ApiStatePollingTimeout);
    assert_eq!(err.phase(), Some(Phase::PollingForCompletion));
    assert!(!matches!(err, SyncError::WorkloadFailed { .. }));
    // A polling timeout restarts the workflow, so every attempt re-dispatched.
    assert_eq!(peer.dispatch_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_poll_is_not_retried() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_statuses([ExecutionStatus::Running]);

    let cancel = CancelToken::new();
    let instructions = workload();
    let (result, _) = tokio::join!(
        h.sync.send_instructions_and_await_completion(
            "Server",
            &instructions,
            Duration::from_secs(3600),
            &cancel,
        ),
        async {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(peer.dispatch_calls(), 1);
    assert_eq!(peer.state_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_contacts_no_peer() {
    let h = harness(1);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = h
        .sync
        .wait_for_role("Server", Duration::from_secs(30), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(h.peer("server-01").heartbeat_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_dispatch_restarts_workflow() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_dispatches([DispatchReply::Reject(503)]);

    h.sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(peer.dispatch_calls(), 2);
    assert_eq!(peer.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispatch_rejected_beyond_budget_reports_phase() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_dispatches([DispatchReply::Reject(500); 5]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::DispatchingInstructions));
    assert_eq!(err.reason(), ErrorReason::HttpNonSuccessResponse);
    assert_eq!(peer.dispatch_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn empty_acknowledgment_is_retried() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.script_dispatches([DispatchReply::EmptyAck]);

    h.sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(peer.dispatch_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_state_read_failures_do_not_redispatch() {
    let h = harness(1);
    let peer = h.peer("server-01");
    peer.fail_state_reads(2);

    h.sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(peer.dispatch_calls(), 1);
    assert_eq!(peer.state_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn failing_peer_does_not_stop_siblings() {
    let h = harness(3);
    h.peer("server-01").script_statuses([
        ExecutionStatus::Running,
        ExecutionStatus::Running,
        ExecutionStatus::ExecutionCompleted,
    ]);
    h.peer("server-02").script_states([ExecutionState::failed(
        ErrorReason::DependencyNotFound,
        "missing package",
    )]);
    h.peer("server-03").script_states([ExecutionState::failed(
        ErrorReason::InstructionsNotValid,
        "bad profile",
    )]);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    // First failure in topology order.
    assert_eq!(err.peer(), Some("10.0.0.2"));
    assert_eq!(err.reason(), ErrorReason::DependencyNotFound);

    let sibling = h.peer("server-01");
    assert_eq!(sibling.state_calls(), 3);
    assert_eq!(sibling.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn peers_are_driven_concurrently() {
    let h = harness(2);
    for name in ["server-01", "server-02"] {
        h.peer(name).script_statuses([
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::ExecutionCompleted,
        ]);
    }

    let summary = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    // Each peer needs two poll intervals; run one after the other it would be four.
    assert!((2_000..3_000).contains(&summary.elapsed_ms), "{}", summary.elapsed_ms);
}

#[tokio::test(start_paused = true)]
async fn invalid_instructions_fail_before_any_call() {
    let h = harness(1);

    let err = h
        .sync
        .send_instructions_and_await_completion(
            "Server",
            &Instructions::start_execution(vec![]),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::InvalidInstructions(_)));
    assert_eq!(h.peer("server-01").dispatch_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_before_dispatch_sends_reset_first() {
    let h = harness_with(
        1,
        SyncSettings {
            reset_before_dispatch: true,
            ..settings()
        },
        RetrySettings::new(3, 500),
    );

    h.sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    let peer = h.peer("server-01");
    assert_eq!(
        peer.sent_types(),
        vec![
            InstructionsType::ClientServerReset,
            InstructionsType::ClientServerStartExecution
        ]
    );
    assert_eq!(peer.deleted().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_role_resets_every_peer() {
    let h = harness(2);

    let summary = h
        .sync
        .reset_role("server", &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.peers.len(), 2);
    for name in ["server-01", "server-02"] {
        assert_eq!(
            h.peer(name).sent_types(),
            vec![InstructionsType::ClientServerReset]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn journal_records_terminal_status() {
    let h = harness(2);
    let store = Arc::new(MemoryStateStore::new());
    let sync = h.sync.with_journal(store.clone());
    h.factory
        .peer("server-02")
        .unwrap()
        .script_states([ExecutionState::failed(ErrorReason::Other(42), "exit 42")]);

    let _ = sync
        .send_instructions_and_await_completion(
            "Server",
            &workload(),
            Duration::from_secs(300),
            &CancelToken::new(),
        )
        .await;

    let ok = sync
        .last_known_dispatch("Server", "server-01")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ok.status, ExecutionStatus::ExecutionCompleted);
    assert_eq!(ok.host, "10.0.0.1");

    let failed = sync
        .last_known_dispatch("server", "SERVER-02")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error_reason, Some(ErrorReason::Other(42)));
    assert_eq!(failed.error_message.as_deref(), Some("exit 42"));
    assert_eq!(store.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_notifier_sends_exit_to_listed_roles() {
    let h = harness(2);
    h.peer("server-02")
        .script_dispatches([DispatchReply::Reject(500)]);

    let mut notifier = h.sync.shutdown_notifier();
    notifier.add_role("Server").add_role("Client").add_role("server");
    assert_eq!(notifier.roles().len(), 2);

    let failures = notifier.notify_all().await;

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].agent, "server-02");
    assert_eq!(failures[0].error.phase(), Some(Phase::NotifyingExit));
    for name in ["server-01", "client-01"] {
        assert_eq!(
            h.peer(name).sent_types(),
            vec![InstructionsType::ClientServerExit]
        );
    }
    assert_eq!(h.peer("server-02").dispatch_calls(), 1);
}
