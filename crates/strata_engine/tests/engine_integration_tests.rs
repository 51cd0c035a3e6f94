//! Integration tests for planning and applying compositions.

use std::sync::Arc;
use std::time::Duration;

use strata_core::{Action, Composition, CoreError, Properties, Value};
use strata_engine::{
    CreateRequest, EngineConfig, EngineError, Executor, IdempotencyKey, LocalProvider,
    MockProvider, ProviderError, ResolvedProperties, ResourceProvider, RetryPolicy, RunOutcome,
    SkipReason, StepFailure, StepState,
};
use strata_state::{FileStateStore, MemoryStateStore, StateStore};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn net_and_db(db_kind: &str, cidr: &str) -> Composition {
    let mut app = Composition::new("App");
    let root = app.root_mut();
    let net = root
        .define_resource("Net", "network.vpc", Properties::new().with("cidr", cidr))
        .unwrap();
    root.define_resource(
        "Db",
        db_kind,
        Properties::new()
            .with("vpcId", net.id())
            .with("engine", db_kind),
    )
    .unwrap();
    app
}

fn net_only() -> Composition {
    let mut app = Composition::new("App");
    app.root_mut()
        .define_resource("Net", "network.vpc", Properties::new().with("cidr", "10.0.0.0/16"))
        .unwrap();
    app
}

/// A -> B -> C plus an unrelated X.
fn chain_with_sibling() -> Composition {
    let mut app = Composition::new("Chain");
    let root = app.root_mut();
    let a = root.define_resource("A", "test.a", Properties::new()).unwrap();
    let b = root
        .define_resource("B", "test.b", Properties::new().with("a", a.id()))
        .unwrap();
    root.define_resource("C", "test.c", Properties::new().with("b", b.id()))
        .unwrap();
    root.define_resource("X", "test.x", Properties::new().with("size", 1i64))
        .unwrap();
    app
}

/// Db reads an attribute Net never produces; App hangs off Db.
fn reference_to_missing_output() -> Composition {
    let mut app = Composition::new("App");
    let root = app.root_mut();
    let net = root
        .define_resource("Net", "network.vpc", Properties::new().with("cidr", "10.0.0.0/16"))
        .unwrap();
    let db = root
        .define_resource(
            "Db",
            "database.instance",
            Properties::new().with("vpcId", net.output("missing")),
        )
        .unwrap();
    root.define_resource("App", "compute.instance", Properties::new().with("db", db.id()))
        .unwrap();
    app
}

struct Harness {
    provider: MockProvider,
    store: Arc<MemoryStateStore>,
    executor: Executor,
}

fn harness(provider: MockProvider, config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStateStore::new());
    let executor = Executor::new(Arc::new(provider.clone()), store.clone(), config);
    Harness {
        provider,
        store,
        executor,
    }
}

impl Harness {
    async fn converge(&self, app: &Composition) -> strata_engine::RunReport {
        let plan = self.executor.plan(app).unwrap();
        self.executor
            .apply(&plan, &CancellationToken::new())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_first_apply_creates_everything() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    let report = h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;

    assert!(report.is_success());
    assert_eq!(report.waves, 2);
    assert_eq!(h.store.len(), 2);

    let states = h.store.load().unwrap();
    let net_id = states["Net"].provider_id.clone();
    assert_eq!(
        states["Db"].last_properties.get("vpcId"),
        Some(&Value::from(net_id.as_str()))
    );
    assert!(states["Db"].dependencies.contains("Net"));
}

#[tokio::test]
async fn test_unchanged_composition_plans_only_noops() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    let app = net_and_db("postgres", "10.0.0.0/16");
    h.converge(&app).await;
    h.provider.clear_calls();

    let plan = h.executor.plan(&app).unwrap();
    assert!(plan.steps.iter().all(|s| s.action == Action::NoOp));
    assert!(!plan.has_changes());

    let report = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn test_planning_has_no_side_effects() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    let app = net_and_db("postgres", "10.0.0.0/16");

    let first = h.executor.plan(&app).unwrap();
    let second = h.executor.plan(&app).unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.call_count(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_steps_come_after_their_dependencies() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    let plan = h.executor.plan(&chain_with_sibling()).unwrap();

    for (index, step) in plan.steps.iter().enumerate() {
        assert!(step.after.iter().all(|&before| before < index));
        for dep in &step.dependencies {
            let dep_index = plan
                .steps
                .iter()
                .position(|s| &s.logical_path == dep)
                .unwrap();
            assert!(dep_index < index, "{} must precede {}", dep, step.logical_path);
        }
    }
}

#[tokio::test]
async fn test_cycle_is_rejected_with_its_members() {
    let mut app = Composition::new("Loop");
    let root = app.root_mut();
    let a = root.define_resource("A", "test.a", Properties::new()).unwrap();
    let b = root
        .define_resource("B", "test.b", Properties::new().with("a", a.id()))
        .unwrap();
    root.add_dependency(&a, &b).unwrap();

    let h = harness(MockProvider::new(), EngineConfig::default());
    let err = h.executor.plan(&app).unwrap_err();

    match err {
        EngineError::Core(CoreError::CyclicDependency { cycle }) => {
            assert!(cycle.contains(&"A".to_string()));
            assert!(cycle.contains(&"B".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn test_kind_change_deletes_then_creates() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;
    let old_db = h.store.get("Db").unwrap().unwrap().provider_id;
    h.provider.clear_calls();

    let app = net_and_db("mysql", "10.0.0.0/16");
    let plan = h.executor.plan(&app).unwrap();
    assert_eq!(
        plan.actions(),
        vec![
            ("Db", Action::Delete),
            ("Net", Action::NoOp),
            ("Db", Action::Create)
        ]
    );

    let report = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());

    let methods: Vec<String> = h
        .provider
        .calls_for("Db")
        .into_iter()
        .map(|c| c.method)
        .collect();
    assert_eq!(methods, vec!["delete", "create"]);
    assert!(h.provider.calls_for("Net").is_empty());

    let db = h.store.get("Db").unwrap().unwrap();
    assert_eq!(db.kind, "mysql");
    assert_ne!(db.provider_id, old_db);
    assert_eq!(h.provider.resource_kind(&old_db), None);
}

#[tokio::test]
async fn test_removed_resource_is_deleted_and_others_untouched() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;
    let net_before = h.store.get("Net").unwrap().unwrap();
    h.provider.clear_calls();

    let plan = h.executor.plan(&net_only()).unwrap();
    assert_eq!(
        plan.actions(),
        vec![("Db", Action::Delete), ("Net", Action::NoOp)]
    );

    let report = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
    assert!(h.store.get("Db").unwrap().is_none());
    assert_eq!(h.store.get("Net").unwrap().unwrap(), net_before);
    assert_eq!(h.provider.call_count(), 1);
    assert!(h.provider.was_called("delete"));
}

#[tokio::test]
async fn test_orphans_are_deleted_dependents_first() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;
    h.provider.clear_calls();

    let plan = h.executor.plan(&Composition::new("Empty")).unwrap();
    assert_eq!(
        plan.actions(),
        vec![("Db", Action::Delete), ("Net", Action::Delete)]
    );

    let report = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.waves, 2);
    assert!(h.store.is_empty());
    assert_eq!(h.provider.resource_count(), 0);
}

#[tokio::test]
async fn test_failure_skips_dependents_and_spares_siblings() {
    let provider = MockProvider::new().fail_on("A", ProviderError::invalid("quota exceeded"));
    let h = harness(provider, EngineConfig::default());
    let report = h.converge(&chain_with_sibling()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert!(matches!(
        report.state_of("A"),
        Some(StepState::Failed {
            failure: StepFailure::Provider { .. }
        })
    ));
    assert_eq!(
        report.state_of("B"),
        Some(&StepState::Skipped {
            reason: SkipReason::DependencyFailed {
                logical_path: "A".to_string()
            }
        })
    );
    assert!(matches!(report.state_of("C"), Some(StepState::Skipped { .. })));
    assert_eq!(report.state_of("X"), Some(&StepState::Committed));

    // Nothing downstream of the failure reached the provider or the store.
    assert!(h.provider.calls_for("B").is_empty());
    assert!(h.provider.calls_for("C").is_empty());
    let states = h.store.load().unwrap();
    assert_eq!(states.keys().collect::<Vec<_>>(), vec!["X"]);
}

#[tokio::test]
async fn test_missing_output_fails_the_reader_and_skips_its_dependents() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    let report = h.converge(&reference_to_missing_output()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.state_of("Net"), Some(&StepState::Committed));
    assert_eq!(
        report.state_of("Db"),
        Some(&StepState::Failed {
            failure: StepFailure::Unresolved {
                target: "Net".to_string(),
                attribute: "missing".to_string(),
            }
        })
    );
    assert_eq!(
        report.state_of("App"),
        Some(&StepState::Skipped {
            reason: SkipReason::DependencyFailed {
                logical_path: "Db".to_string()
            }
        })
    );

    assert!(h.provider.calls_for("Db").is_empty());
    assert!(h.provider.calls_for("App").is_empty());
    let states = h.store.load().unwrap();
    assert_eq!(states.keys().collect::<Vec<_>>(), vec!["Net"]);
}

#[tokio::test]
async fn test_panicking_call_fails_its_step_and_spares_siblings() {
    let h = harness(MockProvider::new().panic_on("A"), EngineConfig::default());
    let report = h.converge(&chain_with_sibling()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert!(matches!(
        report.state_of("A"),
        Some(StepState::Failed {
            failure: StepFailure::Provider { .. }
        })
    ));
    assert!(matches!(report.state_of("B"), Some(StepState::Skipped { .. })));
    assert!(matches!(report.state_of("C"), Some(StepState::Skipped { .. })));
    assert_eq!(report.state_of("X"), Some(&StepState::Committed));

    let states = h.store.load().unwrap();
    assert_eq!(states.keys().collect::<Vec<_>>(), vec!["X"]);
}

#[tokio::test]
async fn test_create_after_lost_response_converges_to_new_properties() {
    // A create that reached the provider but whose response never came back.
    let provider = Arc::new(LocalProvider::in_memory());
    let mut stale = ResolvedProperties::new();
    stale.insert("cidr".to_string(), serde_json::json!("10.0.0.0/16"));
    let orphan = provider
        .create(CreateRequest {
            logical_path: "Net".to_string(),
            kind: "network.vpc".to_string(),
            properties: stale,
            idempotency_key: IdempotencyKey::for_resource("network.vpc", "Net"),
        })
        .await
        .unwrap();

    let store = Arc::new(MemoryStateStore::new());
    let executor = Executor::new(provider.clone(), store.clone(), EngineConfig::default());
    let mut app = Composition::new("App");
    app.root_mut()
        .define_resource("Net", "network.vpc", Properties::new().with("cidr", "10.9.0.0/16"))
        .unwrap();

    let plan = executor.plan(&app).unwrap();
    assert_eq!(plan.actions(), vec![("Net", Action::Create)]);
    let report = executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());

    let state = store.get("Net").unwrap().unwrap();
    assert_eq!(state.provider_id, orphan.provider_id);
    assert_eq!(state.outputs["cidr"], serde_json::json!("10.9.0.0/16"));
    let remote = &provider.resources()[&orphan.provider_id];
    assert_eq!(remote.properties["cidr"], serde_json::json!("10.9.0.0/16"));
    assert_eq!(provider.resources().len(), 1);

    assert!(!executor.plan(&app).unwrap().has_changes());
}

#[tokio::test]
async fn test_rerun_after_failure_only_touches_unfinished_steps() {
    let provider = MockProvider::new().fail_on("B", ProviderError::invalid("bad input"));
    let h = harness(provider, EngineConfig::default());
    let app = chain_with_sibling();

    let first = h.converge(&app).await;
    assert_eq!(first.failed_paths(), vec!["B", "C"]);
    assert!(h.store.get("A").unwrap().is_some());

    h.provider.heal("B");
    h.provider.clear_calls();

    let plan = h.executor.plan(&app).unwrap();
    assert_eq!(
        plan.actions(),
        vec![
            ("A", Action::NoOp),
            ("B", Action::Create),
            ("C", Action::Create),
            ("X", Action::NoOp)
        ]
    );
    let second = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();

    assert!(second.is_success());
    assert!(h.provider.calls_for("A").is_empty());
    assert!(h.provider.calls_for("X").is_empty());
    assert_eq!(h.store.len(), 4);
}

#[tokio::test]
async fn test_transient_errors_are_retried() {
    let provider = MockProvider::new().fail_times("Net", 2);
    let config = EngineConfig::default()
        .with_retry(RetryPolicy::attempts(3).with_backoff(Duration::from_millis(5)));
    let h = harness(provider, config);

    let report = h.converge(&net_only()).await;

    assert!(report.is_success());
    assert_eq!(report.steps[0].attempts, 3);
    assert_eq!(h.provider.calls_for("Net").len(), 3);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let provider = MockProvider::new().fail_times("Net", 5);
    let config = EngineConfig::default()
        .with_retry(RetryPolicy::attempts(2).with_backoff(Duration::from_millis(5)));
    let h = harness(provider, config);

    let report = h.converge(&net_only()).await;

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.steps[0].attempts, 2);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_slow_call_times_out() {
    let provider = MockProvider::new().with_delay("Net", Duration::from_secs(10));
    let config = EngineConfig::default().with_timeout("network.vpc", Duration::from_secs(1));
    let h = harness(provider, config);

    let report = h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;

    assert!(matches!(
        report.state_of("Net"),
        Some(StepState::Failed {
            failure: StepFailure::Timeout { .. }
        })
    ));
    assert!(matches!(report.state_of("Db"), Some(StepState::Skipped { .. })));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_timeout_reports_the_attempts_it_cut_short() {
    let provider = MockProvider::new().fail_times("Net", 1000);
    let retry = RetryPolicy {
        multiplier: 1.0,
        ..RetryPolicy::attempts(1000).with_backoff(Duration::from_millis(10))
    };
    let config = EngineConfig::default()
        .with_retry(retry)
        .with_timeout("network.vpc", Duration::from_millis(200));
    let h = harness(provider, config);

    let report = h.converge(&net_only()).await;

    assert!(matches!(
        report.state_of("Net"),
        Some(StepState::Failed {
            failure: StepFailure::Timeout { .. }
        })
    ));
    let attempts = report.steps[0].attempts as usize;
    assert!(attempts > 1, "only {} attempts recorded", attempts);
    assert_eq!(attempts, h.provider.calls_for("Net").len());
}

#[tokio::test]
async fn test_cancellation_drains_in_flight_and_skips_the_rest() {
    let provider = MockProvider::new().with_delay("A", Duration::from_millis(300));
    let h = harness(provider, EngineConfig::default());
    let plan = h.executor.plan(&chain_with_sibling()).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = h.executor.apply(&plan, &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.state_of("A"), Some(&StepState::Committed));
    assert_eq!(report.state_of("X"), Some(&StepState::Committed));
    assert_eq!(
        report.state_of("B"),
        Some(&StepState::Skipped {
            reason: SkipReason::Cancelled
        })
    );
    assert!(h.provider.calls_for("B").is_empty());
    assert_eq!(h.store.len(), 2);
}

#[tokio::test]
async fn test_parallelism_is_bounded() {
    let mut provider = MockProvider::new();
    let mut app = Composition::new("Wide");
    for i in 0..6 {
        let name = format!("R{}", i);
        provider = provider.with_delay(name.clone(), Duration::from_millis(50));
        app.root_mut()
            .define_resource(&name, "test.wide", Properties::new())
            .unwrap();
    }
    let h = harness(provider, EngineConfig::default().with_parallelism(2));

    let report = h.converge(&app).await;

    assert!(report.is_success());
    assert_eq!(report.waves, 1);
    assert!(h.provider.max_concurrency() <= 2);
    assert_eq!(h.store.len(), 6);
}

#[tokio::test]
async fn test_deferred_update_short_circuits_when_inputs_settle() {
    let h = harness(MockProvider::new(), EngineConfig::default());
    h.converge(&net_and_db("postgres", "10.0.0.0/16")).await;
    h.provider.clear_calls();

    // Net changes in place; Db only reads Net's id, which survives the update.
    let plan = h.executor.plan(&net_and_db("postgres", "10.1.0.0/16")).unwrap();
    assert_eq!(
        plan.actions(),
        vec![("Net", Action::Update), ("Db", Action::Update)]
    );
    assert!(plan.steps[1].deferred);

    let report = h.executor.apply(&plan, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(h.provider.calls_for("Net").len(), 1);
    assert!(h.provider.calls_for("Db").is_empty());
    assert!(!report.step("Db", Action::Update).unwrap().provider_called);
}

#[tokio::test]
async fn test_state_survives_on_disk() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let provider = MockProvider::new();
    let app = net_and_db("postgres", "10.0.0.0/16");

    {
        let store = Arc::new(FileStateStore::new(&state_path));
        let executor = Executor::new(Arc::new(provider.clone()), store, EngineConfig::default());
        let plan = executor.plan(&app).unwrap();
        let report = executor.apply(&plan, &CancellationToken::new()).await.unwrap();
        assert!(report.is_success());
    }

    let store = Arc::new(FileStateStore::new(&state_path));
    assert_eq!(store.load().unwrap().len(), 2);

    let executor = Executor::new(Arc::new(provider), store, EngineConfig::default());
    let plan = executor.plan(&app).unwrap();
    assert!(!plan.has_changes());
}

#[tokio::test]
async fn test_corrupted_state_is_fatal() {
    let dir = tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(&state_path, "{ not json").unwrap();

    let store = Arc::new(FileStateStore::new(&state_path));
    let executor = Executor::new(Arc::new(MockProvider::new()), store, EngineConfig::default());

    let err = executor.plan(&net_only()).unwrap_err();
    assert!(matches!(err, EngineError::State(_)));
}
