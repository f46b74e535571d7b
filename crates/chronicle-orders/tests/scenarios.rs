//! End-to-end scenarios: orders written through the repository and read
//! back through replay, snapshots, upcasting and the projection engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use chronicle_core::checkpoint::{CheckpointStore, DeadLetterQueue};
use chronicle_core::command::{EventContext, retry_on_conflict};
use chronicle_core::config::{ProjectionConfig, RepositoryConfig};
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, NewEvent};
use chronicle_core::memory::{
    InMemoryCheckpointStore, InMemoryDeadLetterQueue, InMemoryEventStore, InMemorySnapshotStore,
};
use chronicle_core::projection::{BatchOutcome, ProjectionEngine, ProjectionRunner};
use chronicle_core::repository::AggregateRepository;
use chronicle_core::store::EventStore;
use chronicle_orders::application::command_handlers::{
    handle_add_item, handle_create_order, handle_ship_order,
};
use chronicle_orders::application::projections::{
    InMemoryOrderSummaryStore, ORDER_SUMMARIES_PROJECTION, OrderSummaryProjection,
};
use chronicle_orders::application::query_handlers::{get_order_by_id, get_order_summary};
use chronicle_orders::domain::aggregates::{Order, OrderStatus, order_stream_id};
use chronicle_orders::domain::commands::{AddItem, CreateOrder, ShipOrder};
use chronicle_orders::domain::events::{ItemAdded, OrderEvent};
use chronicle_orders::domain::upcasters::{LEGACY_CUSTOMER_EMAIL, order_upcasters};
use chronicle_test_support::{
    FailingProjection, FailingSnapshotStore, FixedClock, FlakyCheckpointStore, FlakyEventStore,
    RecordingProjection,
};
use serde_json::json;
use tokio::task::JoinSet;
use uuid::Uuid;

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()))
}

fn repo(events: &InMemoryEventStore) -> AggregateRepository<Order> {
    AggregateRepository::new(Arc::new(events.clone()), clock())
        .with_upcasters(Arc::new(order_upcasters().unwrap()))
}

fn fast_polling() -> ProjectionConfig {
    ProjectionConfig {
        batch_size: 16,
        poll_interval: Duration::from_millis(5),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
    }
}

async fn create_order(repo: &AggregateRepository<Order>) -> Uuid {
    let order_id = Uuid::new_v4();
    handle_create_order(
        &CreateOrder {
            correlation_id: Uuid::new_v4(),
            order_id,
            customer_id: Uuid::new_v4(),
            customer_email: "ada@example.com".to_owned(),
        },
        repo,
    )
    .await
    .unwrap();
    order_id
}

async fn add_item(repo: &AggregateRepository<Order>, order_id: Uuid, quantity: u32) {
    handle_add_item(
        &AddItem {
            correlation_id: Uuid::new_v4(),
            order_id,
            sku: format!("SKU-{quantity}"),
            quantity,
            unit_price_cents: 100,
        },
        repo,
    )
    .await
    .unwrap();
}

/// Waits until `checkpoint_name` reaches `target`, or panics after ~2s.
async fn wait_for_checkpoint(checkpoints: &InMemoryCheckpointStore, name: &str, target: i64) {
    for _ in 0..400 {
        if checkpoints.get_checkpoint(name).await.unwrap() >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("checkpoint {name} never reached {target}");
}

// --- scenario 1: three events appended to a new stream ---

#[tokio::test]
async fn test_three_events_on_new_order_get_versions_one_to_three() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let order_id = Uuid::new_v4();
    let stream_id = order_stream_id(order_id);
    let context = EventContext::new(Uuid::new_v4());
    let mut order = repo.load(&stream_id).await.unwrap();
    assert_eq!(order.version(), 0);
    let created = order
        .state()
        .decide_create(order_id, Uuid::new_v4(), "ada@example.com")
        .unwrap();
    order.record(created, &context, repo.clock()).unwrap();
    for sku in ["SKU-1", "SKU-2"] {
        let added = order.state().decide_add_item(sku, 1, 100).unwrap();
        order.record(added, &context, repo.clock()).unwrap();
    }

    // Act
    let version = repo.save(&mut order).await.unwrap();

    // Assert
    assert_eq!(version, 3);
    assert!(order.uncommitted_events().is_empty());
    let stored = events.read_stream(&stream_id, 0, 10).await.unwrap();
    let versions: Vec<i64> = stored.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    let sequences: Vec<i64> = stored.iter().map(|e| e.global_sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

// --- scenario 2: concurrent writers on the same version ---

#[tokio::test]
async fn test_second_writer_on_same_version_conflicts() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let order_id = create_order(&repo).await;
    for quantity in 1..=4 {
        add_item(&repo, order_id, quantity).await;
    }
    let stream_id = order_stream_id(order_id);
    let mut first = repo.load(&stream_id).await.unwrap();
    let mut second = repo.load(&stream_id).await.unwrap();
    assert_eq!(first.version(), 5);
    let context = EventContext::new(Uuid::new_v4());
    for order in [&mut first, &mut second] {
        let event = order.state().decide_add_item("SKU-X", 1, 100).unwrap();
        order.record(event, &context, repo.clock()).unwrap();
    }

    // Act
    let winner = repo.save(&mut first).await;
    let loser = repo.save(&mut second).await;

    // Assert
    assert_eq!(winner.unwrap(), 6);
    match loser {
        Err(DomainError::ConcurrencyConflict {
            stream_id: conflict_stream,
            expected,
            actual,
        }) => {
            assert_eq!(conflict_stream, stream_id);
            assert_eq!(expected, 5);
            assert_eq!(actual, 6);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(second.uncommitted_events().len(), 1);
    assert_eq!(events.stream_version(&stream_id).await.unwrap(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_appends_on_same_version_have_one_winner() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let order_id = create_order(&repo).await;
    for quantity in 1..=4 {
        add_item(&repo, order_id, quantity).await;
    }
    let stream_id = order_stream_id(order_id);
    let context = EventContext::new(Uuid::new_v4());
    let mut writers = JoinSet::new();
    for writer in 0..8_u32 {
        let events = events.clone();
        let stream_id = stream_id.clone();
        let batch: Vec<NewEvent> = (1..=2)
            .map(|quantity| {
                OrderEvent::ItemAdded(ItemAdded {
                    order_id,
                    sku: format!("SKU-W{writer}"),
                    quantity,
                    unit_price_cents: 100,
                })
                .to_new_event(&context, Utc::now())
                .unwrap()
            })
            .collect();
        writers.spawn(async move { events.append(&stream_id, 5, &batch).await });
    }

    // Act
    let results = writers.join_all().await;

    // Assert
    let winners: Vec<i64> = results.iter().filter_map(|r| r.as_ref().ok().copied()).collect();
    assert_eq!(winners, vec![7]);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(DomainError::is_conflict)
    );
    assert_eq!(events.stream_version(&stream_id).await.unwrap(), 7);
    let versions: Vec<i64> = events
        .read_stream(&stream_id, 0, 100)
        .await
        .unwrap()
        .iter()
        .map(|e| e.version)
        .collect();
    assert_eq!(versions, (1..=7).collect::<Vec<_>>());
}

// --- snapshot store failures ---

fn repo_with_failing_snapshots(
    events: &InMemoryEventStore,
    background_snapshots: bool,
) -> AggregateRepository<Order> {
    repo(events)
        .with_snapshots(Arc::new(FailingSnapshotStore))
        .with_config(RepositoryConfig {
            snapshot_interval: 1,
            read_batch_size: 50,
            background_snapshots,
        })
        .unwrap()
}

#[tokio::test]
async fn test_inline_snapshot_failure_does_not_fail_save() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo_with_failing_snapshots(&events, false);
    let order_id = create_order(&repo).await;
    let mut order = repo.load(&order_stream_id(order_id)).await.unwrap();
    let event = order.state().decide_add_item("SKU-1", 2, 100).unwrap();
    order
        .record(event, &EventContext::new(Uuid::new_v4()), repo.clock())
        .unwrap();

    // Act
    let result = repo.save(&mut order).await;

    // Assert
    assert_eq!(result.unwrap(), 2);
    assert!(order.uncommitted_events().is_empty());
    let reloaded = repo.load(&order_stream_id(order_id)).await.unwrap();
    assert_eq!(reloaded.version(), 2);
    assert_eq!(reloaded.state().total_cents(), 200);
}

#[tokio::test]
async fn test_background_snapshot_failure_does_not_fail_save() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo_with_failing_snapshots(&events, true);
    let order_id = create_order(&repo).await;

    // Act
    let result = handle_add_item(
        &AddItem {
            correlation_id: Uuid::new_v4(),
            order_id,
            sku: "SKU-1".to_owned(),
            quantity: 1,
            unit_price_cents: 100,
        },
        &repo,
    )
    .await;
    tokio::task::yield_now().await;

    // Assert
    assert_eq!(result.unwrap().version, 2);
    assert_eq!(
        events.stream_version(&order_stream_id(order_id)).await.unwrap(),
        2
    );
}

// --- scenario 3: snapshot at 10, five more events ---

#[tokio::test]
async fn test_snapshot_plus_tail_equals_full_replay() {
    // Arrange
    let events = InMemoryEventStore::new();
    let snapshots = InMemorySnapshotStore::new();
    let snapshotting = repo(&events)
        .with_snapshots(Arc::new(snapshots.clone()))
        .with_config(RepositoryConfig {
            snapshot_interval: 10,
            read_batch_size: 3,
            background_snapshots: false,
        })
        .unwrap();
    let order_id = create_order(&snapshotting).await;
    for quantity in 1..=14 {
        add_item(&snapshotting, order_id, quantity).await;
    }
    let stream_id = order_stream_id(order_id);

    // Act
    let from_snapshot = snapshotting.load(&stream_id).await.unwrap();
    let full_replay = repo(&events).load(&stream_id).await.unwrap();

    // Assert
    assert_eq!(snapshots.saved_versions(&stream_id).unwrap(), vec![10]);
    assert_eq!(from_snapshot.version(), 15);
    assert_eq!(from_snapshot.version(), full_replay.version());
    assert_eq!(from_snapshot.state(), full_replay.state());
    assert_eq!(from_snapshot.state().item_count(), (1..=14).sum::<i64>());
}

// --- scenario 4: v1 order.created upcast on load ---

#[tokio::test]
async fn test_v1_order_created_loads_with_legacy_email() {
    // Arrange
    let events = InMemoryEventStore::new();
    let order_id = Uuid::new_v4();
    let v1_created = NewEvent {
        event_id: Uuid::new_v4(),
        event_type: "order.created".to_owned(),
        schema_version: 1,
        payload: json!({ "order_id": order_id, "customer_id": Uuid::new_v4() }),
        correlation_id: Uuid::new_v4(),
        causation_id: Uuid::new_v4(),
        occurred_at: Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap(),
    };
    events
        .append(&order_stream_id(order_id), 0, &[v1_created])
        .await
        .unwrap();

    // Act
    let view = get_order_by_id(order_id, &repo(&events)).await.unwrap();

    // Assert
    assert_eq!(view.customer_email, LEGACY_CUSTOMER_EMAIL);
    assert_eq!(view.status, OrderStatus::Placed);
}

#[tokio::test]
async fn test_v1_order_created_without_upcaster_is_a_serialization_error() {
    // Arrange
    let events = InMemoryEventStore::new();
    let order_id = Uuid::new_v4();
    let v1_created = NewEvent {
        event_id: Uuid::new_v4(),
        event_type: "order.created".to_owned(),
        schema_version: 1,
        payload: json!({ "order_id": order_id, "customer_id": Uuid::new_v4() }),
        correlation_id: Uuid::new_v4(),
        causation_id: Uuid::new_v4(),
        occurred_at: Utc::now(),
    };
    events
        .append(&order_stream_id(order_id), 0, &[v1_created])
        .await
        .unwrap();
    let bare: AggregateRepository<Order> =
        AggregateRepository::new(Arc::new(events.clone()), clock());

    // Act
    let result = bare.load(&order_stream_id(order_id)).await;

    // Assert
    assert!(matches!(result, Err(DomainError::Serialization(_))));
}

// --- scenario 5: crash after handling, before the checkpoint ---

#[tokio::test]
async fn test_crash_before_checkpoint_replays_batch_without_changing_read_model() {
    // Arrange: 20 orders x (created + 4 items) = 100 events.
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    for _ in 0..20 {
        let order_id = create_order(&repo).await;
        for quantity in 1..=4 {
            add_item(&repo, order_id, quantity).await;
        }
    }
    assert_eq!(events.head_global_sequence().await.unwrap(), 100);

    let summaries = InMemoryOrderSummaryStore::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let runner = ProjectionRunner::new(
        Arc::new(OrderSummaryProjection::new(Arc::new(summaries.clone()))),
        Arc::new(events.clone()),
        Arc::new(FlakyCheckpointStore::new(checkpoints.clone(), 1)),
    )
    .with_upcasters(Arc::new(order_upcasters().unwrap()))
    .with_config(ProjectionConfig {
        batch_size: 100,
        ..fast_polling()
    })
    .unwrap();

    // Act: the checkpoint write after event 100 fails.
    let crashed = runner.run_batch().await;
    let after_crash = summaries.all().unwrap();
    let checkpoint_after_crash = checkpoints
        .get_checkpoint(ORDER_SUMMARIES_PROJECTION)
        .await
        .unwrap();
    let restarted = runner.run_batch().await.unwrap();

    // Assert
    assert!(matches!(crashed, Err(DomainError::StorageUnavailable(_))));
    assert_eq!(checkpoint_after_crash, 0);
    assert_eq!(
        restarted,
        BatchOutcome::Advanced {
            processed: 100,
            handled: 100,
            checkpoint: 100
        }
    );
    assert_eq!(summaries.all().unwrap(), after_crash);
    assert_eq!(after_crash.len(), 20);
    assert!(after_crash.iter().all(|s| s.item_count == 10 && s.last_version == 5));

    // A rebuild from zero yields the same read model.
    let rebuilt = InMemoryOrderSummaryStore::new();
    let rebuild_runner = ProjectionRunner::new(
        Arc::new(OrderSummaryProjection::new(Arc::new(rebuilt.clone()))),
        Arc::new(events),
        Arc::new(InMemoryCheckpointStore::new()),
    )
    .with_config(fast_polling())
    .unwrap();
    while rebuild_runner.run_batch().await.unwrap() != BatchOutcome::Idle {}
    assert_eq!(rebuilt.all().unwrap(), after_crash);
}

// --- projection engine ---

#[tokio::test]
async fn test_engine_keeps_summaries_current_and_stops_on_shutdown() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let summaries = InMemoryOrderSummaryStore::new();
    let checkpoints = InMemoryCheckpointStore::new();
    let mut engine = ProjectionEngine::new(Arc::new(events.clone()), Arc::new(checkpoints.clone()))
        .with_upcasters(Arc::new(order_upcasters().unwrap()))
        .with_config(fast_polling())
        .unwrap();
    engine
        .register_sharded(
            Arc::new(OrderSummaryProjection::new(Arc::new(summaries.clone()))),
            3,
        )
        .unwrap();
    let handle = engine.start();

    // Act
    let order_id = create_order(&repo).await;
    add_item(&repo, order_id, 2).await;
    handle_ship_order(
        &ShipOrder {
            correlation_id: Uuid::new_v4(),
            order_id,
            carrier: "post".to_owned(),
            tracking_number: "TRK-1".to_owned(),
        },
        &repo,
    )
    .await
    .unwrap();
    for shard in 0..3 {
        wait_for_checkpoint(&checkpoints, &format!("order_summaries[{shard}/3]"), 3).await;
    }
    let exits = handle.shutdown().await;

    // Assert
    assert_eq!(exits.len(), 3);
    assert!(exits.iter().all(|exit| exit.result.is_ok()));
    let summary = get_order_summary(order_id, &summaries).await.unwrap();
    assert_eq!(summary.status, OrderStatus::Shipped);
    assert_eq!(summary.item_count, 2);
    assert_eq!(summary.last_version, 3);
}

#[tokio::test]
async fn test_engine_retries_transient_read_failures() {
    // Arrange
    let inner = InMemoryEventStore::new();
    let repo = repo(&inner);
    let order_id = create_order(&repo).await;
    let flaky = Arc::new(FlakyEventStore::new(inner, 3));
    let checkpoints = InMemoryCheckpointStore::new();
    let recording = Arc::new(RecordingProjection::new("audit", &["order.created"]));
    let mut engine = ProjectionEngine::new(flaky.clone(), Arc::new(checkpoints.clone()))
        .with_config(fast_polling())
        .unwrap();
    engine.register(recording.clone()).unwrap();

    // Act
    let handle = engine.start();
    wait_for_checkpoint(&checkpoints, "audit", 1).await;
    let exits = handle.shutdown().await;

    // Assert
    assert_eq!(flaky.remaining_failures(), 0);
    assert!(exits[0].result.is_ok());
    let seen = recording.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].stream_id, order_stream_id(order_id));
}

#[tokio::test]
async fn test_failing_projection_is_dead_lettered_and_isolated() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let order_id = create_order(&repo).await;
    add_item(&repo, order_id, 1).await;
    let checkpoints = InMemoryCheckpointStore::new();
    let dead_letters = InMemoryDeadLetterQueue::new();
    let recording = Arc::new(RecordingProjection::new(
        "audit",
        &["order.created", "order.item_added"],
    ));
    let mut engine = ProjectionEngine::new(Arc::new(events), Arc::new(checkpoints.clone()))
        .with_dead_letters(Arc::new(dead_letters.clone()))
        .with_config(fast_polling())
        .unwrap();
    engine
        .register(Arc::new(FailingProjection::new(
            "mailer",
            &["order.item_added"],
        )))
        .unwrap();
    engine.register(recording.clone()).unwrap();

    // Act
    let handle = engine.start();
    wait_for_checkpoint(&checkpoints, "audit", 2).await;
    for _ in 0..400 {
        if !handle.is_running("mailer") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let mailer_running = handle.is_running("mailer");
    let exits = handle.shutdown().await;

    // Assert
    assert!(!mailer_running);
    assert_eq!(recording.seen_sequences(), vec![1, 2]);
    assert_eq!(checkpoints.get_checkpoint("mailer").await.unwrap(), 1);
    let letters = dead_letters.list("mailer").await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].event.global_sequence, 2);
    let mailer_exit = exits.iter().find(|e| e.projection == "mailer").unwrap();
    assert!(matches!(
        mailer_exit.result,
        Err(DomainError::ProjectionHandler { global_sequence: 2, .. })
    ));
}

// --- conflict resolution at the business layer ---

#[tokio::test]
async fn test_add_item_retries_after_losing_a_race() {
    // Arrange
    let events = InMemoryEventStore::new();
    let repo = repo(&events);
    let order_id = create_order(&repo).await;
    let stream_id = order_stream_id(order_id);
    let mut stale = repo.load(&stream_id).await.unwrap();
    let context = EventContext::new(Uuid::new_v4());

    // Act: a concurrent writer moves the stream on, then the stale copy saves.
    add_item(&repo, order_id, 1).await;
    let event = OrderEvent::ItemAdded(ItemAdded {
        order_id,
        sku: "SKU-STALE".to_owned(),
        quantity: 1,
        unit_price_cents: 100,
    });
    let new_event = event.to_new_event(&context, Utc::now()).unwrap();
    let stale_append = events
        .append(&stream_id, stale.version(), &[new_event])
        .await;
    stale.record(event, &context, repo.clock()).unwrap();
    let (repo_ref, stream_ref, context_ref) = (&repo, &stream_id, &context);
    let retried = retry_on_conflict(3, move || async move {
        let mut fresh = repo_ref.load(stream_ref).await?;
        let event = fresh.state().decide_add_item("SKU-RETRY", 1, 100)?;
        fresh.record(event, context_ref, repo_ref.clock())?;
        repo_ref.save(&mut fresh).await
    })
    .await;

    // Assert
    assert!(matches!(
        stale_append,
        Err(DomainError::ConcurrencyConflict { .. })
    ));
    assert!(repo.save(&mut stale).await.unwrap_err().is_conflict());
    assert_eq!(retried.unwrap(), 3);
}
