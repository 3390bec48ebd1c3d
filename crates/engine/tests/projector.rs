mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use projector_core::{ConfigError, MessageEnvelope, Priority, ProjectionId};
use projector_engine::{InMemoryCursorRepository, ProjectError, ProjectOutcome, ProjectorBuilder, RepositoryError};
use projector_projection::TypedProjection;
use projector_scope::{DisposalCallbacks, LifecycleBus, LifetimeScopeFactory, ScopeError, ScopeEvent};

use common::*;

fn setup(cursors: &[(Key, u64)]) -> (Arc<Journal>, Arc<InMemoryCursorRepository<Key>>) {
    projector_observability::init_for_tests();
    let journal = Arc::new(Journal::default());
    let repository = Arc::new(InMemoryCursorRepository::with_cursors(cursors.iter().copied()));
    (journal, repository)
}

#[tokio::test]
async fn cursors_advance_by_messages_routed() {
    let (journal, repository) = setup(&[("b", 3)]);
    let mut projector = projector(
        &journal,
        &repository,
        vec![recording("a", Priority::Normal), recording("b", Priority::Normal)],
    );

    let outcome = projector.project(&batch(1..=5), &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Completed { processed: 5 });
    assert_eq!(projector.cursor(&"a"), Some(6));
    assert_eq!(projector.cursor(&"b"), Some(6));
    assert_eq!(projector.next_sequence_number().await.unwrap(), 6);
    assert_eq!(
        journal.entries(),
        vec!["a:1", "a:2", "a:3", "b:3", "a:4", "b:4", "a:5", "b:5"]
    );
    assert_eq!(repository.get(&"a"), Some(6));
    assert_eq!(repository.get(&"b"), Some(6));
}

#[tokio::test]
async fn unhandled_payload_still_advances_the_cursor() {
    let (journal, repository) = setup(&[]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);
    let envelope = MessageEnvelope::new(1, Ignored).unwrap();

    let outcome = projector.project_one(&envelope, &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Completed { processed: 1 });
    assert!(journal.entries().is_empty());
    assert_eq!(repository.get(&"a"), Some(2));
}

#[tokio::test]
async fn out_of_range_message_is_rejected_before_any_handler() {
    let (journal, repository) = setup(&[]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);

    let err = projector.project(&batch(2..=2), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::SequenceMismatch { expected: 1, found: 2, .. }));
    assert!(journal.entries().is_empty());
    assert_eq!(projector.cursor(&"a"), Some(1));
}

#[tokio::test]
async fn gap_later_in_the_batch_rejects_the_whole_batch() {
    let (journal, repository) = setup(&[]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);
    let envelopes = vec![created(1), created(2), created(4)];

    let err = projector.project(&envelopes, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::SequenceMismatch { expected: 3, found: 4, .. }));
    assert_eq!(err.sequence_number(), Some(4));
    assert!(journal.entries().is_empty());
}

#[test]
fn duplicate_keys_fail_in_either_order() {
    let (journal, repository) = setup(&[]);
    let a_first = builder(&journal, &repository)
        .register(recording("a", Priority::High))
        .register(failing("a"))
        .build()
        .unwrap_err();
    let b_first = builder(&journal, &repository)
        .register(failing("a"))
        .register(recording("a", Priority::High))
        .build()
        .unwrap_err();

    assert_eq!(a_first, ConfigError::DuplicateProjectionKey("\"a\"".to_string()));
    assert_eq!(a_first, b_first);
}

#[tokio::test]
async fn due_projections_run_by_priority_then_registration() {
    let (journal, repository) = setup(&[]);
    let mut projector = projector(
        &journal,
        &repository,
        vec![
            recording("p1", Priority::Low),
            recording("p2", Priority::High),
            recording("p3", Priority::Normal),
            recording("p4", Priority::High),
        ],
    );

    projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap();

    assert_eq!(journal.entries(), vec!["p2:1", "p4:1", "p3:1", "p1:1"]);
}

#[tokio::test]
async fn handler_failure_persists_progress_then_propagates() {
    let (journal, repository) = setup(&[]);
    let mut projector = builder(&journal, &repository)
        .register(recording("one", Priority::Normal))
        .register(failing("two"))
        .register(recording("three", Priority::Normal))
        .build()
        .unwrap();

    let err = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        &err,
        ProjectError::Handler { projection, sequence_number: 1, .. } if projection == "\"two\""
    ));
    assert_eq!(repository.get(&"one"), Some(2));
    assert_eq!(repository.get(&"two"), Some(1));
    assert_eq!(repository.get(&"three"), Some(1));
    assert_eq!(journal.entries(), vec!["one:1"]);
}

#[tokio::test]
async fn redelivery_after_failure_skips_advanced_projections() {
    let (journal, repository) = setup(&[]);
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let flaky = TypedProjection::<Key, Journal>::new("flaky").when::<Created, _, _>(move |journal, env, _msg| {
        let attempt = seen.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                anyhow::bail!("transient");
            }
            journal.record("flaky", env.sequence_number());
            Ok(())
        }
    });
    let mut projector = builder(&journal, &repository)
        .register(recording("steady", Priority::High))
        .register(flaky)
        .build()
        .unwrap();

    projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();
    let outcome = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Completed { processed: 1 });
    assert_eq!(journal.entries(), vec!["steady:1", "flaky:1"]);
    assert_eq!(repository.snapshot().values().copied().collect::<Vec<_>>(), vec![2, 2]);
}

#[tokio::test]
async fn next_sequence_number_fetches_once() {
    let (journal, repository) = setup(&[("a", 7)]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);

    let first = projector.next_sequence_number().await.unwrap();
    let second = projector.next_sequence_number().await.unwrap();
    projector.project(&batch(7..=7), &CancellationToken::new()).await.unwrap();

    assert_eq!((first, second), (7, 7));
    assert_eq!(repository.fetch_count(), 1);
}

#[tokio::test]
async fn global_cursor_is_minimum_of_registered_keys() {
    let (journal, repository) = setup(&[("a", 17), ("b", 5), ("c", 3)]);
    let mut projector = projector(
        &journal,
        &repository,
        vec![recording("a", Priority::Normal), recording("b", Priority::Normal)],
    );

    assert_eq!(projector.next_sequence_number().await.unwrap(), 5);

    projector.project(&batch(5..=5), &CancellationToken::new()).await.unwrap();
    assert_eq!(journal.entries(), vec!["b:5"]);
    assert_eq!(projector.cursor(&"a"), Some(17));
    assert_eq!(repository.get(&"c"), Some(3));
}

#[tokio::test]
async fn uuid_projection_ids_work_as_keys() {
    let id = ProjectionId::new();
    let journal = Arc::new(Journal::default());
    let mut projector = ProjectorBuilder::new()
        .register(TypedProjection::<ProjectionId, Journal>::new(id))
        .set_connection_resolver(registry(&journal))
        .set_repository(InMemoryCursorRepository::with_cursors([(id, 4)]))
        .build()
        .unwrap();

    assert_eq!(projector.next_sequence_number().await.unwrap(), 4);
    assert_eq!(projector.cursor(&id), Some(4));
}

#[tokio::test]
async fn projection_cursor_fetch_bootstraps_unknown_keys() {
    let (journal, repository) = setup(&[("stored", 9)]);
    let bootstrapped = TypedProjection::<Key, Journal>::new("bootstrapped").with_cursor_fetch(|_journal| async { Ok(4) });
    let ignored_hook = TypedProjection::<Key, Journal>::new("stored").with_cursor_fetch(|_journal| async { Ok(1) });
    let mut projector = builder(&journal, &repository)
        .register(bootstrapped)
        .register(ignored_hook)
        .build()
        .unwrap();

    assert_eq!(projector.next_sequence_number().await.unwrap(), 4);
    assert_eq!(projector.cursor(&"bootstrapped"), Some(4));
    assert_eq!(projector.cursor(&"stored"), Some(9));
}

#[tokio::test]
async fn stored_zero_cursor_is_rejected() {
    let (journal, repository) = setup(&[("a", 0)]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);

    let err = projector.next_sequence_number().await.unwrap_err();

    assert!(matches!(err, ProjectError::InvalidCursor { value: 0, .. }));
}

#[tokio::test]
async fn exhausted_cursor_is_rejected() {
    let (journal, repository) = setup(&[("a", u64::MAX)]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);

    let err = projector
        .project(&batch(u64::MAX..=u64::MAX), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectError::InvalidCursor { value: u64::MAX, .. }));
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn last_sequence_number_cannot_be_passed() {
    let (journal, repository) = setup(&[("a", u64::MAX - 1)]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);

    let err = projector
        .project(&batch(u64::MAX - 1..=u64::MAX), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectError::CursorNotAdvanced { sequence_number: u64::MAX, .. }));
    assert_eq!(journal.entries(), vec![format!("a:{}", u64::MAX - 1), format!("a:{}", u64::MAX)]);
    assert_eq!(repository.get(&"a"), Some(u64::MAX));
}

#[tokio::test]
async fn batch_past_the_last_sequence_number_is_rejected_up_front() {
    let (journal, repository) = setup(&[("a", u64::MAX - 1)]);
    let mut projector = projector(&journal, &repository, vec![recording("a", Priority::Normal)]);
    let mut envelopes = batch(u64::MAX - 1..=u64::MAX);
    envelopes.push(created(u64::MAX));

    let err = projector.project(&envelopes, &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::SequenceExhausted { found: u64::MAX, .. }));
    assert!(journal.entries().is_empty());
}

#[tokio::test]
async fn cursor_left_in_place_is_a_protocol_violation() {
    let (journal, repository) = setup(&[]);
    let mut projector = builder(&journal, &repository).register(Stuck).build().unwrap();

    let err = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        &err,
        ProjectError::CursorNotAdvanced { projection, sequence_number: 1, .. } if projection == "\"stuck\""
    ));
}

#[tokio::test]
async fn missing_connection_is_a_resolve_error() {
    struct SearchIndex;
    let (journal, repository) = setup(&[]);
    let search = TypedProjection::<Key, SearchIndex>::new("search")
        .when::<Created, _, _>(|_index, _env, _msg| async { Ok(()) });
    let mut projector = builder(&journal, &repository).register(search).build().unwrap();

    let err = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::Resolve { .. }));
    assert_eq!(repository.get(&"search"), Some(1));
}

#[tokio::test]
async fn cancellation_stops_the_batch_without_error() {
    let (journal, repository) = setup(&[]);
    let observed = Arc::new(AtomicBool::new(false));
    let flag = observed.clone();
    let slow = TypedProjection::<Key, Journal>::new("slow").when_cancellable::<Created, _, _>(
        move |_journal, _env, _msg, cancel| {
            let flag = flag.clone();
            async move {
                while !cancel.is_cancelled() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        },
    );
    let mut projector = builder(&journal, &repository)
        .register(slow)
        .register(recording("after", Priority::Lowest))
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let outcome = projector.project(&batch(1..=2), &token).await.unwrap();

    assert_eq!(outcome, ProjectOutcome::Cancelled { processed: 0 });
    assert!(observed.load(Ordering::SeqCst));
    assert!(journal.entries().is_empty());
    assert_eq!(repository.get(&"slow"), Some(2));
    assert_eq!(repository.get(&"after"), Some(1));
    assert_eq!(projector.next_sequence_number().await.unwrap(), 1);
}

#[tokio::test]
async fn handler_error_after_cancellation_is_not_a_failure() {
    let (journal, repository) = setup(&[]);
    let aborting = TypedProjection::<Key, Journal>::new("aborting").when_cancellable::<Created, _, _>(
        |_journal, _env, _msg, cancel| async move {
            cancel.cancel();
            anyhow::bail!("operation cancelled")
        },
    );
    let mut projector = builder(&journal, &repository).register(aborting).build().unwrap();

    let outcome = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(repository.get(&"aborting"), Some(1));
}

#[tokio::test]
async fn every_batch_closes_its_scope() {
    let (journal, repository) = setup(&[]);
    let bus = Arc::new(LifecycleBus::new());
    let events = bus.subscribe();
    let mut projector = ProjectorBuilder::new()
        .register(recording("a", Priority::Normal))
        .set_scope_factory(LifetimeScopeFactory::new(registry(&journal)).with_observer(bus.clone()))
        .set_repository(Arc::clone(&repository))
        .build()
        .unwrap();
    let token = CancellationToken::new();

    assert_eq!(projector.project(&[], &token).await.unwrap(), ProjectOutcome::Idle);
    projector.project(&batch(1..=2), &token).await.unwrap();
    projector.project(&batch(9..=9), &token).await.unwrap_err();

    let endings = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ScopeEvent::Ending(_)))
        .count();
    assert_eq!(endings, 2);
    assert_eq!(repository.store_count(), 2);
}

#[tokio::test]
async fn disposal_callback_runs_once_per_batch() {
    let (journal, repository) = setup(&[]);
    let commits = Arc::new(AtomicUsize::new(0));
    let counter = commits.clone();
    let callbacks = DisposalCallbacks::new()
        .before_disposal_of::<Tx, _, _>(move |_tx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .unwrap();
    let with_tx = |key: Key| {
        TypedProjection::<Key, Tx>::new(key).when::<Created, _, _>(|_tx, _env, _msg| async { Ok(()) })
    };
    let mut projector = ProjectorBuilder::new()
        .register(with_tx("a"))
        .register(with_tx("b"))
        .set_scope_factory(LifetimeScopeFactory::new(registry(&journal)).with_disposal_callbacks(callbacks))
        .set_repository(Arc::clone(&repository))
        .build()
        .unwrap();
    let token = CancellationToken::new();

    projector.project(&batch(1..=3), &token).await.unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 1);

    projector.project(&batch(4..=5), &token).await.unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn store_failure_after_successful_dispatch_is_returned() {
    projector_observability::init_for_tests();
    let journal = Arc::new(Journal::default());
    let mut projector = ProjectorBuilder::new()
        .register(recording("a", Priority::Normal))
        .set_scope_factory(LifetimeScopeFactory::new(registry(&journal)))
        .set_repository(ReadOnlyStore::default())
        .build()
        .unwrap();

    let err = projector.project(&batch(1..=2), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::Repository(RepositoryError::Backend(_))));
    assert_eq!(journal.entries(), vec!["a:1", "a:2"]);
}

#[tokio::test]
async fn close_failure_after_successful_dispatch_is_returned() {
    let (journal, repository) = setup(&[]);
    let callbacks = DisposalCallbacks::new()
        .before_disposal_of::<Journal, _, _>(|_journal| async { anyhow::bail!("flush failed") })
        .unwrap();
    let mut projector = ProjectorBuilder::new()
        .register(recording("a", Priority::Normal))
        .set_scope_factory(LifetimeScopeFactory::new(registry(&journal)).with_disposal_callbacks(callbacks))
        .set_repository(Arc::clone(&repository))
        .build()
        .unwrap();

    let err = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, ProjectError::Scope(ScopeError::DisposalCallback { .. })));
    assert_eq!(repository.get(&"a"), Some(2));
}

#[tokio::test]
async fn dispatch_error_wins_over_store_and_close_errors() {
    projector_observability::init_for_tests();
    let journal = Arc::new(Journal::default());
    let callbacks = DisposalCallbacks::new()
        .before_disposal_of::<Journal, _, _>(|_journal| async { anyhow::bail!("flush failed") })
        .unwrap();
    let mut projector = ProjectorBuilder::new()
        .register(recording("a", Priority::High))
        .register(failing("b"))
        .set_scope_factory(LifetimeScopeFactory::new(registry(&journal)).with_disposal_callbacks(callbacks))
        .set_repository(ReadOnlyStore::default())
        .build()
        .unwrap();

    let err = projector.project(&batch(1..=1), &CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        &err,
        ProjectError::Handler { projection, sequence_number: 1, .. } if projection == "\"b\""
    ));
    assert_eq!(journal.entries(), vec!["a:1"]);
}
