//! Integration tests of the write path: batch assembly, flush triggers,
//! retry behavior, and the round-trip laws, all against the in-memory fake.

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::{entity_with_payload, FakeFactory, FakeStore};
use strata_connect::batcher::WriteBatcher;
use strata_connect::throttle::AdaptiveThrottler;
use strata_connect::writer::MutationWriter;
use strata_connect::WriteConfig;
use strata_core::{
    Entity, ErrorCode, Key, Mutation, Partition, Query, StoreError, WriteSuccessSummary,
};
use tokio::time::Instant;

fn partition() -> Partition {
    Partition::new("test-project")
}

fn writer(store: &Arc<FakeStore>) -> MutationWriter<u32> {
    MutationWriter::new(
        &WriteConfig::new("test-project"),
        Arc::new(FakeFactory(store.clone())),
        WriteBatcher::new(),
        Arc::new(AdaptiveThrottler::new()),
    )
    .expect("valid configuration")
}

fn order(id: i64) -> Entity {
    entity_with_payload(&partition(), "Order", id, 1024)
}

async fn read_kind(store: &Arc<FakeStore>, kind: &str) -> Vec<Entity> {
    let mut reader = strata_connect::QueryReader::new(
        Arc::new(FakeFactory(store.clone())),
        partition(),
        None,
    );
    reader.start_bundle().await.expect("start bundle");
    let mut entities = Vec::new();
    let mut sink = |entity: Entity| entities.push(entity);
    reader
        .process(&Query::new(kind), &mut sink)
        .await
        .expect("read");
    reader.finish_bundle();
    entities
}

#[tokio::test]
async fn happy_path_writes_every_entity_exactly_once() {
    let store = FakeStore::new();
    let mut writer = writer(&store);
    let mut summaries: Vec<WriteSuccessSummary> = Vec::new();
    let mut sink =
        |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| summaries.push(summary);

    writer.start_bundle().await.expect("start bundle");
    for id in 1..=127 {
        let mutation = Mutation::upsert(order(id)).expect("complete key");
        writer.process(mutation, 0, &mut sink).await.expect("process");
    }
    writer.finish_bundle(&mut sink).await.expect("final flush");

    assert!(!summaries.is_empty(), "at least one commit must happen");
    assert_eq!(summaries.iter().map(|s| s.num_writes).sum::<u64>(), 127);
    assert_eq!(store.len(), 127, "every key must be present server-side");
    for commit in store.commits() {
        assert!(!commit.mutations.is_empty());
        assert!(commit.mutations.len() <= 500);
    }
    assert_eq!(writer.metrics().entities_mutated.value(), 127);
}

#[tokio::test]
async fn a_repeated_key_splits_the_commit() {
    let store = FakeStore::new();
    let mut writer = writer(&store);
    let mut summaries: Vec<WriteSuccessSummary> = Vec::new();
    let mut sink =
        |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| summaries.push(summary);

    writer.start_bundle().await.expect("start bundle");
    let a = Mutation::upsert(order(1)).unwrap();
    let b = Mutation::upsert(order(2)).unwrap();
    writer.process(a.clone(), 0, &mut sink).await.unwrap();
    writer.process(b, 0, &mut sink).await.unwrap();
    writer.process(a, 0, &mut sink).await.unwrap();
    writer.finish_bundle(&mut sink).await.unwrap();

    let commits = store.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].mutations.len(), 2, "first commit holds A and B");
    assert_eq!(commits[1].mutations.len(), 1, "second commit holds A again");
    assert_eq!(writer.metrics().entities_mutated.value(), 3);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn the_byte_budget_splits_oversized_commits() {
    let store = FakeStore::new();
    let mut writer = writer(&store);
    let mut summaries: Vec<WriteSuccessSummary> = Vec::new();
    let mut sink =
        |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| summaries.push(summary);

    writer.start_bundle().await.expect("start bundle");
    // ~960 KB each: nine stay under the 9 MB budget, the tenth would cross
    // it.
    for id in 1..=10 {
        let entity = entity_with_payload(&partition(), "Order", id, 960_000);
        let mutation = Mutation::upsert(entity).expect("complete key");
        writer.process(mutation, 0, &mut sink).await.expect("process");
    }
    writer.finish_bundle(&mut sink).await.expect("final flush");

    let commits = store.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].mutations.len(), 9, "nine fit under nine megabytes");
    assert_eq!(commits[1].mutations.len(), 1);
    assert_eq!(store.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn a_transient_commit_failure_is_retried_after_backoff() {
    let store = FakeStore::new();
    store.fail_next_commit(StoreError::rpc(ErrorCode::Unavailable, "overloaded"));
    let mut writer = writer(&store);
    let mut summaries: Vec<WriteSuccessSummary> = Vec::new();
    let mut sink =
        |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| summaries.push(summary);

    writer.start_bundle().await.expect("start bundle");
    writer
        .process(Mutation::upsert(order(1)).unwrap(), 0, &mut sink)
        .await
        .expect("process");
    let begin = Instant::now();
    writer.finish_bundle(&mut sink).await.expect("retried flush");

    assert!(
        Instant::now() - begin >= Duration::from_secs(5),
        "the first backoff delay is five seconds"
    );
    assert_eq!(summaries.len(), 1);
    assert_eq!(writer.metrics().rpc_errors.value(), 1);
    assert_eq!(writer.metrics().rpc_successes.value(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn a_permanent_commit_failure_aborts_the_bundle() {
    let store = FakeStore::new();
    store.fail_next_commit(StoreError::rpc(ErrorCode::PermissionDenied, "denied"));
    let mut writer = writer(&store);
    let mut summaries: Vec<WriteSuccessSummary> = Vec::new();
    let mut sink =
        |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| summaries.push(summary);

    writer.start_bundle().await.expect("start bundle");
    writer
        .process(Mutation::upsert(order(1)).unwrap(), 0, &mut sink)
        .await
        .expect("process");
    let err = writer.finish_bundle(&mut sink).await.expect_err("must abort");

    assert_eq!(err.code(), Some(ErrorCode::PermissionDenied));
    assert!(summaries.is_empty(), "no summary for a failed commit");
    assert_eq!(store.commits().len(), 1, "exactly one attempt, no retries");
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn upsert_then_read_returns_the_entity() {
    let store = FakeStore::new();
    let mut writer = writer(&store);
    let mut sink = |_s: WriteSuccessSummary, _at: SystemTime, _w: &u32| {};

    let entity = order(42);
    writer.start_bundle().await.expect("start bundle");
    writer
        .process(Mutation::upsert(entity.clone()).unwrap(), 0, &mut sink)
        .await
        .expect("process");
    writer.finish_bundle(&mut sink).await.expect("flush");

    let read_back = read_kind(&store, "Order").await;
    assert_eq!(read_back, vec![entity]);
}

#[tokio::test]
async fn delete_then_read_returns_nothing() {
    let store = FakeStore::new();
    let entity = order(42);
    store.seed(entity.clone());

    let mut writer = writer(&store);
    let mut sink = |_s: WriteSuccessSummary, _at: SystemTime, _w: &u32| {};
    writer.start_bundle().await.expect("start bundle");
    writer
        .process(Mutation::delete_key(entity.key.clone()).unwrap(), 0, &mut sink)
        .await
        .expect("process");
    writer.finish_bundle(&mut sink).await.expect("flush");

    assert!(read_kind(&store, "Order").await.is_empty());
    assert_eq!(store.get(&entity.key), None);
}

#[tokio::test]
async fn committed_mutations_match_the_input_in_order() {
    let store = FakeStore::new();
    let mut writer = writer(&store);
    let mut sink = |_s: WriteSuccessSummary, _at: SystemTime, _w: &u32| {};

    let inputs: Vec<Mutation> = (1..=120)
        .map(|id| Mutation::upsert(order(id)).unwrap())
        .collect();
    writer.start_bundle().await.expect("start bundle");
    for mutation in &inputs {
        writer
            .process(mutation.clone(), 0, &mut sink)
            .await
            .expect("process");
    }
    writer.finish_bundle(&mut sink).await.expect("flush");

    // Concatenating the committed batches reproduces the input stream: no
    // drops, no duplicates, arrival order preserved.
    let committed: Vec<Key> = store
        .commits()
        .iter()
        .flat_map(|c| c.mutations.iter().map(|m| m.key().clone()))
        .collect();
    let expected: Vec<Key> = inputs.iter().map(|m| m.key().clone()).collect();
    assert_eq!(committed, expected);
}
