//! Mutations, commit/query request envelopes, and the write summary.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::query::{GqlQuery, MoreResults, Query};
use crate::types::{Entity, Key, Partition, Timestamp};

/// Idempotent write operation against a single key.
///
/// The Store's commit surface also accepts insert and update mutations, but
/// those are not idempotent under the retry-whole-batch policy, so the
/// connector never constructs them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    Upsert(Entity),
    Delete(Key),
}

impl Mutation {
    /// Upsert mutation from an entity, rejecting incomplete keys.
    pub fn upsert(entity: Entity) -> StoreResult<Self> {
        if !entity.key.is_complete() {
            return Err(StoreError::Config(format!(
                "entities to be written must have complete keys: {}",
                entity.key
            )));
        }
        Ok(Mutation::Upsert(entity))
    }

    /// Delete mutation from an entity, rejecting incomplete keys.
    pub fn delete_entity(entity: Entity) -> StoreResult<Self> {
        if !entity.key.is_complete() {
            return Err(StoreError::Config(format!(
                "entities to be deleted must have complete keys: {}",
                entity.key
            )));
        }
        Ok(Mutation::Delete(entity.key))
    }

    /// Delete mutation from a bare key, rejecting incomplete keys.
    pub fn delete_key(key: Key) -> StoreResult<Self> {
        if !key.is_complete() {
            return Err(StoreError::Config(format!(
                "keys to be deleted must be complete: {key}"
            )));
        }
        Ok(Mutation::Delete(key))
    }

    /// Key this mutation applies to.
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Upsert(entity) => &entity.key,
            Mutation::Delete(key) => key,
        }
    }

    /// Deterministic estimate of the encoded proto size in bytes, used for
    /// batch byte budgeting.
    pub fn byte_size(&self) -> usize {
        match self {
            Mutation::Upsert(entity) => entity.byte_size() + 2,
            Mutation::Delete(key) => key.byte_size() + 2,
        }
    }
}

/// Snapshot options attached to read RPCs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub read_time: Option<Timestamp>,
}

/// Exactly one of a structured or textual query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QueryInput {
    Structured(Query),
    Gql(GqlQuery),
}

/// RunQuery request envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunQueryRequest {
    pub partition: Partition,
    pub input: QueryInput,
    pub read_options: Option<ReadOptions>,
}

impl RunQueryRequest {
    /// Request for a structured query.
    pub fn structured(partition: Partition, query: Query, read_options: Option<ReadOptions>) -> Self {
        Self {
            partition,
            input: QueryInput::Structured(query),
            read_options,
        }
    }

    /// Request for a textual query.
    pub fn gql(partition: Partition, gql: GqlQuery, read_options: Option<ReadOptions>) -> Self {
        Self {
            partition,
            input: QueryInput::Gql(gql),
            read_options,
        }
    }
}

/// One matched entity plus its resume cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityResult {
    pub entity: Entity,
    pub cursor: Option<Vec<u8>>,
}

/// One page of query results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResultBatch {
    pub entity_results: Vec<EntityResult>,
    pub end_cursor: Vec<u8>,
    pub more_results: MoreResults,
}

/// RunQuery response: the result page plus the server-echoed structured
/// query (the echo is how GQL translation works).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunQueryResponse {
    pub batch: QueryResultBatch,
    pub query: Option<Query>,
}

/// Non-transactional commit request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub project_id: String,
    pub database_id: String,
    pub mutations: Vec<Mutation>,
}

/// Per-mutation commit result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResult {
    pub key: Option<Key>,
    pub version: i64,
}

/// Commit response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub mutation_results: Vec<MutationResult>,
    pub index_updates: i32,
}

impl CommitResponse {
    /// Deterministic estimate of the encoded proto size in bytes; reported
    /// as the byte count of the write summary.
    pub fn byte_size(&self) -> usize {
        let results: usize = self
            .mutation_results
            .iter()
            .map(|r| r.key.as_ref().map(Key::byte_size).unwrap_or(0) + 12)
            .sum();
        results + 6
    }
}

/// Outcome of one successful commit RPC, emitted downstream by the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSuccessSummary {
    pub num_writes: u64,
    pub num_bytes: u64,
}
