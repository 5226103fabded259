//! RPC contract between the connector core and the Store.
//!
//! The planner, reader, and writer talk to the Store exclusively through
//! `StoreRpc`, so tests can substitute an in-memory fake and the transport
//! crate supplies the gRPC-backed implementation. `StoreFactory` captures the
//! per-bundle client lifecycle: one client is built at bundle start and
//! dropped with the bundle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::mutation::{CommitRequest, CommitResponse, RunQueryRequest, RunQueryResponse};

/// The Store's RPC surface as consumed by the connector.
#[async_trait]
pub trait StoreRpc: Send + Sync {
    /// Execute a structured or textual query and return one result page.
    async fn run_query(&self, request: RunQueryRequest) -> StoreResult<RunQueryResponse>;

    /// Apply a batch of mutations non-transactionally.
    async fn commit(&self, request: CommitRequest) -> StoreResult<CommitResponse>;
}

/// Builds a Store client per bundle.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Establish a client. Called at bundle start; the returned client is
    /// discarded at bundle end.
    async fn connect(&self) -> StoreResult<Arc<dyn StoreRpc>>;
}
