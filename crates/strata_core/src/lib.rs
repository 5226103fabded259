//! Strata connector domain crate.
//!
//! This crate provides the plain-Rust data model for the Strata hierarchical
//! key-value store (keys, entities, queries, mutations), the connector's
//! error taxonomy, and the `StoreRpc`/`StoreFactory` traits that abstract the
//! Store's RPC surface. Higher layers (the gRPC transport, the query planner,
//! the mutation writer) depend only on this crate, which keeps them testable
//! against in-memory fakes.

mod error;
mod mutation;
mod query;
mod rpc;
mod types;

pub use error::{ErrorCode, StoreError, StoreResult};
pub use mutation::{
    CommitRequest, CommitResponse, EntityResult, Mutation, MutationResult, QueryInput,
    QueryResultBatch, ReadOptions, RunQueryRequest, RunQueryResponse, WriteSuccessSummary,
};
pub use query::{
    Direction, FilterOp, GqlQuery, MoreResults, PropertyFilter, PropertyOrder, Query,
    KEY_PROPERTY, SCATTER_PROPERTY,
};
pub use rpc::{StoreFactory, StoreRpc};
pub use types::{Entity, Key, PathElement, PathId, Partition, Timestamp, Value};
