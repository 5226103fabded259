//! Connector core bridging a parallel data-processing pipeline and the
//! Strata store.
//!
//! The read side fans a user query out into parallel splits (`planner`,
//! `splitter`) and paginates each split (`reader`). The write side batches
//! idempotent mutations into commit RPCs sized from observed latency
//! (`batcher`, `writer`), shaped by a warm-up rate ceiling and an
//! error-rate-driven throttler (`throttle`). The gRPC transport lives in
//! `client`; everything above it talks to the Store through the
//! `strata_core::StoreRpc` trait.

include!(concat!(env!("OUT_DIR"), "/volo_gen.rs"));

pub mod average;
pub mod backoff;
pub mod batcher;
pub mod client;
pub mod config;
pub mod metrics;
pub mod planner;
pub mod reader;
pub mod splitter;
pub mod throttle;
pub mod writer;

pub use client::{StrataClient, StrataFactory, DEFAULT_ENDPOINT};
pub use config::{Credentials, ReadConfig, WriteConfig};
pub use planner::QueryPlanner;
pub use reader::{EntitySink, QueryReader};
pub use writer::{MutationWriter, SummarySink};
