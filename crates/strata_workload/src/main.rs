//! Workload generator for exercising a Strata endpoint through the
//! connector.
//!
//! This binary seeds entities through the batching writer, reads them back
//! through the split planner and paginated reader, and deletes them again.
//! It is the manual smoke-test companion of the connector: point it at an
//! emulator and watch the counters.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::stream::{FuturesUnordered, StreamExt};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use strata_connect::batcher::WriteBatcher;
use strata_connect::metrics::Counter;
use strata_connect::throttle::{AdaptiveThrottler, RampupThrottle};
use strata_connect::{
    Credentials, MutationWriter, QueryPlanner, QueryReader, ReadConfig, StrataFactory, WriteConfig,
};
use strata_core::{
    Entity, Key, Mutation, PathElement, Partition, Query, StoreFactory, Value,
    WriteSuccessSummary,
};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "strata-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Write `--count` generated entities.
    Seed(SeedArgs),
    /// Read a whole kind back through the split planner.
    Read(ReadArgs),
    /// Delete previously seeded entities by key.
    Delete(SeedArgs),
}

/// Options shared by the mutating subcommands.
#[derive(Parser, Debug, Clone)]
struct SeedArgs {
    /// Store endpoint `host:port` (an emulator, typically).
    #[arg(long)]
    endpoint: String,

    /// Project id to write into.
    #[arg(long, default_value = "workload")]
    project: String,

    /// Kind used for generated entities.
    #[arg(long, default_value = "WorkloadRow")]
    kind: String,

    /// Number of entities to write or delete.
    #[arg(long, default_value_t = 1000)]
    count: u64,

    /// Concurrent writer instances, each with its own bundle.
    #[arg(long, default_value_t = 4)]
    clients: usize,

    /// Payload bytes per generated entity.
    #[arg(long, default_value_t = 512)]
    payload_bytes: usize,

    /// Disable the warm-up ramp throttle.
    #[arg(long)]
    no_rampup: bool,

    /// Worker-count hint for the ramp throttle.
    #[arg(long, default_value_t = 4)]
    hint_workers: u32,
}

/// Options of the read subcommand.
#[derive(Parser, Debug, Clone)]
struct ReadArgs {
    /// Store endpoint `host:port`.
    #[arg(long)]
    endpoint: String,

    /// Project id to read from.
    #[arg(long, default_value = "workload")]
    project: String,

    /// Kind to read.
    #[arg(long, default_value = "WorkloadRow")]
    kind: String,

    /// Requested split count (0 = dynamic from statistics).
    #[arg(long, default_value_t = 0)]
    splits: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Seed(seed) => mutate(seed, false).await,
        Command::Delete(seed) => mutate(seed, true).await,
        Command::Read(read) => read_kind(read).await,
    }
}

/// Generated entity `index` of the workload keyspace.
fn workload_entity(
    partition: &Partition,
    kind: &str,
    index: u64,
    payload_bytes: usize,
    rng: &mut SmallRng,
) -> Entity {
    let key = Key::new(
        partition.clone(),
        PathElement::name(kind, format!("row-{index:08}")),
    );
    let payload: Vec<u8> = (0..payload_bytes).map(|_| rng.gen()).collect();
    Entity::new(key)
        .with_property("index", Value::Integer(index as i64))
        .with_property("payload", Value::Blob(payload))
}

/// Seed or delete `count` entities across `clients` concurrent writers.
async fn mutate(args: SeedArgs, delete: bool) -> anyhow::Result<()> {
    let config = WriteConfig::new(args.project.clone())
        .with_localhost(args.endpoint.clone())
        .with_throttle_rampup(!args.no_rampup)
        .with_hint_num_workers(args.hint_workers)
        .with_credentials(Credentials::anonymous());
    let factory: Arc<dyn StoreFactory> = Arc::new(StrataFactory::new(
        config.localhost.clone(),
        Credentials::anonymous(),
    ));
    let throttler = Arc::new(AdaptiveThrottler::new());
    let partition = Partition::new(args.project.clone());
    // One start instant for the whole run, shared by every client's ramp.
    let rampup_start = tokio::time::Instant::now();
    let throttled_msecs = Counter::new();

    let clients = args.clients.max(1);
    let per_client = args.count / clients as u64;
    let mut tasks = FuturesUnordered::new();
    for client in 0..clients {
        let config = config.clone();
        let factory = factory.clone();
        let throttler = throttler.clone();
        let partition = partition.clone();
        let kind = args.kind.clone();
        let payload_bytes = args.payload_bytes;
        let throttled_msecs = throttled_msecs.clone();
        // The last client absorbs the remainder of an uneven count.
        let start = client as u64 * per_client;
        let end = if client == clients - 1 {
            args.count
        } else {
            start + per_client
        };
        let range = start..end;

        tasks.push(tokio::spawn(async move {
            let mut writer: MutationWriter<u32> =
                MutationWriter::new(&config, factory, WriteBatcher::new(), throttler)
                    .context("writer construction")?;
            let mut rampup = config
                .throttle_rampup
                .then(|| RampupThrottle::new(config.hint_num_workers, rampup_start, throttled_msecs));
            let mut rng = SmallRng::seed_from_u64(client as u64);

            let mut written = 0u64;
            let mut bytes = 0u64;
            let mut sink = |summary: WriteSuccessSummary, _at: SystemTime, _w: &u32| {
                written += summary.num_writes;
                bytes += summary.num_bytes;
            };

            writer.start_bundle().await.context("start bundle")?;
            for index in range {
                let entity =
                    workload_entity(&partition, &kind, index, payload_bytes, &mut rng);
                let mutation = if delete {
                    Mutation::delete_key(entity.key)
                } else {
                    Mutation::upsert(entity)
                }
                .context("mutation construction")?;
                if let Some(rampup) = rampup.as_mut() {
                    rampup.admit().await;
                }
                writer
                    .process(mutation, 0, &mut sink)
                    .await
                    .context("process mutation")?;
            }
            writer.finish_bundle(&mut sink).await.context("final flush")?;

            let successes = writer.metrics().rpc_successes.value();
            let errors = writer.metrics().rpc_errors.value();
            anyhow::Ok((written, bytes, successes, errors))
        }));
    }

    let mut written = 0u64;
    let mut bytes = 0u64;
    let mut successes = 0u64;
    let mut errors = 0u64;
    while let Some(joined) = tasks.next().await {
        let (w, b, s, e) = joined.context("writer task panicked")??;
        written += w;
        bytes += b;
        successes += s;
        errors += e;
    }

    let report = serde_json::json!({
        "op": if delete { "delete" } else { "seed" },
        "written": written,
        "bytes": bytes,
        "rpc_successes": successes,
        "rpc_errors": errors,
        "throttled_msecs": throttled_msecs.value(),
    });
    println!("{report}");
    Ok(())
}

/// Read a whole kind: plan splits, then drain each split sequentially.
async fn read_kind(args: ReadArgs) -> anyhow::Result<()> {
    let config = ReadConfig::new(args.project.clone())
        .with_localhost(args.endpoint.clone())
        .with_query(Query::new(args.kind.clone()))
        .with_num_query_splits(args.splits);
    config.validate().context("read configuration")?;

    let factory: Arc<dyn StoreFactory> = Arc::new(StrataFactory::new(
        config.localhost.clone(),
        Credentials::anonymous(),
    ));
    let store = factory.connect().await.context("connect")?;
    let planner = QueryPlanner::new(store, config.partition(), config.read_options());

    // Best-effort statistics count; absent statistics are not fatal.
    let stats_count = planner.num_entities(&args.kind).await.ok();

    let query = config.query.clone().context("read configuration has a query")?;
    let splits = planner
        .plan_splits(&query, config.num_query_splits)
        .await
        .context("split planning")?;
    tracing::info!(splits = splits.len(), kind = %args.kind, "planned query splits");

    let mut reader = QueryReader::new(factory, config.partition(), config.read_options());
    reader.start_bundle().await.context("start bundle")?;
    let mut total = 0u64;
    for split in &splits {
        let mut sink = |_entity: Entity| total += 1;
        reader.process(split, &mut sink).await.context("read split")?;
    }
    reader.finish_bundle();

    let report = serde_json::json!({
        "op": "read",
        "splits": splits.len(),
        "entities": total,
        "stats_count": stats_count,
        "rpc_successes": reader.metrics().rpc_successes.value(),
        "rpc_errors": reader.metrics().rpc_errors.value(),
    });
    println!("{report}");
    Ok(())
}
