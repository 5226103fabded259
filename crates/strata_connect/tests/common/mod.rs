//! Shared helpers for integration tests: an in-memory Store fake.
//!
//! `FakeStore` implements `StoreRpc` over a `BTreeMap` keyed in entity-key
//! order. It supports the slice of the query surface the connector uses:
//! kind selection, AND-combined equality filters, `__key__` range fences,
//! single-property ordering (including the scatter pseudo-order), page
//! limits, and offset-based cursors. Commits enforce the Store-side batch
//! invariants so a connector bug trips an error instead of passing silently.

use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::{
    CommitRequest, CommitResponse, Direction, Entity, EntityResult, ErrorCode, FilterOp, Key,
    MoreResults, Mutation, MutationResult, PropertyFilter, Query, QueryInput, QueryResultBatch,
    RunQueryRequest, RunQueryResponse, StoreError, StoreFactory, StoreResult, StoreRpc, Value,
    KEY_PROPERTY, SCATTER_PROPERTY,
};

/// Store-side page cap, matching the connector's page limit.
const SERVER_PAGE_LIMIT: usize = 500;
/// Store-side ceiling on mutations per commit.
const SERVER_BATCH_LIMIT: usize = 500;

#[derive(Default)]
struct FakeState {
    entities: BTreeMap<Key, Entity>,
    commits: Vec<CommitRequest>,
    run_queries: Vec<RunQueryRequest>,
    fail_commits: VecDeque<StoreError>,
    fail_run_queries: VecDeque<StoreError>,
}

/// In-memory Store.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert an entity directly, bypassing the commit path.
    pub fn seed(&self, entity: Entity) {
        let mut state = self.state.lock().unwrap();
        state.entities.insert(entity.key.clone(), entity);
    }

    /// Queue an error for the next commit attempts, in order.
    pub fn fail_next_commit(&self, err: StoreError) {
        self.state.lock().unwrap().fail_commits.push_back(err);
    }

    /// Queue an error for the next run-query attempts, in order.
    pub fn fail_next_run_query(&self, err: StoreError) {
        self.state.lock().unwrap().fail_run_queries.push_back(err);
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entities.len()
    }

    /// Entity stored under `key`, if any.
    pub fn get(&self, key: &Key) -> Option<Entity> {
        self.state.lock().unwrap().entities.get(key).cloned()
    }

    /// Every commit request received, in arrival order.
    pub fn commits(&self) -> Vec<CommitRequest> {
        self.state.lock().unwrap().commits.clone()
    }

    /// Every run-query request received, in arrival order.
    pub fn run_queries(&self) -> Vec<RunQueryRequest> {
        self.state.lock().unwrap().run_queries.clone()
    }

    /// GQL requests received, in arrival order.
    pub fn gql_queries(&self) -> Vec<String> {
        self.run_queries()
            .into_iter()
            .filter_map(|r| match r.input {
                QueryInput::Gql(gql) => Some(gql.query_string),
                QueryInput::Structured(_) => None,
            })
            .collect()
    }
}

/// Deterministic stand-in for the Store-maintained scatter ordering.
fn scatter_rank(key: &Key) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Key(x), Value::Key(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn matches_filter(entity: &Entity, filter: &PropertyFilter) -> bool {
    let ordering = if filter.property == KEY_PROPERTY {
        let Some(bound) = filter.value.as_key() else {
            return false;
        };
        entity.key.cmp(bound)
    } else {
        let Some(value) = entity.property(&filter.property) else {
            return false;
        };
        compare_values(value, &filter.value)
    };
    match filter.op {
        FilterOp::Equal => ordering == Ordering::Equal,
        FilterOp::LessThan => ordering == Ordering::Less,
        FilterOp::LessThanOrEqual => ordering != Ordering::Greater,
        FilterOp::GreaterThan => ordering == Ordering::Greater,
        FilterOp::GreaterThanOrEqual => ordering != Ordering::Less,
    }
}

/// Tiny GQL grammar: `SELECT * FROM <kind> [LIMIT <n>]`. Two LIMIT clauses
/// (the translation probe appending to a text that already has one) are an
/// `INVALID_ARGUMENT`, like the real service.
fn parse_gql(gql: &str) -> StoreResult<Query> {
    let tokens: Vec<&str> = gql.split_whitespace().collect();
    let limit_clauses = tokens
        .iter()
        .filter(|t| t.eq_ignore_ascii_case("limit"))
        .count();
    if limit_clauses > 1 {
        return Err(StoreError::rpc(
            ErrorCode::InvalidArgument,
            "query has more than one LIMIT clause",
        ));
    }
    if tokens.len() < 4
        || !tokens[0].eq_ignore_ascii_case("select")
        || tokens[1] != "*"
        || !tokens[2].eq_ignore_ascii_case("from")
    {
        return Err(StoreError::rpc(
            ErrorCode::InvalidArgument,
            format!("unsupported gql: {gql}"),
        ));
    }
    let mut query = Query::new(tokens[3]);
    if limit_clauses == 1 {
        let position = tokens
            .iter()
            .position(|t| t.eq_ignore_ascii_case("limit"))
            .unwrap();
        let limit = tokens
            .get(position + 1)
            .and_then(|t| t.parse::<i32>().ok())
            .ok_or_else(|| {
                StoreError::rpc(ErrorCode::InvalidArgument, "malformed LIMIT clause")
            })?;
        query.limit = Some(limit);
    }
    Ok(query)
}

fn cursor_to_offset(cursor: &[u8]) -> usize {
    let mut bytes = [0u8; 8];
    let len = cursor.len().min(8);
    bytes[..len].copy_from_slice(&cursor[..len]);
    u64::from_be_bytes(bytes) as usize
}

fn offset_to_cursor(offset: usize) -> Vec<u8> {
    (offset as u64).to_be_bytes().to_vec()
}

impl FakeStore {
    fn execute(&self, request: &RunQueryRequest, query: &Query) -> RunQueryResponse {
        let state = self.state.lock().unwrap();

        // Select the kind within the requested partition.
        let mut matched: Vec<&Entity> = state
            .entities
            .values()
            .filter(|e| e.key.partition == request.partition && e.key.kind() == query.kind)
            .filter(|e| query.filters.iter().all(|f| matches_filter(e, f)))
            .collect();

        // Single-property ordering is all the connector ever asks for.
        if let Some(order) = query.orders.first() {
            if order.property == SCATTER_PROPERTY {
                matched.sort_by_key(|e| scatter_rank(&e.key));
            } else {
                matched.sort_by(|a, b| {
                    let av = a.property(&order.property);
                    let bv = b.property(&order.property);
                    match (av, bv) {
                        (Some(av), Some(bv)) => compare_values(av, bv),
                        (Some(_), None) => Ordering::Greater,
                        (None, Some(_)) => Ordering::Less,
                        (None, None) => Ordering::Equal,
                    }
                });
            }
            if order.direction == Direction::Descending {
                matched.reverse();
            }
        }

        let total = matched.len();
        let offset = query
            .start_cursor
            .as_deref()
            .map(cursor_to_offset)
            .unwrap_or(0)
            .min(total);
        let page_limit = query
            .limit
            .map(|l| l.max(0) as usize)
            .unwrap_or(SERVER_PAGE_LIMIT)
            .min(SERVER_PAGE_LIMIT);
        let page_end = (offset + page_limit).min(total);

        let entity_results: Vec<EntityResult> = matched[offset..page_end]
            .iter()
            .enumerate()
            .map(|(i, e)| EntityResult {
                entity: (*e).clone(),
                cursor: Some(offset_to_cursor(offset + i + 1)),
            })
            .collect();

        RunQueryResponse {
            batch: QueryResultBatch {
                entity_results,
                end_cursor: offset_to_cursor(page_end),
                more_results: if page_end < total {
                    MoreResults::NotFinished
                } else {
                    MoreResults::NoMoreResults
                },
            },
            query: Some(query.clone()),
        }
    }
}

#[async_trait]
impl StoreRpc for FakeStore {
    async fn run_query(&self, request: RunQueryRequest) -> StoreResult<RunQueryResponse> {
        {
            let mut state = self.state.lock().unwrap();
            state.run_queries.push(request.clone());
            if let Some(err) = state.fail_run_queries.pop_front() {
                return Err(err);
            }
        }
        let query = match &request.input {
            QueryInput::Structured(query) => query.clone(),
            QueryInput::Gql(gql) => parse_gql(&gql.query_string)?,
        };
        Ok(self.execute(&request, &query))
    }

    async fn commit(&self, request: CommitRequest) -> StoreResult<CommitResponse> {
        let mut state = self.state.lock().unwrap();
        state.commits.push(request.clone());
        if let Some(err) = state.fail_commits.pop_front() {
            return Err(err);
        }

        if request.mutations.is_empty() || request.mutations.len() > SERVER_BATCH_LIMIT {
            return Err(StoreError::rpc(
                ErrorCode::InvalidArgument,
                format!("commit with {} mutations", request.mutations.len()),
            ));
        }
        // One key may appear at most once per commit.
        let mut seen = std::collections::HashSet::new();
        for mutation in &request.mutations {
            if !seen.insert(mutation.key().clone()) {
                return Err(StoreError::rpc(
                    ErrorCode::InvalidArgument,
                    format!("duplicate key in commit: {}", mutation.key()),
                ));
            }
        }

        let mut mutation_results = Vec::with_capacity(request.mutations.len());
        for mutation in &request.mutations {
            match mutation {
                Mutation::Upsert(entity) => {
                    state.entities.insert(entity.key.clone(), entity.clone());
                }
                Mutation::Delete(key) => {
                    state.entities.remove(key);
                }
            }
            mutation_results.push(MutationResult {
                key: Some(mutation.key().clone()),
                version: state.commits.len() as i64,
            });
        }
        Ok(CommitResponse {
            mutation_results,
            index_updates: 0,
        })
    }
}

/// Factory that hands out the same fake for every bundle.
pub struct FakeFactory(pub Arc<FakeStore>);

#[async_trait]
impl StoreFactory for FakeFactory {
    async fn connect(&self) -> StoreResult<Arc<dyn StoreRpc>> {
        Ok(self.0.clone())
    }
}

// ---- seeding helpers ----

use strata_core::{PathElement, Partition, Timestamp};

/// Entity of `kind` keyed by numeric `id`, padded to roughly `payload_bytes`.
pub fn entity_with_payload(
    partition: &Partition,
    kind: &str,
    id: i64,
    payload_bytes: usize,
) -> Entity {
    Entity::new(Key::new(partition.clone(), PathElement::id(kind, id)))
        .with_property("index", Value::Integer(id))
        .with_property("payload", Value::Blob(vec![0xabu8; payload_bytes]))
}

/// Seed the statistics rows the planner reads: the total row carrying the
/// snapshot timestamp and the per-kind row carrying sizes at that snapshot
/// (keyed in microseconds, the way the statistics tables store it).
pub fn seed_statistics(
    store: &FakeStore,
    partition: &Partition,
    kind: &str,
    entity_bytes: i64,
    count: i64,
    snapshot_seconds: i64,
) {
    let default_namespace = partition.is_default_namespace();
    let total_kind = if default_namespace {
        "__Stat_Total__"
    } else {
        "__Stat_Ns_Total__"
    };
    let kind_kind = if default_namespace {
        "__Stat_Kind__"
    } else {
        "__Stat_Ns_Kind__"
    };

    store.seed(
        Entity::new(Key::new(partition.clone(), PathElement::id(total_kind, 1))).with_property(
            "timestamp",
            Value::Timestamp(Timestamp {
                seconds: snapshot_seconds,
                nanos: 0,
            }),
        ),
    );
    store.seed(
        Entity::new(Key::new(
            partition.clone(),
            PathElement::name(kind_kind, format!("{kind}-row")),
        ))
        .with_property("kind_name", Value::Text(kind.to_string()))
        .with_property("timestamp", Value::Integer(snapshot_seconds * 1_000_000))
        .with_property("entity_bytes", Value::Integer(entity_bytes))
        .with_property("count", Value::Integer(count)),
    );
}
