//! gRPC transport for the Store, plus wire/domain conversions.
//!
//! `StrataClient` implements `strata_core::StoreRpc` over the volo-generated
//! service client; `StrataFactory` builds one client per bundle. Everything
//! else in this module is the bidirectional mapping between the plain domain
//! model and the generated proto types, including the status-code mapping
//! that drives the retry policy.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use strata_core::{
    CommitRequest, CommitResponse, Direction, Entity, EntityResult, ErrorCode, FilterOp, Key,
    MoreResults, Mutation, MutationResult, PathElement, PathId, Partition, PropertyFilter,
    PropertyOrder, Query, QueryInput, QueryResultBatch, ReadOptions, RunQueryRequest,
    RunQueryResponse, StoreError, StoreFactory, StoreResult, StoreRpc, Timestamp,
};

use crate::config::Credentials;
use crate::volo_gen::strata::rpc;

/// Production batch endpoint of the Store.
pub const DEFAULT_ENDPOINT: &str = "batch.strata-api.dev:9811";

// Wire codes for the int32-discriminated fields. The zero value of every
// code space is "unspecified" and never sent.
const VALUE_TYPE_NULL: i32 = 1;
const VALUE_TYPE_BOOLEAN: i32 = 2;
const VALUE_TYPE_INTEGER: i32 = 3;
const VALUE_TYPE_DOUBLE: i32 = 4;
const VALUE_TYPE_TIMESTAMP: i32 = 5;
const VALUE_TYPE_TEXT: i32 = 6;
const VALUE_TYPE_BLOB: i32 = 7;
const VALUE_TYPE_KEY: i32 = 8;

const FILTER_OP_EQUAL: i32 = 1;
const FILTER_OP_LESS_THAN: i32 = 2;
const FILTER_OP_LESS_THAN_OR_EQUAL: i32 = 3;
const FILTER_OP_GREATER_THAN: i32 = 4;
const FILTER_OP_GREATER_THAN_OR_EQUAL: i32 = 5;

const DIRECTION_ASCENDING: i32 = 1;
const DIRECTION_DESCENDING: i32 = 2;

const MORE_RESULTS_NOT_FINISHED: i32 = 1;
const MORE_RESULTS_AFTER_LIMIT: i32 = 2;
const MORE_RESULTS_AFTER_END_CURSOR: i32 = 3;
const MORE_RESULTS_NO_MORE: i32 = 4;

const MUTATION_OP_UPSERT: i32 = 1;
const MUTATION_OP_DELETE: i32 = 4;

const COMMIT_MODE_NON_TRANSACTIONAL: i32 = 2;

/// Resolve a `host:port` endpoint to a socket address.
async fn resolve(endpoint: &str) -> StoreResult<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(endpoint)
        .await
        .map_err(|err| StoreError::Transport(format!("resolve {endpoint}: {err}")))?;
    addrs
        .next()
        .ok_or_else(|| StoreError::Transport(format!("no address for {endpoint}")))
}

/// gRPC-backed Store client.
pub struct StrataClient {
    client: rpc::StrataRpcClient,
    // Held for channel setup; the connector never inspects it.
    _credentials: Credentials,
}

impl StrataClient {
    /// Connect to `endpoint` (`host:port`).
    pub async fn connect(endpoint: &str, credentials: Credentials) -> StoreResult<Self> {
        let addr = resolve(endpoint).await?;
        let client = rpc::StrataRpcClientBuilder::new("strata.rpc.StrataRpc")
            .address(volo::net::Address::from(addr))
            .build();
        Ok(Self {
            client,
            _credentials: credentials,
        })
    }
}

#[async_trait]
impl StoreRpc for StrataClient {
    async fn run_query(&self, request: RunQueryRequest) -> StoreResult<RunQueryResponse> {
        let response = self
            .client
            .run_query(to_rpc_run_query_request(&request))
            .await
            .map_err(status_to_error)?;
        from_rpc_run_query_response(response.into_inner())
    }

    async fn commit(&self, request: CommitRequest) -> StoreResult<CommitResponse> {
        let response = self
            .client
            .commit(to_rpc_commit_request(&request))
            .await
            .map_err(status_to_error)?;
        Ok(from_rpc_commit_response(response.into_inner()))
    }
}

/// Builds a gRPC Store client per bundle, honoring the emulator override.
pub struct StrataFactory {
    endpoint: String,
    credentials: Credentials,
}

impl StrataFactory {
    /// Factory against the production endpoint or, when `localhost` is set,
    /// an emulator.
    pub fn new(localhost: Option<String>, credentials: Credentials) -> Self {
        Self {
            endpoint: localhost.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            credentials,
        }
    }

    /// Endpoint this factory connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StoreFactory for StrataFactory {
    async fn connect(&self) -> StoreResult<Arc<dyn StoreRpc>> {
        let client = StrataClient::connect(&self.endpoint, self.credentials.clone()).await?;
        Ok(Arc::new(client))
    }
}

/// Map a gRPC status onto the connector's error taxonomy.
fn status_to_error(status: volo_grpc::Status) -> StoreError {
    let code = match status.code() {
        volo_grpc::Code::Cancelled => ErrorCode::Cancelled,
        volo_grpc::Code::InvalidArgument => ErrorCode::InvalidArgument,
        volo_grpc::Code::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        volo_grpc::Code::NotFound => ErrorCode::NotFound,
        volo_grpc::Code::AlreadyExists => ErrorCode::AlreadyExists,
        volo_grpc::Code::PermissionDenied => ErrorCode::PermissionDenied,
        volo_grpc::Code::ResourceExhausted => ErrorCode::ResourceExhausted,
        volo_grpc::Code::FailedPrecondition => ErrorCode::FailedPrecondition,
        volo_grpc::Code::Aborted => ErrorCode::Aborted,
        volo_grpc::Code::OutOfRange => ErrorCode::OutOfRange,
        volo_grpc::Code::Unimplemented => ErrorCode::Unimplemented,
        volo_grpc::Code::Internal => ErrorCode::Internal,
        volo_grpc::Code::Unavailable => ErrorCode::Unavailable,
        volo_grpc::Code::DataLoss => ErrorCode::DataLoss,
        volo_grpc::Code::Unauthenticated => ErrorCode::Unauthenticated,
        _ => ErrorCode::Unknown,
    };
    StoreError::rpc(code, status.message().to_string())
}

// ---- domain -> wire ----

fn to_rpc_partition(partition: &Partition) -> rpc::PartitionId {
    rpc::PartitionId {
        project_id: partition.project_id.clone().into(),
        database_id: partition.database_id.clone().into(),
        // Empty string is the proto3 unset encoding, which is exactly the
        // default-namespace rule.
        namespace_id: partition.namespace.clone().into(),
    }
}

fn to_rpc_key(key: &Key) -> rpc::Key {
    rpc::Key {
        partition_id: Some(to_rpc_partition(&key.partition)),
        path: key.path.iter().map(to_rpc_path_element).collect(),
    }
}

fn to_rpc_path_element(element: &PathElement) -> rpc::PathElement {
    let (id, name) = match &element.id {
        Some(PathId::Id(id)) => (*id, String::new()),
        Some(PathId::Name(name)) => (0, name.clone()),
        None => (0, String::new()),
    };
    rpc::PathElement {
        kind: element.kind.clone().into(),
        id,
        name: name.into(),
    }
}

fn to_rpc_timestamp(ts: &Timestamp) -> rpc::Timestamp {
    rpc::Timestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    }
}

fn to_rpc_value(value: &strata_core::Value) -> rpc::Value {
    let mut out = rpc::Value {
        value_type: VALUE_TYPE_NULL,
        boolean_value: false,
        integer_value: 0,
        double_value: 0.0,
        timestamp_value: None,
        text_value: String::new().into(),
        blob_value: Bytes::new(),
        key_value: None,
    };
    match value {
        strata_core::Value::Null => {}
        strata_core::Value::Boolean(v) => {
            out.value_type = VALUE_TYPE_BOOLEAN;
            out.boolean_value = *v;
        }
        strata_core::Value::Integer(v) => {
            out.value_type = VALUE_TYPE_INTEGER;
            out.integer_value = *v;
        }
        strata_core::Value::Double(v) => {
            out.value_type = VALUE_TYPE_DOUBLE;
            out.double_value = *v;
        }
        strata_core::Value::Timestamp(ts) => {
            out.value_type = VALUE_TYPE_TIMESTAMP;
            out.timestamp_value = Some(to_rpc_timestamp(ts));
        }
        strata_core::Value::Text(v) => {
            out.value_type = VALUE_TYPE_TEXT;
            out.text_value = v.clone().into();
        }
        strata_core::Value::Blob(v) => {
            out.value_type = VALUE_TYPE_BLOB;
            out.blob_value = Bytes::from(v.clone());
        }
        strata_core::Value::Key(key) => {
            out.value_type = VALUE_TYPE_KEY;
            out.key_value = Some(to_rpc_key(key));
        }
    }
    out
}

fn to_rpc_entity(entity: &Entity) -> rpc::Entity {
    rpc::Entity {
        key: Some(to_rpc_key(&entity.key)),
        properties: entity
            .properties
            .iter()
            .map(|(name, value)| rpc::Property {
                name: name.clone().into(),
                value: Some(to_rpc_value(value)),
            })
            .collect(),
    }
}

fn to_rpc_filter_op(op: FilterOp) -> i32 {
    match op {
        FilterOp::Equal => FILTER_OP_EQUAL,
        FilterOp::LessThan => FILTER_OP_LESS_THAN,
        FilterOp::LessThanOrEqual => FILTER_OP_LESS_THAN_OR_EQUAL,
        FilterOp::GreaterThan => FILTER_OP_GREATER_THAN,
        FilterOp::GreaterThanOrEqual => FILTER_OP_GREATER_THAN_OR_EQUAL,
    }
}

fn to_rpc_query(query: &Query) -> rpc::Query {
    rpc::Query {
        kind: vec![rpc::KindExpression {
            name: query.kind.clone().into(),
        }],
        filter: query
            .filters
            .iter()
            .map(|f| rpc::PropertyFilter {
                property: Some(rpc::PropertyReference {
                    name: f.property.clone().into(),
                }),
                op: to_rpc_filter_op(f.op),
                value: Some(to_rpc_value(&f.value)),
            })
            .collect(),
        order: query
            .orders
            .iter()
            .map(|o| rpc::PropertyOrder {
                property: Some(rpc::PropertyReference {
                    name: o.property.clone().into(),
                }),
                direction: match o.direction {
                    Direction::Ascending => DIRECTION_ASCENDING,
                    Direction::Descending => DIRECTION_DESCENDING,
                },
            })
            .collect(),
        limit: query.limit.unwrap_or(0),
        start_cursor: Bytes::from(query.start_cursor.clone().unwrap_or_default()),
        end_cursor: Bytes::from(query.end_cursor.clone().unwrap_or_default()),
    }
}

fn to_rpc_read_options(read_options: &Option<ReadOptions>) -> Option<rpc::ReadOptions> {
    read_options.as_ref().map(|options| rpc::ReadOptions {
        read_time: options.read_time.as_ref().map(to_rpc_timestamp),
    })
}

fn to_rpc_run_query_request(request: &RunQueryRequest) -> rpc::RunQueryRequest {
    let (query, gql_query) = match &request.input {
        QueryInput::Structured(query) => (Some(to_rpc_query(query)), None),
        QueryInput::Gql(gql) => (
            None,
            Some(rpc::GqlQuery {
                query_string: gql.query_string.clone().into(),
                allow_literals: gql.allow_literals,
            }),
        ),
    };
    rpc::RunQueryRequest {
        project_id: request.partition.project_id.clone().into(),
        database_id: request.partition.database_id.clone().into(),
        partition_id: Some(to_rpc_partition(&request.partition)),
        query,
        gql_query,
        read_options: to_rpc_read_options(&request.read_options),
    }
}

fn to_rpc_mutation(mutation: &Mutation) -> rpc::Mutation {
    match mutation {
        Mutation::Upsert(entity) => rpc::Mutation {
            op: MUTATION_OP_UPSERT,
            entity: Some(to_rpc_entity(entity)),
            key: None,
        },
        Mutation::Delete(key) => rpc::Mutation {
            op: MUTATION_OP_DELETE,
            entity: None,
            key: Some(to_rpc_key(key)),
        },
    }
}

fn to_rpc_commit_request(request: &CommitRequest) -> rpc::CommitRequest {
    rpc::CommitRequest {
        project_id: request.project_id.clone().into(),
        database_id: request.database_id.clone().into(),
        mode: COMMIT_MODE_NON_TRANSACTIONAL,
        mutations: request.mutations.iter().map(to_rpc_mutation).collect(),
    }
}

// ---- wire -> domain ----

fn from_rpc_partition(partition: Option<rpc::PartitionId>) -> Partition {
    let Some(partition) = partition else {
        return Partition::default();
    };
    Partition {
        project_id: partition.project_id.to_string(),
        database_id: partition.database_id.to_string(),
        namespace: partition.namespace_id.to_string(),
    }
}

fn from_rpc_key(key: rpc::Key) -> Key {
    Key {
        partition: from_rpc_partition(key.partition_id),
        path: key
            .path
            .into_iter()
            .map(|element| {
                let id = if element.id != 0 {
                    Some(PathId::Id(element.id))
                } else if !element.name.is_empty() {
                    Some(PathId::Name(element.name.to_string()))
                } else {
                    None
                };
                PathElement {
                    kind: element.kind.to_string(),
                    id,
                }
            })
            .collect(),
    }
}

fn from_rpc_timestamp(ts: rpc::Timestamp) -> Timestamp {
    Timestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
    }
}

fn from_rpc_value(value: rpc::Value) -> StoreResult<strata_core::Value> {
    let out = match value.value_type {
        VALUE_TYPE_NULL => strata_core::Value::Null,
        VALUE_TYPE_BOOLEAN => strata_core::Value::Boolean(value.boolean_value),
        VALUE_TYPE_INTEGER => strata_core::Value::Integer(value.integer_value),
        VALUE_TYPE_DOUBLE => strata_core::Value::Double(value.double_value),
        VALUE_TYPE_TIMESTAMP => {
            let ts = value.timestamp_value.ok_or_else(|| {
                StoreError::Transport("timestamp value missing payload".to_string())
            })?;
            strata_core::Value::Timestamp(from_rpc_timestamp(ts))
        }
        VALUE_TYPE_TEXT => strata_core::Value::Text(value.text_value.to_string()),
        VALUE_TYPE_BLOB => strata_core::Value::Blob(value.blob_value.to_vec()),
        VALUE_TYPE_KEY => {
            let key = value
                .key_value
                .ok_or_else(|| StoreError::Transport("key value missing payload".to_string()))?;
            strata_core::Value::Key(from_rpc_key(key))
        }
        other => {
            return Err(StoreError::Transport(format!(
                "unknown value type code {other}"
            )))
        }
    };
    Ok(out)
}

fn from_rpc_entity(entity: rpc::Entity) -> StoreResult<Entity> {
    let key = entity
        .key
        .ok_or_else(|| StoreError::Transport("entity missing key".to_string()))?;
    let mut out = Entity::new(from_rpc_key(key));
    for property in entity.properties {
        let value = property
            .value
            .ok_or_else(|| StoreError::Transport("property missing value".to_string()))?;
        out.properties
            .insert(property.name.to_string(), from_rpc_value(value)?);
    }
    Ok(out)
}

fn from_rpc_filter_op(op: i32) -> StoreResult<FilterOp> {
    match op {
        FILTER_OP_EQUAL => Ok(FilterOp::Equal),
        FILTER_OP_LESS_THAN => Ok(FilterOp::LessThan),
        FILTER_OP_LESS_THAN_OR_EQUAL => Ok(FilterOp::LessThanOrEqual),
        FILTER_OP_GREATER_THAN => Ok(FilterOp::GreaterThan),
        FILTER_OP_GREATER_THAN_OR_EQUAL => Ok(FilterOp::GreaterThanOrEqual),
        other => Err(StoreError::Transport(format!(
            "unknown filter op code {other}"
        ))),
    }
}

fn from_rpc_query(query: rpc::Query) -> StoreResult<Query> {
    let mut filters = Vec::with_capacity(query.filter.len());
    for filter in query.filter {
        let property = filter
            .property
            .ok_or_else(|| StoreError::Transport("filter missing property".to_string()))?;
        let value = filter
            .value
            .ok_or_else(|| StoreError::Transport("filter missing value".to_string()))?;
        filters.push(PropertyFilter {
            property: property.name.to_string(),
            op: from_rpc_filter_op(filter.op)?,
            value: from_rpc_value(value)?,
        });
    }
    let mut orders = Vec::with_capacity(query.order.len());
    for order in query.order {
        let property = order
            .property
            .ok_or_else(|| StoreError::Transport("order missing property".to_string()))?;
        let direction = match order.direction {
            DIRECTION_ASCENDING => Direction::Ascending,
            DIRECTION_DESCENDING => Direction::Descending,
            other => {
                return Err(StoreError::Transport(format!(
                    "unknown direction code {other}"
                )))
            }
        };
        orders.push(PropertyOrder {
            property: property.name.to_string(),
            direction,
        });
    }
    Ok(Query {
        kind: query
            .kind
            .first()
            .map(|k| k.name.to_string())
            .unwrap_or_default(),
        filters,
        orders,
        limit: (query.limit > 0).then_some(query.limit),
        start_cursor: (!query.start_cursor.is_empty()).then(|| query.start_cursor.to_vec()),
        end_cursor: (!query.end_cursor.is_empty()).then(|| query.end_cursor.to_vec()),
    })
}

fn from_rpc_more_results(code: i32) -> MoreResults {
    match code {
        MORE_RESULTS_NOT_FINISHED => MoreResults::NotFinished,
        MORE_RESULTS_AFTER_LIMIT => MoreResults::MoreResultsAfterLimit,
        MORE_RESULTS_AFTER_END_CURSOR => MoreResults::MoreResultsAfterEndCursor,
        MORE_RESULTS_NO_MORE => MoreResults::NoMoreResults,
        other => {
            // Unknown verdicts stop pagination rather than spinning on it.
            tracing::warn!(code = other, "unknown more_results code, treating as exhausted");
            MoreResults::NoMoreResults
        }
    }
}

fn from_rpc_run_query_response(response: rpc::RunQueryResponse) -> StoreResult<RunQueryResponse> {
    let batch = response
        .batch
        .ok_or_else(|| StoreError::Transport("run_query response missing batch".to_string()))?;
    let mut entity_results = Vec::with_capacity(batch.entity_results.len());
    for result in batch.entity_results {
        let entity = result
            .entity
            .ok_or_else(|| StoreError::Transport("entity result missing entity".to_string()))?;
        entity_results.push(EntityResult {
            entity: from_rpc_entity(entity)?,
            cursor: (!result.cursor.is_empty()).then(|| result.cursor.to_vec()),
        });
    }
    Ok(RunQueryResponse {
        batch: QueryResultBatch {
            entity_results,
            end_cursor: batch.end_cursor.to_vec(),
            more_results: from_rpc_more_results(batch.more_results),
        },
        query: response.query.map(from_rpc_query).transpose()?,
    })
}

fn from_rpc_commit_response(response: rpc::CommitResponse) -> CommitResponse {
    CommitResponse {
        mutation_results: response
            .mutation_results
            .into_iter()
            .map(|result| MutationResult {
                key: result.key.map(from_rpc_key),
                version: result.version,
            })
            .collect(),
        index_updates: response.index_updates,
    }
}
