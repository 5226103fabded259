//! Keys, entities, and property values for the Strata data model.
//!
//! These types mirror the Store's wire messages but stay plain Rust so the
//! planner and writer can be exercised without the transport. Byte-size
//! accounting lives here too: every type that ends up inside a commit knows a
//! deterministic estimate of its encoded size, which the writer uses for
//! batch budgeting.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Addressing tuple for a slice of the Store: project, database, namespace.
///
/// An empty `database_id` selects the default database, and an empty
/// `namespace` selects the default namespace. The transport is responsible
/// for leaving the namespace field unset on the wire when it is empty here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    pub project_id: String,
    pub database_id: String,
    pub namespace: String,
}

impl Partition {
    /// Build a partition for the default database and namespace.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: String::new(),
            namespace: String::new(),
        }
    }

    /// True when this partition addresses the default namespace.
    pub fn is_default_namespace(&self) -> bool {
        self.namespace.is_empty()
    }
}

/// Identifier of one path element: a non-zero numeric id or a non-empty name.
///
/// Within one kind, id-keyed entities order before name-keyed entities, which
/// the derived `Ord` preserves through variant order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathId {
    Id(i64),
    Name(String),
}

/// One step in a hierarchical key path: a kind plus an optional identifier.
///
/// The identifier is absent on incomplete keys, which the connector rejects
/// when constructing mutations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: String,
    pub id: Option<PathId>,
}

impl PathElement {
    /// Path element keyed by numeric id.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Id(id)),
        }
    }

    /// Path element keyed by name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(PathId::Name(name.into())),
        }
    }

    /// True when this element carries a usable identifier.
    fn is_identified(&self) -> bool {
        match &self.id {
            Some(PathId::Id(id)) => *id != 0,
            Some(PathId::Name(name)) => !name.is_empty(),
            None => false,
        }
    }
}

/// Hierarchical key: a partition plus an ordered path of elements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub partition: Partition,
    pub path: Vec<PathElement>,
}

impl Key {
    /// Key with a single path element in the given partition.
    pub fn new(partition: Partition, element: PathElement) -> Self {
        Self {
            partition,
            path: vec![element],
        }
    }

    /// A key is complete iff its last path element has a non-zero id or a
    /// non-empty name. The connector never synthesizes identifiers, so only
    /// complete keys are accepted into mutations.
    pub fn is_complete(&self) -> bool {
        self.path.last().is_some_and(PathElement::is_identified)
    }

    /// Kind of the leaf path element, empty for an empty path.
    pub fn kind(&self) -> &str {
        self.path.last().map(|e| e.kind.as_str()).unwrap_or("")
    }

    /// Deterministic estimate of the encoded proto size in bytes.
    pub fn byte_size(&self) -> usize {
        let partition = self.partition.project_id.len()
            + self.partition.database_id.len()
            + self.partition.namespace.len()
            + 6;
        let path: usize = self
            .path
            .iter()
            .map(|e| {
                let id = match &e.id {
                    Some(PathId::Id(_)) => 10,
                    Some(PathId::Name(name)) => name.len() + 2,
                    None => 0,
                };
                e.kind.len() + id + 4
            })
            .sum();
        partition + path
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match &element.id {
                Some(PathId::Id(id)) => write!(f, "{}:{id}", element.kind)?,
                Some(PathId::Name(name)) => write!(f, "{}:{name}", element.kind)?,
                None => write!(f, "{}:?", element.kind)?,
            }
        }
        Ok(())
    }
}

/// Wall-clock instant carried on the wire as seconds plus nanoseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    /// Build from milliseconds since the Unix epoch.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            seconds: millis.div_euclid(1000),
            nanos: (millis.rem_euclid(1000) as i32) * 1_000_000,
        }
    }

    /// Seconds-since-epoch, dropping sub-second precision.
    pub fn as_seconds(&self) -> i64 {
        self.seconds
    }
}

/// Scalar property value.
///
/// The connector treats entities as opaque apart from the statistics
/// properties it inspects, so the value model is intentionally flat: no
/// nested entities or arrays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    Text(String),
    Blob(Vec<u8>),
    Key(Key),
}

impl Value {
    /// Integer payload, if this value is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Timestamp payload, if this value is a timestamp.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Key payload, if this value is a key reference.
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(key) => Some(key),
            _ => None,
        }
    }

    /// Deterministic estimate of the encoded proto size in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            Value::Null => 2,
            Value::Boolean(_) => 2,
            Value::Integer(_) => 10,
            Value::Double(_) => 9,
            Value::Timestamp(_) => 12,
            Value::Text(text) => text.len() + 3,
            Value::Blob(blob) => blob.len() + 3,
            Value::Key(key) => key.byte_size() + 2,
        }
    }
}

/// An opaque record: a complete key plus named scalar properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    pub properties: BTreeMap<String, Value>,
}

impl Entity {
    /// Entity with no properties.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    /// Attach a property, replacing any previous value under the same name.
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Deterministic estimate of the encoded proto size in bytes.
    pub fn byte_size(&self) -> usize {
        let properties: usize = self
            .properties
            .iter()
            .map(|(name, value)| name.len() + value.byte_size() + 4)
            .sum();
        self.key.byte_size() + properties + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Partition {
        Partition::new("test-project")
    }

    #[test]
    fn key_completeness_requires_leaf_identifier() {
        let complete_id = Key::new(partition(), PathElement::id("Order", 7));
        let complete_name = Key::new(partition(), PathElement::name("Order", "o-7"));
        let incomplete = Key::new(
            partition(),
            PathElement {
                kind: "Order".to_string(),
                id: None,
            },
        );
        let zero_id = Key::new(partition(), PathElement::id("Order", 0));
        let empty_name = Key::new(partition(), PathElement::name("Order", ""));

        assert!(complete_id.is_complete());
        assert!(complete_name.is_complete());
        assert!(!incomplete.is_complete());
        assert!(!zero_id.is_complete());
        assert!(!empty_name.is_complete());
    }

    #[test]
    fn completeness_checks_only_the_leaf() {
        let key = Key {
            partition: partition(),
            path: vec![
                PathElement {
                    kind: "Customer".to_string(),
                    id: None,
                },
                PathElement::id("Order", 12),
            ],
        };
        assert!(key.is_complete());
    }

    #[test]
    fn ids_order_before_names_within_a_kind() {
        let by_id = Key::new(partition(), PathElement::id("Order", i64::MAX));
        let by_name = Key::new(partition(), PathElement::name("Order", "a"));
        assert!(by_id < by_name);
    }

    #[test]
    fn byte_size_grows_with_payload() {
        let key = Key::new(partition(), PathElement::id("Order", 7));
        let small = Entity::new(key.clone()).with_property("note", Value::Text("x".into()));
        let large =
            Entity::new(key).with_property("note", Value::Text("x".repeat(1024)));
        assert!(large.byte_size() > small.byte_size() + 1000);
    }

    #[test]
    fn timestamp_from_millis_splits_seconds_and_nanos() {
        let ts = Timestamp::from_millis(1_500);
        assert_eq!(ts.seconds, 1);
        assert_eq!(ts.nanos, 500_000_000);

        let negative = Timestamp::from_millis(-250);
        assert_eq!(negative.seconds, -1);
        assert_eq!(negative.nanos, 750_000_000);
    }
}
