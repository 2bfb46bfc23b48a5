use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use tokio::sync::RwLock;

use super::{DocumentStore, FieldViolation, FindQuery, Lookup, StoreError, StoreResult};

/// Schema rule applied to every document written through a `MemoryStore`.
pub type SchemaCheck = fn(&Document) -> Vec<FieldViolation>;

/// MemoryDatabase
///
/// A set of named in-process collections. Stores created from the same database see
/// each other's collections, which is what lookups resolve against.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`, regardless of any filter.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

/// MemoryStore
///
/// In-memory `DocumentStore`. Unique indexes and the schema check are evaluated
/// under the collection's write lock, so they hold under concurrent writers the same
/// way a server-side index does.
#[derive(Clone)]
pub struct MemoryStore {
    db: MemoryDatabase,
    name: String,
    unique_fields: Vec<String>,
    schema: Option<SchemaCheck>,
}

impl MemoryStore {
    pub fn new(db: &MemoryDatabase, name: impl Into<String>) -> Self {
        Self {
            db: db.clone(),
            name: name.into(),
            unique_fields: Vec::new(),
            schema: None,
        }
    }

    pub fn with_unique_index(mut self, field: impl Into<String>) -> Self {
        self.unique_fields.push(field.into());
        self
    }

    pub fn with_schema(mut self, check: SchemaCheck) -> Self {
        self.schema = Some(check);
        self
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn validate(&self, document: &Document) -> StoreResult<()> {
        let violations = self.schema.map(|check| check(document)).unwrap_or_default();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(StoreError::SchemaValidation(violations))
        }
    }

    fn check_unique(&self, existing: &[Document], candidate: &Document) -> StoreResult<()> {
        let candidate_id = candidate.get("_id");
        for field in &self.unique_fields {
            let Some(value) = candidate.get(field) else {
                continue;
            };
            let taken = existing
                .iter()
                .filter(|other| other.get("_id") != candidate_id)
                .any(|other| other.get(field) == Some(value));
            if taken {
                return Err(StoreError::DuplicateKey {
                    field: field.clone(),
                    value: display_value(value),
                });
            }
        }
        Ok(())
    }

    fn resolve_lookups(
        collections: &HashMap<String, Vec<Document>>,
        mut document: Document,
        lookups: &[Lookup],
    ) -> Document {
        for lookup in lookups {
            let local = document.get(&lookup.local_field).cloned().unwrap_or(Bson::Null);
            let joined: Vec<Bson> = collections
                .get(&lookup.from)
                .map(|foreign| {
                    foreign
                        .iter()
                        .filter(|candidate| {
                            let foreign_value = candidate.get(&lookup.foreign_field);
                            match &local {
                                Bson::Array(values) => {
                                    foreign_value.is_some_and(|value| values.contains(value))
                                }
                                single => equals(foreign_value, single),
                            }
                        })
                        .cloned()
                        .map(Bson::Document)
                        .collect()
                })
                .unwrap_or_default();
            document.insert(lookup.as_field.clone(), Bson::Array(joined));
        }
        document
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn collection_name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, document: Document) -> StoreResult<Document> {
        self.validate(&document)?;

        let mut collections = self.db.collections.write().await;
        let collection = collections.entry(self.name.clone()).or_default();

        if let Some(id) = document.get("_id") {
            if collection.iter().any(|existing| existing.get("_id") == Some(id)) {
                return Err(StoreError::DuplicateKey {
                    field: "_id".to_string(),
                    value: display_value(id),
                });
            }
        }
        self.check_unique(collection, &document)?;

        collection.push(document.clone());
        Ok(document)
    }

    async fn find(&self, query: FindQuery) -> StoreResult<Vec<Document>> {
        let collections = self.db.collections.read().await;
        let mut matched: Vec<&Document> = collections
            .get(&self.name)
            .map(|docs| docs.iter().filter(|doc| matches(doc, &query.filter)).collect())
            .unwrap_or_default();

        // Stable sort, so insertion order breaks ties.
        matched.sort_by(|a, b| compare_by_sort(a, b, &query.sort));

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = match query.limit {
            Some(limit) if limit > 0 => usize::try_from(limit).unwrap_or(usize::MAX),
            _ => usize::MAX,
        };

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| Self::resolve_lookups(&collections, doc.clone(), &query.lookups))
            .collect())
    }

    async fn count(&self, filter: Document) -> StoreResult<u64> {
        let collections = self.db.collections.read().await;
        let count = collections
            .get(&self.name)
            .map_or(0, |docs| docs.iter().filter(|doc| matches(doc, &filter)).count());
        Ok(count as u64)
    }

    async fn find_one(&self, filter: Document, lookups: &[Lookup]) -> StoreResult<Option<Document>> {
        let collections = self.db.collections.read().await;
        Ok(collections
            .get(&self.name)
            .and_then(|docs| docs.iter().find(|doc| matches(doc, &filter)))
            .map(|doc| Self::resolve_lookups(&collections, doc.clone(), lookups)))
    }

    async fn update_by_id(&self, id: ObjectId, changes: Document) -> StoreResult<Option<Document>> {
        let mut collections = self.db.collections.write().await;
        let Some(collection) = collections.get_mut(&self.name) else {
            return Ok(None);
        };
        let Some(position) = collection
            .iter()
            .position(|doc| doc.get_object_id("_id").ok() == Some(id))
        else {
            return Ok(None);
        };

        let mut updated = collection[position].clone();
        for (key, value) in changes {
            updated.insert(key, value);
        }

        self.validate(&updated)?;
        self.check_unique(collection, &updated)?;

        collection[position] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_by_id(&self, id: ObjectId) -> StoreResult<Option<Document>> {
        let mut collections = self.db.collections.write().await;
        let Some(collection) = collections.get_mut(&self.name) else {
            return Ok(None);
        };
        Ok(collection
            .iter()
            .position(|doc| doc.get_object_id("_id").ok() == Some(id))
            .map(|position| collection.remove(position)))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Renders a BSON value the way it appears in a duplicate-key message.
fn display_value(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// matches
///
/// Evaluates the subset of the MongoDB query language the services use: field
/// equality (with array membership), `$eq`, `$ne`, `$in`, `$nin`, `$exists`, and
/// top-level `$and` / `$or`.
pub(crate) fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => sub_filters(condition).all(|sub| matches(document, sub)),
        "$or" => sub_filters(condition).any(|sub| matches(document, sub)),
        _ => {
            let actual = document.get(key);
            match condition {
                Bson::Document(ops) if is_operator_document(ops) => ops
                    .iter()
                    .all(|(op, argument)| apply_operator(op, actual, argument)),
                expected => equals(actual, expected),
            }
        }
    })
}

fn sub_filters(condition: &Bson) -> impl Iterator<Item = &Document> {
    condition
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
}

fn is_operator_document(ops: &Document) -> bool {
    !ops.is_empty() && ops.keys().all(|key| key.starts_with('$'))
}

fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => items.contains(expected),
        Some(value) => value == expected,
        None => matches!(expected, Bson::Null),
    }
}

fn apply_operator(op: &str, actual: Option<&Bson>, argument: &Bson) -> bool {
    match op {
        "$eq" => equals(actual, argument),
        "$ne" => !equals(actual, argument),
        "$in" => argument
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| equals(actual, c))),
        "$nin" => argument
            .as_array()
            .is_none_or(|candidates| !candidates.iter().any(|c| equals(actual, c))),
        "$exists" => actual.is_some() == argument.as_bool().unwrap_or(true),
        _ => false,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let descending = match direction {
            Bson::Int32(d) => *d < 0,
            Bson::Int64(d) => *d < 0,
            Bson::Double(d) => *d < 0.0,
            _ => false,
        };
        let ordering = compare_values(a.get(field), b.get(field));
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_values(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Bson::DateTime(x)), Some(Bson::DateTime(y))) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(Bson::Boolean(x)), Some(Bson::Boolean(y))) => x.cmp(y),
        (Some(Bson::ObjectId(x)), Some(Bson::ObjectId(y))) => x.bytes().cmp(&y.bytes()),
        (Some(x), Some(y)) => match (as_number(x), as_number(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
