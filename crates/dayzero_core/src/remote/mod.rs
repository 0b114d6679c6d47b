//! Remote document store abstraction.
//!
//! The remote store is the source of truth for all documents, including
//! the per-user profile carrying the anchor instant. This module defines
//! the [`RemoteDocumentStore`] trait the platform adapter implements
//! (typically over a hosted document database), plus the composite
//! [`DocKey`] and the small [`QueryCondition`] language shared by remote
//! queries and the client-side cache filter.
//!
//! The store is assumed to provide per-document atomic writes and nothing
//! more; no multi-document transactions are required anywhere in the
//! core.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::BoxFuture;

/// Composite key addressing one document inside one collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocKey {
    /// Collection name, e.g. `"users"`.
    pub collection: String,
    /// Document id inside the collection.
    pub id: String,
}

impl DocKey {
    /// Create a key from collection and document id.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Path form `"collection/id"`, used as the cache map key.
    pub fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Comparison operator for a [`QueryCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    /// Field equals value.
    #[serde(rename = "==")]
    Eq,
    /// Field differs from value.
    #[serde(rename = "!=")]
    Ne,
    /// Field is less than value.
    #[serde(rename = "<")]
    Lt,
    /// Field is less than or equal to value.
    #[serde(rename = "<=")]
    Le,
    /// Field is greater than value.
    #[serde(rename = ">")]
    Gt,
    /// Field is greater than or equal to value.
    #[serde(rename = ">=")]
    Ge,
}

/// One `field <op> value` clause. Conditions in a query are conjunctive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCondition {
    /// Top-level document field the condition reads.
    pub field: String,
    /// Comparison operator.
    pub op: QueryOp,
    /// Value compared against.
    pub value: Value,
}

impl QueryCondition {
    /// Create a condition.
    pub fn new(field: impl Into<String>, op: QueryOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this condition against a document snapshot.
    ///
    /// Ordered comparisons are defined for numbers (compared as f64) and
    /// strings; everything else only supports equality. A missing field
    /// satisfies no condition except `!=`.
    pub fn matches(&self, doc: &Value) -> bool {
        let field_value = doc.get(&self.field);
        match self.op {
            QueryOp::Eq => field_value == Some(&self.value),
            QueryOp::Ne => field_value != Some(&self.value),
            QueryOp::Lt | QueryOp::Le | QueryOp::Gt | QueryOp::Ge => {
                let Some(field_value) = field_value else {
                    return false;
                };
                let Some(ordering) = compare_values(field_value, &self.value) else {
                    return false;
                };
                match self.op {
                    QueryOp::Lt => ordering.is_lt(),
                    QueryOp::Le => ordering.is_le(),
                    QueryOp::Gt => ordering.is_gt(),
                    QueryOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Async abstraction over the remote document store.
///
/// # Merge semantics
///
/// `set_doc` with `merge = false` is an upsert of the full document.
/// With `merge = true` it shallow-merges `data` into an *existing*
/// document and fails with
/// [`DayzeroError::NotFound`](crate::error::DayzeroError::NotFound) when
/// the document is absent — mirroring update-style calls in hosted
/// document databases. Callers that want create-or-merge handle the
/// NotFound themselves (the sync engine recreates, per its
/// update-operation policy).
pub trait RemoteDocumentStore: Send + Sync {
    /// Fetch one document snapshot, or `None` if absent.
    fn get_doc<'a>(&'a self, key: &'a DocKey) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Write a document. See the trait docs for merge semantics.
    fn set_doc<'a>(
        &'a self,
        key: &'a DocKey,
        data: &'a Value,
        merge: bool,
    ) -> BoxFuture<'a, Result<()>>;

    /// Delete a document. Deleting an absent document fails with
    /// `NotFound`; callers decide whether that is satisfiable.
    fn delete_doc<'a>(&'a self, key: &'a DocKey) -> BoxFuture<'a, Result<()>>;

    /// Query a collection with a conjunction of conditions.
    fn query_docs<'a>(
        &'a self,
        collection: &'a str,
        conditions: &'a [QueryCondition],
    ) -> BoxFuture<'a, Result<Vec<(DocKey, Value)>>>;
}
