//! Collection-style record store: the `RecordStore` seam, a PocketBase HTTP backend and an
//! in-memory backend.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{HttpClientConfig, HttpError, JsonHttpClient};

pub const GROUPS: &str = "groups";
pub const MEMBERS: &str = "members";
pub const PLANS: &str = "plans";
pub const SERVICE_RULES: &str = "service_rules";
pub const USERS: &str = "users";
pub const MEETINGS: &str = "meetings";
pub const PROTOCOL_ITEMS: &str = "protocol_items";
pub const MEETING_ATTENDANCE: &str = "meeting_attendance";

#[derive(Debug, Error)]
pub enum StoreError {
    /// Lookup miss; drives create-vs-update branching.
    #[error("no {collection} record matches {query}")]
    NotFound { collection: String, query: String },
    #[error("record store authentication failed: {0}")]
    Auth(String),
    #[error("record store rejected {operation} on {collection}: {message}")]
    Rejected {
        collection: String,
        operation: &'static str,
        message: String,
    },
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("decoding {collection} record: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Conjunction of `field = "value"` clauses.
///
/// Against a relation field holding several ids, a clause matches when any id equals the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<(String, String)>,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<String>) -> Self {
        Self::default().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// `field="value" && field2="value2"` with quotes and backslashes escaped.
    pub fn to_expression(&self) -> String {
        self.clauses
            .iter()
            .map(|(field, value)| {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                format!("{field}=\"{escaped}\"")
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }

    pub fn matches(&self, record: &JsonValue) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| field_matches(record.get(field), value))
    }
}

fn field_matches(field: Option<&JsonValue>, expected: &str) -> bool {
    match field {
        Some(JsonValue::String(s)) => s == expected,
        Some(JsonValue::Number(n)) => n.to_string() == expected,
        Some(JsonValue::Bool(b)) => b.to_string() == expected,
        Some(JsonValue::Array(items)) => items.iter().any(|item| field_matches(Some(item), expected)),
        Some(JsonValue::Null) | None => expected.is_empty(),
        Some(JsonValue::Object(_)) => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Filter,
    /// Comma-separated keys, `-` prefix for descending (`"-period_start"`, `"weekday,time"`).
    pub sort: Option<String>,
}

impl ListQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filtered(filter: Filter) -> Self {
        Self { filter, sort: None }
    }

    pub fn sorted_by(mut self, sort: &str) -> Self {
        self.sort = Some(sort.to_string());
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<JsonValue>, StoreError>;

    async fn get_one(&self, collection: &str, id: &str) -> Result<JsonValue, StoreError>;

    async fn create(&self, collection: &str, body: &JsonValue) -> Result<JsonValue, StoreError>;

    async fn update(&self, collection: &str, id: &str, body: &JsonValue) -> Result<JsonValue, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// First record matching `filter`, or `NotFound`.
    async fn get_first(&self, collection: &str, filter: &Filter) -> Result<JsonValue, StoreError> {
        self.list(collection, &ListQuery::filtered(filter.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                query: filter.to_expression(),
            })
    }
}

const PAGE_SIZE: usize = 200;

/// PocketBase-compatible collections API, authenticated as an admin.
#[derive(Debug, Clone)]
pub struct PocketBaseStore {
    http: JsonHttpClient,
}

impl PocketBaseStore {
    pub async fn connect(
        base_url: &str,
        admin_email: &str,
        admin_password: &str,
        config: &HttpClientConfig,
    ) -> anyhow::Result<Self> {
        let anonymous = JsonHttpClient::new(base_url, config)?;
        let auth = anonymous
            .send_json(
                Method::POST,
                "api/admins/auth-with-password",
                Some(&json!({"identity": admin_email, "password": admin_password})),
            )
            .await
            .map_err(|err| StoreError::Auth(err.to_string()))?;
        let token = auth
            .get("token")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| StoreError::Auth("auth response carried no token".to_string()))?;
        info!(base_url, "authenticated against record store");

        Ok(Self {
            http: anonymous
                .with_authorization(token)
                .context("installing record store token")?,
        })
    }

    fn records_path(collection: &str) -> String {
        format!("api/collections/{collection}/records")
    }

    fn map_error(err: HttpError, collection: &str, query: &str) -> StoreError {
        if err.is_not_found() {
            StoreError::NotFound {
                collection: collection.to_string(),
                query: query.to_string(),
            }
        } else {
            StoreError::Http(err)
        }
    }
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<JsonValue>, StoreError> {
        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let mut params = vec![("page", page.to_string()), ("perPage", PAGE_SIZE.to_string())];
            if !query.filter.is_empty() {
                params.push(("filter", query.filter.to_expression()));
            }
            if let Some(sort) = &query.sort {
                params.push(("sort", sort.clone()));
            }

            let body = self
                .http
                .get_json(&Self::records_path(collection), &params)
                .await
                .map_err(|err| Self::map_error(err, collection, &query.filter.to_expression()))?;

            if let Some(JsonValue::Array(items)) = body.get("items") {
                out.extend(items.iter().cloned());
            }
            let total_pages = body
                .get("totalPages")
                .and_then(JsonValue::as_u64)
                .unwrap_or(1);
            if u64::try_from(page).unwrap_or(u64::MAX) >= total_pages {
                return Ok(out);
            }
            page += 1;
        }
    }

    async fn get_one(&self, collection: &str, id: &str) -> Result<JsonValue, StoreError> {
        let path = format!("{}/{id}", Self::records_path(collection));
        self.http
            .get_json(&path, &[])
            .await
            .map_err(|err| Self::map_error(err, collection, &format!("id=\"{id}\"")))
    }

    async fn create(&self, collection: &str, body: &JsonValue) -> Result<JsonValue, StoreError> {
        Ok(self
            .http
            .send_json(Method::POST, &Self::records_path(collection), Some(body))
            .await?)
    }

    async fn update(&self, collection: &str, id: &str, body: &JsonValue) -> Result<JsonValue, StoreError> {
        let path = format!("{}/{id}", Self::records_path(collection));
        self.http
            .send_json(Method::PATCH, &path, Some(body))
            .await
            .map_err(|err| Self::map_error(err, collection, &format!("id=\"{id}\"")))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let path = format!("{}/{id}", Self::records_path(collection));
        self.http
            .send_json(Method::DELETE, &path, None)
            .await
            .map_err(|err| Self::map_error(err, collection, &format!("id=\"{id}\"")))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<JsonValue>>,
    next_id: u64,
    rejections: Vec<(String, Filter)>,
    unreadable: BTreeSet<String>,
}

impl MemoryState {
    fn rejects(&self, collection: &str, record: &JsonValue) -> bool {
        self.rejections
            .iter()
            .any(|(c, filter)| c == collection && filter.matches(record))
    }
}

/// In-process record store with the same filter and sort semantics as the HTTP backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts records verbatim; records without an `id` get one assigned.
    pub async fn seed(&self, collection: &str, records: impl IntoIterator<Item = JsonValue>) {
        let mut state = self.state.lock().await;
        for mut record in records {
            if record.get("id").and_then(JsonValue::as_str).is_none() {
                state.next_id += 1;
                let id = format!("rec{:06}", state.next_id);
                if let Some(obj) = record.as_object_mut() {
                    obj.insert("id".to_string(), JsonValue::String(id));
                }
            }
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(record);
        }
    }

    /// Makes every write touching a record matched by `filter` fail with `Rejected`.
    pub async fn reject_writes(&self, collection: &str, filter: Filter) {
        self.state
            .lock()
            .await
            .rejections
            .push((collection.to_string(), filter));
    }

    /// Makes every list and lookup on `collection` fail with `Rejected`.
    pub async fn reject_reads(&self, collection: &str) {
        self.state
            .lock()
            .await
            .unreadable
            .insert(collection.to_string());
    }

    pub async fn records(&self, collection: &str) -> Vec<JsonValue> {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn rejected(collection: &str, operation: &'static str) -> StoreError {
        StoreError::Rejected {
            collection: collection.to_string(),
            operation,
            message: "write rejected".to_string(),
        }
    }

    fn unreadable(collection: &str, operation: &'static str) -> StoreError {
        StoreError::Rejected {
            collection: collection.to_string(),
            operation,
            message: "read rejected".to_string(),
        }
    }

    fn not_found(collection: &str, id: &str) -> StoreError {
        StoreError::NotFound {
            collection: collection.to_string(),
            query: format!("id=\"{id}\""),
        }
    }
}

fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn sort_records(records: &mut [JsonValue], sort: &str) {
    let keys = sort
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| match k.strip_prefix('-') {
            Some(field) => (field.to_string(), true),
            None => (k.trim_start_matches('+').to_string(), false),
        })
        .collect::<Vec<_>>();

    records.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ord = compare_json(a.get(field), b.get(field));
                if *descending { ord.reverse() } else { ord }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn touch(record: &mut Map<String, JsonValue>) {
    record.insert(
        "updated".to_string(),
        JsonValue::String(Utc::now().to_rfc3339()),
    );
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<JsonValue>, StoreError> {
        let state = self.state.lock().await;
        if state.unreadable.contains(collection) {
            return Err(Self::unreadable(collection, "list"));
        }
        let mut out = state
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| query.filter.matches(r))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some(sort) = &query.sort {
            sort_records(&mut out, sort);
        }
        Ok(out)
    }

    async fn get_one(&self, collection: &str, id: &str) -> Result<JsonValue, StoreError> {
        let state = self.state.lock().await;
        if state.unreadable.contains(collection) {
            return Err(Self::unreadable(collection, "get"));
        }
        state
            .collections
            .get(collection)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.get("id").and_then(JsonValue::as_str) == Some(id))
            })
            .cloned()
            .ok_or_else(|| Self::not_found(collection, id))
    }

    async fn create(&self, collection: &str, body: &JsonValue) -> Result<JsonValue, StoreError> {
        let mut state = self.state.lock().await;
        if state.rejects(collection, body) {
            return Err(Self::rejected(collection, "create"));
        }
        let JsonValue::Object(fields) = body else {
            return Err(StoreError::Rejected {
                collection: collection.to_string(),
                operation: "create",
                message: "record body must be an object".to_string(),
            });
        };

        state.next_id += 1;
        let mut record = fields.clone();
        record.insert(
            "id".to_string(),
            JsonValue::String(format!("rec{:06}", state.next_id)),
        );
        record.insert(
            "created".to_string(),
            JsonValue::String(Utc::now().to_rfc3339()),
        );
        touch(&mut record);
        let record = JsonValue::Object(record);
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, body: &JsonValue) -> Result<JsonValue, StoreError> {
        let mut state = self.state.lock().await;
        let existing = state
            .collections
            .get(collection)
            .and_then(|records| {
                records
                    .iter()
                    .position(|r| r.get("id").and_then(JsonValue::as_str) == Some(id))
            })
            .ok_or_else(|| Self::not_found(collection, id))?;

        let rejected = state
            .collections
            .get(collection)
            .and_then(|records| records.get(existing))
            .is_some_and(|record| state.rejects(collection, record));
        if rejected {
            return Err(Self::rejected(collection, "update"));
        }

        let record = state
            .collections
            .get_mut(collection)
            .and_then(|records| records.get_mut(existing))
            .and_then(JsonValue::as_object_mut)
            .ok_or_else(|| Self::not_found(collection, id))?;
        if let JsonValue::Object(patch) = body {
            for (key, value) in patch {
                record.insert(key.clone(), value.clone());
            }
        }
        touch(record);
        Ok(JsonValue::Object(record.clone()))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let position = state
            .collections
            .get(collection)
            .and_then(|records| {
                records
                    .iter()
                    .position(|r| r.get("id").and_then(JsonValue::as_str) == Some(id))
            })
            .ok_or_else(|| Self::not_found(collection, id))?;

        let rejected = state
            .collections
            .get(collection)
            .and_then(|records| records.get(position))
            .is_some_and(|record| state.rejects(collection, record));
        if rejected {
            return Err(Self::rejected(collection, "delete"));
        }

        if let Some(records) = state.collections.get_mut(collection) {
            records.remove(position);
        }
        Ok(())
    }
}
