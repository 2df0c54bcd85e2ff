// src/remote.rs
//! Pass-through adapter for the three hosted tables.
//!
//! The store speaks PostgREST (as hosted by Supabase). Rows travel as JSON with
//! separated-word column names; the typed helpers in this module rename them to
//! and from the in-memory models. Nothing is cached or retried.
use crate::config::RemoteConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Category, Credential, CredentialDraft, Insurance, InsuranceDraft, Vehicle, VehicleDraft,
    VehicleType,
};
use log;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub const CREDENTIALS_TABLE: &str = "passwords";
pub const VEHICLES_TABLE: &str = "vehicles";
pub const INSURANCES_TABLE: &str = "insurances";

/// Raw row access to the hosted database. Implementations must order `select_all`
/// newest-created first and assign `id` on insert.
pub trait RemoteStore {
    fn select_all(&self, table: &str) -> StoreResult<Vec<Value>>;
    /// Inserts every row in one call and returns the stored representations.
    fn insert(&self, table: &str, rows: Vec<Value>) -> StoreResult<Vec<Value>>;
    fn update(&self, table: &str, id: &str, row: Value) -> StoreResult<()>;
    fn delete(&self, table: &str, id: &str) -> StoreResult<()>;
}

/// A record kind that lives in one remote table.
pub trait Record: Sized + Clone {
    const TABLE: &'static str;
    const KIND: &'static str;
    type Draft: Clone;
    type Row: Serialize + DeserializeOwned;

    fn id(&self) -> &str;
    /// Rebuilds the in-memory record after a full-field overwrite.
    fn with_id(id: String, draft: Self::Draft) -> Self;
    fn from_row(row: Self::Row) -> StoreResult<Self>;
    fn to_row(draft: &Self::Draft) -> Self::Row;
}

// Ids come back as uuid strings or bigint numbers depending on the table definition.
fn deserialize_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }
    Ok(Option::<RawId>::deserialize(deserializer)?.map(|raw| match raw {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    }))
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

fn require_id(id: Option<String>, kind: &str) -> StoreResult<String> {
    id.ok_or_else(|| StoreError::Decode(format!("{} row without id", kind)))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialRow {
    #[serde(default, skip_serializing, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub service: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub username: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub password: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VehicleRow {
    #[serde(default, skip_serializing, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub vehicle_type: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub last_service: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub next_service: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InsuranceRow {
    #[serde(default, skip_serializing, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub due_date: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub premium: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub comments: String,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_paid: bool,
}

impl Record for Credential {
    const TABLE: &'static str = CREDENTIALS_TABLE;
    const KIND: &'static str = "credential";
    type Draft = CredentialDraft;
    type Row = CredentialRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(id: String, draft: CredentialDraft) -> Self {
        Credential::from_draft(id, draft)
    }

    fn from_row(row: CredentialRow) -> StoreResult<Self> {
        Ok(Credential {
            id: require_id(row.id, Self::KIND)?,
            service: row.service,
            username: row.username,
            password: row.password,
            category: Category::parse_lenient(&row.category),
        })
    }

    fn to_row(draft: &CredentialDraft) -> CredentialRow {
        CredentialRow {
            id: None,
            service: draft.service.clone(),
            username: draft.username.clone(),
            password: draft.password.clone(),
            category: draft.category.as_str().to_string(),
        }
    }
}

impl Record for Vehicle {
    const TABLE: &'static str = VEHICLES_TABLE;
    const KIND: &'static str = "vehicle";
    type Draft = VehicleDraft;
    type Row = VehicleRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(id: String, draft: VehicleDraft) -> Self {
        Vehicle::from_draft(id, draft)
    }

    fn from_row(row: VehicleRow) -> StoreResult<Self> {
        Ok(Vehicle {
            id: require_id(row.id, Self::KIND)?,
            name: row.name,
            vehicle_type: VehicleType::parse_lenient(&row.vehicle_type),
            last_service: row.last_service,
            next_service: row.next_service,
        })
    }

    fn to_row(draft: &VehicleDraft) -> VehicleRow {
        VehicleRow {
            id: None,
            name: draft.name.clone(),
            vehicle_type: draft.vehicle_type.as_str().to_string(),
            last_service: draft.last_service.clone(),
            next_service: draft.next_service.clone(),
        }
    }
}

impl Record for Insurance {
    const TABLE: &'static str = INSURANCES_TABLE;
    const KIND: &'static str = "insurance";
    type Draft = InsuranceDraft;
    type Row = InsuranceRow;

    fn id(&self) -> &str {
        &self.id
    }

    fn with_id(id: String, draft: InsuranceDraft) -> Self {
        Insurance::from_draft(id, draft)
    }

    fn from_row(row: InsuranceRow) -> StoreResult<Self> {
        Ok(Insurance {
            id: require_id(row.id, Self::KIND)?,
            name: row.name,
            due_date: row.due_date,
            premium: row.premium,
            comments: row.comments,
            is_paid: row.is_paid,
        })
    }

    fn to_row(draft: &InsuranceDraft) -> InsuranceRow {
        InsuranceRow {
            id: None,
            name: draft.name.clone(),
            due_date: draft.due_date.clone(),
            premium: draft.premium.clone(),
            comments: draft.comments.clone(),
            is_paid: draft.is_paid,
        }
    }
}

fn decode_row<R: Record>(value: Value) -> StoreResult<R> {
    let row: R::Row = serde_json::from_value(value)
        .map_err(|e| StoreError::Decode(format!("{} row: {}", R::KIND, e)))?;
    R::from_row(row)
}

fn encode_draft<R: Record>(draft: &R::Draft) -> StoreResult<Value> {
    serde_json::to_value(R::to_row(draft))
        .map_err(|e| StoreError::Decode(format!("{} draft: {}", R::KIND, e)))
}

/// Lists every record of kind `R`, newest first.
pub fn list<R: Record, S: RemoteStore + ?Sized>(store: &S) -> StoreResult<Vec<R>> {
    log::debug!("Listing {} records from '{}'", R::KIND, R::TABLE);
    store.select_all(R::TABLE)?.into_iter().map(decode_row::<R>).collect()
}

/// Inserts one draft and returns the stored record with its assigned id.
pub fn insert<R: Record, S: RemoteStore + ?Sized>(store: &S, draft: &R::Draft) -> StoreResult<R> {
    let stored = store.insert(R::TABLE, vec![encode_draft::<R>(draft)?])?;
    let row = stored
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::Decode(format!("insert into '{}' returned no rows", R::TABLE)))?;
    decode_row(row)
}

/// Inserts a whole batch in one call. Returns how many rows the store reported back.
pub fn insert_batch<R: Record, S: RemoteStore + ?Sized>(store: &S, drafts: &[R::Draft]) -> StoreResult<usize> {
    let rows = drafts.iter().map(encode_draft::<R>).collect::<StoreResult<Vec<_>>>()?;
    log::info!("Inserting batch of {} {} rows", rows.len(), R::KIND);
    Ok(store.insert(R::TABLE, rows)?.len())
}

/// Full-field overwrite of the record with `id`.
pub fn update<R: Record, S: RemoteStore + ?Sized>(store: &S, id: &str, draft: &R::Draft) -> StoreResult<()> {
    store.update(R::TABLE, id, encode_draft::<R>(draft)?)
}

pub fn delete<R: Record, S: RemoteStore + ?Sized>(store: &S, id: &str) -> StoreResult<()> {
    store.delete(R::TABLE, id)
}

/// Extracts the human-readable message from a PostgREST error body.
pub(crate) fn remote_message(status: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct PostgrestError {
        message: Option<String>,
    }
    match serde_json::from_str::<PostgrestError>(body) {
        Ok(PostgrestError { message: Some(message) }) if !message.is_empty() => message,
        _ if body.trim().is_empty() => format!("HTTP {}", status),
        _ => format!("HTTP {}: {}", status, body.trim()),
    }
}

pub(crate) fn table_url(base: &Url, table: &str) -> StoreResult<Url> {
    Ok(base.join(&format!("rest/v1/{}", table))?)
}

pub(crate) fn list_url(base: &Url, table: &str) -> StoreResult<Url> {
    let mut url = table_url(base, table)?;
    url.query_pairs_mut()
        .append_pair("select", "*")
        .append_pair("order", "created_at.desc");
    Ok(url)
}

pub(crate) fn row_url(base: &Url, table: &str, id: &str) -> StoreResult<Url> {
    let mut url = table_url(base, table)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
    Ok(url)
}

/// HTTP implementation of [`RemoteStore`] against a Supabase project.
pub struct SupabaseStore {
    client: Client,
    base: Option<Url>,
    anon_key: String,
}

impl SupabaseStore {
    pub fn new(config: &RemoteConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        let base = if config.url.trim().is_empty() || config.anon_key.trim().is_empty() {
            log::warn!("Remote store URL or key missing; remote calls will fail until configured.");
            None
        } else {
            let mut raw = config.url.trim().to_string();
            if !raw.ends_with('/') {
                raw.push('/');
            }
            Some(Url::parse(&raw)?)
        };
        Ok(Self { client, base, anon_key: config.anon_key.trim().to_string() })
    }

    fn base(&self) -> StoreResult<&Url> {
        self.base.as_ref().ok_or(StoreError::NotConfigured)
    }

    fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .send()
            .map_err(|e| {
                log::error!("Remote request failed: {}", e);
                StoreError::Http(e)
            })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        let message = remote_message(status.as_u16(), &body);
        log::error!("Remote store returned {}: {}", status, message);
        Err(StoreError::Remote { status: status.as_u16(), message })
    }
}

impl RemoteStore for SupabaseStore {
    fn select_all(&self, table: &str) -> StoreResult<Vec<Value>> {
        let url = list_url(self.base()?, table)?;
        log::debug!("GET {}", url);
        Ok(self.send(self.client.get(url))?.json()?)
    }

    fn insert(&self, table: &str, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
        let url = table_url(self.base()?, table)?;
        log::debug!("POST {} ({} rows)", url, rows.len());
        let request = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(&rows);
        Ok(self.send(request)?.json()?)
    }

    fn update(&self, table: &str, id: &str, row: Value) -> StoreResult<()> {
        let url = row_url(self.base()?, table, id)?;
        log::debug!("PATCH {}", url);
        self.send(self.client.patch(url).header("Prefer", "return=minimal").json(&row))?;
        Ok(())
    }

    fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        let url = row_url(self.base()?, table, id)?;
        log::debug!("DELETE {}", url);
        self.send(self.client.delete(url))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory [`RemoteStore`] used by controller tests.
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Select(String),
        Insert(String, usize),
        Update(String, String),
        Delete(String, String),
    }

    #[derive(Default)]
    pub struct MemoryStore {
        tables: RefCell<HashMap<String, Vec<Value>>>,
        next_id: Cell<u64>,
        pub calls: RefCell<Vec<Call>>,
        /// Table whose next write fails with this message.
        fail_writes_on: RefCell<Option<(String, String)>>,
        fail_selects: Cell<bool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a raw row as if another client had written it.
        pub fn seed(&self, table: &str, mut row: Value) -> String {
            let id = self.next_id.get() + 1;
            self.next_id.set(id);
            if let Value::Object(map) = &mut row {
                map.entry("id").or_insert_with(|| Value::String(id.to_string()));
                map.insert("created_at".into(), Value::from(id));
            }
            let assigned = row["id"].as_str().map(str::to_string).unwrap_or_else(|| row["id"].to_string());
            self.tables.borrow_mut().entry(table.to_string()).or_default().push(row);
            assigned
        }

        pub fn rows(&self, table: &str) -> Vec<Value> {
            self.tables.borrow().get(table).cloned().unwrap_or_default()
        }

        pub fn fail_writes_on(&self, table: &str, message: &str) {
            *self.fail_writes_on.borrow_mut() = Some((table.to_string(), message.to_string()));
        }

        pub fn fail_selects(&self, fail: bool) {
            self.fail_selects.set(fail);
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.borrow().iter().filter(|c| pred(c)).count()
        }

        fn check_write(&self, table: &str) -> StoreResult<()> {
            if let Some((t, message)) = self.fail_writes_on.borrow().as_ref() {
                if t == table {
                    return Err(StoreError::Remote { status: 400, message: message.clone() });
                }
            }
            Ok(())
        }
    }

    impl RemoteStore for MemoryStore {
        fn select_all(&self, table: &str) -> StoreResult<Vec<Value>> {
            self.calls.borrow_mut().push(Call::Select(table.to_string()));
            if self.fail_selects.get() {
                return Err(StoreError::Remote { status: 503, message: "service unavailable".into() });
            }
            let mut rows = self.rows(table);
            rows.sort_by_key(|r| std::cmp::Reverse(r["created_at"].as_u64().unwrap_or(0)));
            Ok(rows)
        }

        fn insert(&self, table: &str, rows: Vec<Value>) -> StoreResult<Vec<Value>> {
            self.calls.borrow_mut().push(Call::Insert(table.to_string(), rows.len()));
            self.check_write(table)?;
            let mut stored = Vec::new();
            for row in rows {
                let id = self.seed(table, row);
                let tables = self.tables.borrow();
                let found = tables[table].iter().find(|r| r["id"] == Value::String(id.clone()));
                stored.extend(found.cloned());
            }
            Ok(stored)
        }

        fn update(&self, table: &str, id: &str, row: Value) -> StoreResult<()> {
            self.calls.borrow_mut().push(Call::Update(table.to_string(), id.to_string()));
            self.check_write(table)?;
            let mut tables = self.tables.borrow_mut();
            if let Some(existing) = tables
                .get_mut(table)
                .and_then(|rows| rows.iter_mut().find(|r| r["id"] == Value::String(id.to_string())))
            {
                if let (Value::Object(target), Value::Object(fields)) = (existing, row) {
                    target.extend(fields);
                }
            }
            Ok(())
        }

        fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
            self.calls.borrow_mut().push(Call::Delete(table.to_string(), id.to_string()));
            self.check_write(table)?;
            if let Some(rows) = self.tables.borrow_mut().get_mut(table) {
                rows.retain(|r| r["id"] != Value::String(id.to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryStore;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vehicle_row_renames_fields() {
        let draft = VehicleDraft {
            name: "Mountain Explorer".into(),
            vehicle_type: VehicleType::Bike,
            last_service: "2024-01-15".into(),
            next_service: "2024-04-15".into(),
        };
        let value = encode_draft::<Vehicle>(&draft).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "Mountain Explorer",
                "type": "Bike",
                "last_service": "2024-01-15",
                "next_service": "2024-04-15"
            })
        );
    }

    #[test]
    fn test_insurance_row_decodes_numeric_id_and_null_paid() {
        let row = json!({
            "id": 42,
            "name": "Car Insurance",
            "due_date": "2024-01-01",
            "premium": "$50/mo",
            "comments": null,
            "is_paid": null,
            "created_at": "2024-01-01T00:00:00Z"
        });
        let policy: Insurance = decode_row(row).unwrap();
        assert_eq!(policy.id, "42");
        assert_eq!(policy.comments, "");
        assert!(!policy.is_paid);
    }

    #[test]
    fn test_enum_columns_decode_leniently_from_plain_strings() {
        let credential: Credential =
            decode_row(json!({"id": "1", "service": "Bank", "password": "x", "category": "PERSONAL"})).unwrap();
        assert_eq!(credential.category, Category::Personal);
        let vehicle: Vehicle = decode_row(json!({"id": "2", "name": "Commuter", "type": "bike"})).unwrap();
        assert_eq!(vehicle.vehicle_type, VehicleType::Bike);
        let unknown: Vehicle = decode_row(json!({"id": "3", "name": "Truck", "type": "Lorry"})).unwrap();
        assert_eq!(unknown.vehicle_type, VehicleType::Car);
    }

    #[test]
    fn test_row_without_id_is_rejected() {
        let result = decode_row::<Credential>(json!({"service": "Gmail", "password": "x"}));
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_urls() {
        let base = Url::parse("https://example.supabase.co/").unwrap();
        assert_eq!(
            list_url(&base, "vehicles").unwrap().as_str(),
            "https://example.supabase.co/rest/v1/vehicles?select=*&order=created_at.desc"
        );
        assert_eq!(
            row_url(&base, "insurances", "7").unwrap().as_str(),
            "https://example.supabase.co/rest/v1/insurances?id=eq.7"
        );
    }

    #[test]
    fn test_remote_message_prefers_postgrest_message() {
        let body = r#"{"code":"23502","message":"null value in column \"name\"","details":null,"hint":null}"#;
        assert_eq!(remote_message(400, body), "null value in column \"name\"");
        assert_eq!(remote_message(502, ""), "HTTP 502");
        assert_eq!(remote_message(500, "upstream exploded"), "HTTP 500: upstream exploded");
    }

    #[test]
    fn test_unconfigured_store_fails_without_network() {
        let store = SupabaseStore::new(&RemoteConfig::default()).unwrap();
        assert!(matches!(store.select_all("passwords"), Err(StoreError::NotConfigured)));
    }

    #[test]
    fn test_typed_insert_and_list_newest_first() {
        let store = MemoryStore::new();
        let first = insert::<Credential, _>(
            &store,
            &CredentialDraft { service: "Gmail".into(), password: "a".into(), ..Default::default() },
        )
        .unwrap();
        let second = insert::<Credential, _>(
            &store,
            &CredentialDraft {
                service: "Chase".into(),
                password: "b".into(),
                category: Category::Personal,
                ..Default::default()
            },
        )
        .unwrap();
        let listed: Vec<Credential> = list(&store).unwrap();
        assert_eq!(listed, vec![second, first]);
        assert_eq!(listed[0].category, Category::Personal);
    }
}
