use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Config;

/// One record as the store sees it: a flat JSON object carrying an `id`.
pub type Row = Map<String, Value>;

/// Table-level CRUD, the only surface the views use to persist anything.
///
/// Implementations do no conflict detection: the last write to reach the
/// backend wins.
pub trait RecordStore {
    fn select(&self, table: &str) -> anyhow::Result<Vec<Row>>;

    /// Inserts `fields` and returns the stored row, including its new `id`.
    fn insert(&self, table: &str, fields: Row) -> anyhow::Result<Row>;

    fn update(&self, table: &str, id: &str, fields: Row) -> anyhow::Result<()>;

    fn delete(&self, table: &str, id: &str) -> anyhow::Result<()>;
}

/// Store mutations from the edit flow never abort the command: failures
/// are logged and the caller carries on with a refetch.
pub fn log_failure<T>(result: anyhow::Result<T>, action: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let message = format!("{err:#}");
            warn!(action, error = %message, "record store call failed");
            None
        }
    }
}

pub fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> anyhow::Result<Vec<T>> {
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            serde_json::from_value(Value::Object(row))
                .with_context(|| format!("failed decoding {table} row {}", idx + 1))
        })
        .collect()
}

pub fn encode_fields<T: Serialize>(value: &T) -> anyhow::Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {other}")),
    }
}

fn validate_table_name(table: &str) -> anyhow::Result<()> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid table name: {table:?}"))
    }
}

fn validate_row_id(id: &str) -> anyhow::Result<()> {
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(anyhow!("invalid row id: {id:?}"))
    }
}

/// Picks the backend named by `store.backend`.
#[instrument(skip(cfg, data_dir))]
pub fn open_store(cfg: &Config, data_dir: &Path) -> anyhow::Result<Box<dyn RecordStore>> {
    let backend = cfg
        .get("store.backend")
        .unwrap_or_else(|| "file".to_string());

    match backend.trim().to_ascii_lowercase().as_str() {
        "file" => Ok(Box::new(FileStore::open(data_dir)?)),
        "memory" => {
            warn!("memory store selected; nothing will outlive this process");
            Ok(Box::new(MemoryStore::default()))
        }
        "remote" | "supabase" | "postgrest" => {
            let url = cfg
                .get("store.url")
                .ok_or_else(|| anyhow!("store.backend=remote requires store.url"))?;
            let key = cfg
                .get("store.key")
                .ok_or_else(|| anyhow!("store.backend=remote requires store.key"))?;
            Ok(Box::new(RestStore::new(&url, &key)?))
        }
        other => Err(anyhow!("unknown store backend: {other}")),
    }
}

/// Local backend: one JSON-lines file per table in the data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened file store");
        Ok(Self { data_dir })
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.data"))
    }

    fn load(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        validate_table_name(table)?;
        let path = self.table_path(table);
        if !path.exists() {
            debug!(file = %path.display(), "table file missing; treating as empty");
            return Ok(vec![]);
        }
        load_jsonl(&path).with_context(|| format!("failed to load {table}"))
    }

    fn save(&self, table: &str, rows: &[Row]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.table_path(table), rows)
            .with_context(|| format!("failed to save {table}"))
    }
}

impl RecordStore for FileStore {
    #[instrument(skip(self))]
    fn select(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        self.load(table)
    }

    #[instrument(skip(self, fields))]
    fn insert(&self, table: &str, mut fields: Row) -> anyhow::Result<Row> {
        let mut rows = self.load(table)?;
        let id = row_id(&fields).unwrap_or_else(|| Uuid::new_v4().to_string());
        if rows.iter().any(|row| row_id(row).as_deref() == Some(id.as_str())) {
            return Err(anyhow!("duplicate id in {table}: {id}"));
        }
        fields.insert("id".to_string(), Value::String(id.clone()));
        rows.push(fields.clone());
        self.save(table, &rows)?;

        debug!(%id, count = rows.len(), "inserted row");
        Ok(fields)
    }

    #[instrument(skip(self, fields))]
    fn update(&self, table: &str, id: &str, fields: Row) -> anyhow::Result<()> {
        let mut rows = self.load(table)?;
        let row = rows
            .iter_mut()
            .find(|row| row_id(row).as_deref() == Some(id))
            .ok_or_else(|| anyhow!("row not found in {table}: {id}"))?;

        for (key, value) in fields {
            if key != "id" {
                row.insert(key, value);
            }
        }
        self.save(table, &rows)?;

        debug!(%id, "updated row");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, table: &str, id: &str) -> anyhow::Result<()> {
        let mut rows = self.load(table)?;
        let before = rows.len();
        rows.retain(|row| row_id(row).as_deref() != Some(id));
        if rows.len() == before {
            return Err(anyhow!("row not found in {table}: {id}"));
        }
        self.save(table, &rows)?;

        debug!(%id, remaining = rows.len(), "deleted row");
        Ok(())
    }
}

#[instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Row>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: Row = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[instrument(skip(path, rows))]
fn save_jsonl_atomic(path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// Ephemeral backend; also what tests run against.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RefCell<BTreeMap<String, Vec<Row>>>,
}

impl RecordStore for MemoryStore {
    fn select(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        validate_table_name(table)?;
        Ok(self.tables.borrow().get(table).cloned().unwrap_or_default())
    }

    fn insert(&self, table: &str, mut fields: Row) -> anyhow::Result<Row> {
        validate_table_name(table)?;
        let mut tables = self.tables.borrow_mut();
        let rows = tables.entry(table.to_string()).or_default();
        let id = row_id(&fields).unwrap_or_else(|| Uuid::new_v4().to_string());
        if rows.iter().any(|row| row_id(row).as_deref() == Some(id.as_str())) {
            return Err(anyhow!("duplicate id in {table}: {id}"));
        }
        fields.insert("id".to_string(), Value::String(id));
        rows.push(fields.clone());
        Ok(fields)
    }

    fn update(&self, table: &str, id: &str, fields: Row) -> anyhow::Result<()> {
        let mut tables = self.tables.borrow_mut();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row).as_deref() == Some(id)))
            .ok_or_else(|| anyhow!("row not found in {table}: {id}"))?;
        for (key, value) in fields {
            if key != "id" {
                row.insert(key, value);
            }
        }
        Ok(())
    }

    fn delete(&self, table: &str, id: &str) -> anyhow::Result<()> {
        let mut tables = self.tables.borrow_mut();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("row not found in {table}: {id}"))?;
        let before = rows.len();
        rows.retain(|row| row_id(row).as_deref() != Some(id));
        if rows.len() == before {
            return Err(anyhow!("row not found in {table}: {id}"));
        }
        Ok(())
    }
}

/// Remote backend speaking the PostgREST dialect served by Supabase.
#[derive(Debug, Clone)]
pub struct RestStore {
    base_url: String,
    client: Client,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(anyhow!("store.url is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(api_key).context("store.key is not a valid header value")?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .context("store.key is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("failed building HTTP client for record store")?;

        info!(url = %base_url, "configured remote record store");
        Ok(Self { base_url, client })
    }

    pub fn table_url(&self, table: &str) -> anyhow::Result<String> {
        validate_table_name(table)?;
        Ok(format!("{}/rest/v1/{table}", self.base_url))
    }

    pub fn row_url(&self, table: &str, id: &str) -> anyhow::Result<String> {
        validate_row_id(id)?;
        Ok(format!("{}?id=eq.{id}", self.table_url(table)?))
    }
}

impl RecordStore for RestStore {
    #[instrument(skip(self))]
    fn select(&self, table: &str) -> anyhow::Result<Vec<Row>> {
        let url = format!("{}?select=*", self.table_url(table)?);
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed requesting {table}"))?
            .error_for_status()
            .with_context(|| format!("select from {table} was rejected"))?;
        let rows: Vec<Row> = response
            .json()
            .with_context(|| format!("failed decoding {table} response"))?;
        debug!(count = rows.len(), "selected rows");
        Ok(rows)
    }

    #[instrument(skip(self, fields))]
    fn insert(&self, table: &str, fields: Row) -> anyhow::Result<Row> {
        let url = self.table_url(table)?;
        let response = self
            .client
            .post(&url)
            .header("Prefer", "return=representation")
            .json(&fields)
            .send()
            .with_context(|| format!("failed inserting into {table}"))?
            .error_for_status()
            .with_context(|| format!("insert into {table} was rejected"))?;
        let mut rows: Vec<Row> = response
            .json()
            .with_context(|| format!("failed decoding {table} insert response"))?;
        if rows.is_empty() {
            return Err(anyhow!("insert into {table} returned no row"));
        }
        Ok(rows.swap_remove(0))
    }

    #[instrument(skip(self, fields))]
    fn update(&self, table: &str, id: &str, fields: Row) -> anyhow::Result<()> {
        let url = self.row_url(table, id)?;
        self.client
            .patch(&url)
            .json(&fields)
            .send()
            .with_context(|| format!("failed updating {table} row {id}"))?
            .error_for_status()
            .with_context(|| format!("update of {table} row {id} was rejected"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, table: &str, id: &str) -> anyhow::Result<()> {
        let url = self.row_url(table, id)?;
        self.client
            .delete(&url)
            .send()
            .with_context(|| format!("failed deleting {table} row {id}"))?
            .error_for_status()
            .with_context(|| format!("delete of {table} row {id} was rejected"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{FileStore, MemoryStore, RecordStore, RestStore, Row, log_failure, row_id};

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn file_store_crud_cycle() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");

        assert!(store.select("day_notes").expect("select").is_empty());

        let inserted = store
            .insert("day_notes", row(json!({"date": "2026-10-16", "text": "dentist"})))
            .expect("insert");
        let id = row_id(&inserted).expect("generated id");

        store
            .update("day_notes", &id, row(json!({"text": "dentist 9am", "id": "ignored"})))
            .expect("update");
        let rows = store.select("day_notes").expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["text"], "dentist 9am");
        assert_eq!(row_id(&rows[0]).as_deref(), Some(id.as_str()));

        store.delete("day_notes", &id).expect("delete");
        assert!(store.select("day_notes").expect("select").is_empty());
        assert!(store.delete("day_notes", &id).is_err());
    }

    #[test]
    fn file_store_rejects_bad_table_names() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        assert!(store.select("../etc").is_err());
        assert!(store.insert("Notes", Row::new()).is_err());
    }

    #[test]
    fn rest_urls_follow_postgrest_filters() {
        let store = RestStore::new("https://example.supabase.co/", "anon").expect("client");
        assert_eq!(
            store.table_url("timetable_tasks").expect("table url"),
            "https://example.supabase.co/rest/v1/timetable_tasks"
        );
        assert_eq!(
            store.row_url("timetable_tasks", "42").expect("row url"),
            "https://example.supabase.co/rest/v1/timetable_tasks?id=eq.42"
        );
        assert!(store.row_url("timetable_tasks", "1&select=x").is_err());
    }

    #[test]
    fn memory_store_matches_file_semantics() {
        let store = MemoryStore::default();
        let first = store
            .insert("timetable_slots", row(json!({"time": "08:00"})))
            .expect("insert");
        store
            .insert("timetable_slots", row(json!({"time": "11:00"})))
            .expect("insert");
        let id = row_id(&first).expect("id");

        assert!(store.update("timetable_slots", "missing", Row::new()).is_err());
        store.delete("timetable_slots", &id).expect("delete");
        let rows = store.select("timetable_slots").expect("select");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["time"], "11:00");
    }

    #[test]
    fn failures_are_swallowed() {
        let store = MemoryStore::default();
        assert_eq!(log_failure(store.delete("day_notes", "nope"), "delete note"), None);
        assert_eq!(log_failure(Ok::<_, anyhow::Error>(3), "noop"), Some(3));
    }

    #[test]
    fn numeric_ids_are_stringified() {
        assert_eq!(row_id(&row(json!({"id": 7}))).as_deref(), Some("7"));
        assert_eq!(row_id(&row(json!({"title": "x"}))), None);
    }
}
