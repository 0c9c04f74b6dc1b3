// 💾 Persistence - SQLite-backed snapshots and audit trail
//
// Each date key (catalog period, sales day, transfer day) is one row holding
// its records as JSON. Uploads replace the row for their key wholesale.
//
// Sales uploads carry a SHA-256 hash of the RAW batch: re-saving an identical
// batch is a no-op, so composite expansion never runs twice on the same data.

use crate::catalog::{CatalogHistory, CatalogMutation};
use crate::composite::CompositeExpander;
use crate::history::{HistoryMap, MatchHistoryEntry, MatchHistoryStore};
use crate::models::{
    CatalogItem, CatalogSnapshot, CompositeItem, DailySales, DailyTransfers, RawTransfer, SaleRecord,
    SalesSnapshot, TransferDirection, TransferRecord, TransfersSnapshot,
};
use crate::reconciliation::{apply_confirmations, confirm_matches, validate_confirmations, MatchConfirmation};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Event for audit trail: every write leaves one
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Result of saving a sales day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// Stored, `records` after composite expansion
    Saved { records: usize },

    /// Same batch already stored for this date
    Unchanged,
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Snapshots (one row per date key)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_periods (
            start_date TEXT PRIMARY KEY,
            uploaded_at TEXT,
            items TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_sales (
            date TEXT PRIMARY KEY,
            uploaded_at TEXT,
            content_hash TEXT NOT NULL,
            items TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_transfers (
            date TEXT PRIMARY KEY,
            uploaded_at TEXT,
            direction TEXT NOT NULL,
            items TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Composites and learned matches
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS composites (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            sub_items TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS match_history (
            sale_key TEXT PRIMARY KEY,
            entries TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).with_context(|| format!("Invalid date in database: {}", value))
}

fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("Invalid timestamp in database: {}", ts))
        })
        .transpose()
}

// ============================================================================
// CATALOG PERIODS
// ============================================================================

/// Replace the catalog period starting at `snapshot.start_date`
pub fn save_catalog(conn: &Connection, snapshot: &CatalogSnapshot) -> Result<()> {
    let items_json = serde_json::to_string(&snapshot.items)?;
    let uploaded_at = snapshot.uploaded_at.unwrap_or_else(Utc::now);
    let key = snapshot.start_date.format(DATE_FORMAT).to_string();

    conn.execute(
        "INSERT OR REPLACE INTO catalog_periods (start_date, uploaded_at, items) VALUES (?1, ?2, ?3)",
        params![key, uploaded_at.to_rfc3339(), items_json],
    )?;

    insert_event(
        conn,
        &Event::new(
            "catalog_saved",
            "catalog_period",
            &key,
            serde_json::json!({ "items": snapshot.items.len() }),
            "catalog_importer",
        ),
    )?;

    info!(start = %key, items = snapshot.items.len(), "catalog period saved");
    Ok(())
}

pub fn load_catalogs(conn: &Connection) -> Result<CatalogHistory> {
    let mut stmt = conn.prepare("SELECT start_date, uploaded_at, items FROM catalog_periods ORDER BY start_date")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for (start_date, uploaded_at, items_json) in rows {
        let items: Vec<CatalogItem> = serde_json::from_str(&items_json)
            .with_context(|| format!("Corrupt catalog items for {}", start_date))?;

        snapshots.push(CatalogSnapshot {
            start_date: parse_date(&start_date)?,
            uploaded_at: parse_timestamp(uploaded_at)?,
            items,
        });
    }

    Ok(CatalogHistory::from_snapshots(snapshots))
}

/// Apply a placeholder edit and write back every period. Returns true if anything changed.
pub fn apply_catalog_mutation(conn: &Connection, mutation: &CatalogMutation) -> Result<bool> {
    let mut catalogs = load_catalogs(conn)?;
    if !catalogs.apply(mutation) {
        return Ok(false);
    }

    let tx = conn.unchecked_transaction()?;
    for snapshot in catalogs.snapshots() {
        let items_json = serde_json::to_string(&snapshot.items)?;
        tx.execute(
            "UPDATE catalog_periods SET items = ?1 WHERE start_date = ?2",
            params![items_json, snapshot.start_date.format(DATE_FORMAT).to_string()],
        )?;
    }

    insert_event(
        &tx,
        &Event::new(
            "catalog_mutated",
            "catalog_period",
            mutation.name(),
            serde_json::to_value(mutation)?,
            "composite_registry",
        ),
    )?;
    tx.commit()?;

    Ok(true)
}

// ============================================================================
// DAILY SALES
// ============================================================================

/// SHA-256 over the JSON form of the raw batch
pub fn compute_batch_hash(items: &[SaleRecord]) -> Result<String> {
    let json = serde_json::to_vec(items)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Expand composites in a raw batch and store it under `date`.
///
/// An identical batch already stored for `date` is left alone.
pub fn save_daily_sales(
    conn: &Connection,
    date: NaiveDate,
    raw_items: &[SaleRecord],
    composites: &[CompositeItem],
    composite_threshold: f64,
) -> Result<SaveOutcome> {
    let key = date.format(DATE_FORMAT).to_string();
    let hash = compute_batch_hash(raw_items)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT content_hash FROM daily_sales WHERE date = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    if existing.as_deref() == Some(hash.as_str()) {
        debug!(date = %key, "identical sales batch already stored");
        return Ok(SaveOutcome::Unchanged);
    }

    let expanded = CompositeExpander::with_threshold(composites, composite_threshold).expand(raw_items);
    let items_json = serde_json::to_string(&expanded)?;

    conn.execute(
        "INSERT OR REPLACE INTO daily_sales (date, uploaded_at, content_hash, items) VALUES (?1, ?2, ?3, ?4)",
        params![key, Utc::now().to_rfc3339(), hash, items_json],
    )?;

    insert_event(
        conn,
        &Event::new(
            "sales_saved",
            "daily_sales",
            &key,
            serde_json::json!({ "raw": raw_items.len(), "stored": expanded.len() }),
            "sales_importer",
        ),
    )?;

    info!(date = %key, raw = raw_items.len(), stored = expanded.len(), "daily sales saved");
    Ok(SaveOutcome::Saved { records: expanded.len() })
}

/// Save an uploaded day with the operator's confirmed matches applied.
///
/// History is only written once the day is actually stored: an identical
/// re-upload leaves use counts untouched.
pub fn save_confirmed_sales(
    conn: &Connection,
    history: &MatchHistoryStore,
    date: NaiveDate,
    raw_items: &[SaleRecord],
    confirmations: &[MatchConfirmation],
    composites: &[CompositeItem],
    composite_threshold: f64,
) -> Result<SaveOutcome> {
    validate_confirmations(confirmations)?;

    let items = apply_confirmations(raw_items, confirmations);
    let outcome = save_daily_sales(conn, date, &items, composites, composite_threshold)?;

    if let SaveOutcome::Saved { .. } = outcome {
        confirm_matches(history, confirmations)?;
        save_history(conn, &history.snapshot())?;
    }

    Ok(outcome)
}

pub fn delete_daily_sales(conn: &Connection, date: NaiveDate) -> Result<bool> {
    let key = date.format(DATE_FORMAT).to_string();
    let deleted = conn.execute("DELETE FROM daily_sales WHERE date = ?1", params![key])?;

    if deleted > 0 {
        insert_event(
            conn,
            &Event::new("sales_deleted", "daily_sales", &key, serde_json::json!({}), "operator"),
        )?;
    }
    Ok(deleted > 0)
}

pub fn load_sales(conn: &Connection) -> Result<SalesSnapshot> {
    let mut stmt = conn.prepare("SELECT date, uploaded_at, items FROM daily_sales ORDER BY date")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut snapshot = SalesSnapshot::new();
    for (date, uploaded_at, items_json) in rows {
        let items: Vec<SaleRecord> =
            serde_json::from_str(&items_json).with_context(|| format!("Corrupt sales for {}", date))?;
        let date = parse_date(&date)?;

        snapshot.insert(
            date,
            DailySales {
                date,
                uploaded_at: parse_timestamp(uploaded_at)?,
                items,
            },
        );
    }

    Ok(snapshot)
}

// ============================================================================
// DAILY TRANSFERS
// ============================================================================

pub fn save_daily_transfers(
    conn: &Connection,
    date: NaiveDate,
    direction: TransferDirection,
    items: &[TransferRecord],
) -> Result<()> {
    let key = date.format(DATE_FORMAT).to_string();
    let items_json = serde_json::to_string(items)?;

    conn.execute(
        "INSERT OR REPLACE INTO daily_transfers (date, uploaded_at, direction, items) VALUES (?1, ?2, ?3, ?4)",
        params![key, Utc::now().to_rfc3339(), direction.as_str(), items_json],
    )?;

    insert_event(
        conn,
        &Event::new(
            "transfers_saved",
            "daily_transfers",
            &key,
            serde_json::json!({ "direction": direction.as_str(), "items": items.len() }),
            "transfer_importer",
        ),
    )?;

    info!(date = %key, direction = direction.as_str(), items = items.len(), "daily transfers saved");
    Ok(())
}

pub fn delete_daily_transfers(conn: &Connection, date: NaiveDate) -> Result<bool> {
    let key = date.format(DATE_FORMAT).to_string();
    let deleted = conn.execute("DELETE FROM daily_transfers WHERE date = ?1", params![key])?;

    if deleted > 0 {
        insert_event(
            conn,
            &Event::new("transfers_deleted", "daily_transfers", &key, serde_json::json!({}), "operator"),
        )?;
    }
    Ok(deleted > 0)
}

pub fn load_transfers(conn: &Connection) -> Result<TransfersSnapshot> {
    let mut stmt = conn.prepare("SELECT date, uploaded_at, direction, items FROM daily_transfers ORDER BY date")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut snapshot = TransfersSnapshot::new();
    for (date, uploaded_at, direction, items_json) in rows {
        let direction = TransferDirection::parse(&direction)
            .ok_or_else(|| anyhow!("Invalid transfer direction for {}: {}", date, direction))?;
        let items: Vec<TransferRecord> =
            serde_json::from_str(&items_json).with_context(|| format!("Corrupt transfers for {}", date))?;
        let date = parse_date(&date)?;

        snapshot.insert(
            date,
            DailyTransfers {
                date,
                uploaded_at: parse_timestamp(uploaded_at)?,
                direction,
                items,
            },
        );
    }

    Ok(snapshot)
}

// ============================================================================
// COMPOSITES
// ============================================================================

pub fn save_composite(conn: &Connection, item: &CompositeItem) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO composites (id, name, sub_items, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            item.id,
            item.name,
            serde_json::to_string(&item.sub_items)?,
            item.created_at.to_rfc3339(),
            item.updated_at.map(|dt| dt.to_rfc3339()),
        ],
    )?;

    insert_event(
        conn,
        &Event::new(
            "composite_saved",
            "composite",
            &item.id,
            serde_json::json!({ "name": item.name, "ingredients": item.sub_items.len() }),
            "composite_registry",
        ),
    )?;
    Ok(())
}

pub fn delete_composite(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM composites WHERE id = ?1", params![id])?;

    if deleted > 0 {
        insert_event(
            conn,
            &Event::new("composite_deleted", "composite", id, serde_json::json!({}), "composite_registry"),
        )?;
    }
    Ok(deleted > 0)
}

/// Oldest first
pub fn load_composites(conn: &Connection) -> Result<Vec<CompositeItem>> {
    let mut stmt =
        conn.prepare("SELECT id, name, sub_items, created_at, updated_at FROM composites ORDER BY created_at, id")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut composites = Vec::with_capacity(rows.len());
    for (id, name, sub_items_json, created_at, updated_at) in rows {
        composites.push(CompositeItem {
            sub_items: serde_json::from_str(&sub_items_json)
                .with_context(|| format!("Corrupt recipe for composite {}", name))?,
            created_at: parse_timestamp(Some(created_at))?
                .ok_or_else(|| anyhow!("Missing creation time for composite {}", name))?,
            updated_at: parse_timestamp(updated_at)?,
            id,
            name,
        });
    }

    Ok(composites)
}

// ============================================================================
// MATCH HISTORY
// ============================================================================

pub fn load_history(conn: &Connection) -> Result<HistoryMap> {
    let mut stmt = conn.prepare("SELECT sale_key, entries FROM match_history")?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut map = HistoryMap::new();
    for (key, entries_json) in rows {
        let entries: Vec<MatchHistoryEntry> = serde_json::from_str(&entries_json)
            .with_context(|| format!("Corrupt match history for '{}'", key))?;
        map.insert(key, entries);
    }

    Ok(map)
}

/// Write the whole map in one transaction
pub fn save_history(conn: &Connection, history: &HistoryMap) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;

    for (key, entries) in history {
        tx.execute(
            "INSERT OR REPLACE INTO match_history (sale_key, entries) VALUES (?1, ?2)",
            params![key, serde_json::to_string(entries)?],
        )?;
    }

    tx.commit()?;
    debug!(keys = history.len(), "match history saved");
    Ok(history.len())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Newest first
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for (event_id, timestamp, event_type, entity_type, entity_id, data, actor) in rows {
        events.push(Event {
            timestamp: parse_timestamp(Some(timestamp))?
                .ok_or_else(|| anyhow!("Missing timestamp for event {}", event_id))?,
            data: serde_json::from_str(&data).with_context(|| format!("Corrupt data for event {}", event_id))?,
            event_id,
            event_type,
            entity_type,
            entity_id,
            actor,
        });
    }

    Ok(events)
}

// ============================================================================
// CSV LOADERS
// ============================================================================

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(alias = "Name")]
    name: String,

    #[serde(default, alias = "Category")]
    category: String,

    #[serde(alias = "openingStock", alias = "parStock", alias = "Opening Stock")]
    opening_stock: f64,
}

#[derive(Debug, Deserialize)]
struct QtyRow {
    #[serde(alias = "Name")]
    name: String,

    #[serde(alias = "Qty", alias = "quantity")]
    qty: f64,

    #[serde(default, alias = "Category")]
    category: String,
}

fn csv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))
}

/// Catalog file: `name, category, opening_stock`. Rows without a name are skipped.
pub fn load_catalog_csv(path: &Path, start_date: NaiveDate) -> Result<CatalogSnapshot> {
    let mut rdr = csv_reader(path)?;
    let mut items = Vec::new();

    for (line, result) in rdr.deserialize::<CatalogRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to parse catalog row {}", line + 2))?;
        if row.name.is_empty() {
            continue;
        }
        items.push(CatalogItem::new(&row.name, &row.category, row.opening_stock));
    }

    Ok(CatalogSnapshot::new(start_date, items))
}

/// Sales file: `name, qty, category`
pub fn load_sales_csv(path: &Path, date: NaiveDate) -> Result<Vec<SaleRecord>> {
    let mut rdr = csv_reader(path)?;
    let mut records = Vec::new();

    for (line, result) in rdr.deserialize::<QtyRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to parse sales row {}", line + 2))?;
        if row.name.is_empty() {
            continue;
        }
        records.push(SaleRecord::new(date, &row.name, row.qty, &row.category));
    }

    Ok(records)
}

/// Transfer file: `name, qty` (unsigned bottle counts)
pub fn load_transfer_csv(path: &Path) -> Result<Vec<RawTransfer>> {
    let mut rdr = csv_reader(path)?;
    let mut items = Vec::new();

    for (line, result) in rdr.deserialize::<QtyRow>().enumerate() {
        let row = result.with_context(|| format!("Failed to parse transfer row {}", line + 2))?;
        if row.name.is_empty() {
            continue;
        }
        items.push(RawTransfer {
            original_name: row.name,
            qty: row.qty,
        });
    }

    Ok(items)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SubItem;
    use std::io::Write;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn margarita() -> CompositeItem {
        CompositeItem {
            id: "c-1".to_string(),
            name: "Margarita".to_string(),
            sub_items: vec![SubItem { par_name: "Tequila, Patron, 70cl".to_string(), qty: 2.0 }],
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_catalog_round_trip_and_replace() {
        let conn = test_db();
        let start = date("2025-03-01");

        save_catalog(&conn, &CatalogSnapshot::new(start, vec![CatalogItem::new("Chang", "Beer", 24.0)])).unwrap();
        save_catalog(&conn, &CatalogSnapshot::new(start, vec![CatalogItem::new("Leo", "Beer", 12.0)])).unwrap();

        let catalogs = load_catalogs(&conn).unwrap();
        assert_eq!(catalogs.len(), 1);
        assert_eq!(catalogs.get(start).unwrap().names(), vec!["Leo".to_string()]);
        assert!(catalogs.get(start).unwrap().uploaded_at.is_some());
    }

    #[test]
    fn test_apply_catalog_mutation_persists() {
        let conn = test_db();
        save_catalog(&conn, &CatalogSnapshot::new(date("2025-03-01"), vec![])).unwrap();

        let add = CatalogMutation::AddPlaceholder { name: "Margarita".to_string() };
        assert!(apply_catalog_mutation(&conn, &add).unwrap());
        assert!(!apply_catalog_mutation(&conn, &add).unwrap());

        let catalogs = load_catalogs(&conn).unwrap();
        assert!(catalogs.latest().unwrap().find("Margarita").is_some());

        let events = get_events_for_entity(&conn, "catalog_period", "Margarita").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "catalog_mutated");
    }

    #[test]
    fn test_save_daily_sales_expands_once() {
        let conn = test_db();
        let day = date("2025-03-05");
        let batch = vec![SaleRecord::new(day, "Margarita", 2.0, "Cocktail")];

        let first = save_daily_sales(&conn, day, &batch, &[margarita()], 0.6).unwrap();
        assert_eq!(first, SaveOutcome::Saved { records: 2 });

        let second = save_daily_sales(&conn, day, &batch, &[margarita()], 0.6).unwrap();
        assert_eq!(second, SaveOutcome::Unchanged);

        let sales = load_sales(&conn).unwrap();
        let items = &sales[&day].items;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].qty, -2.0);
        assert_eq!(items[1].qty, 4.0);
    }

    #[test]
    fn test_changed_batch_replaces_day() {
        let conn = test_db();
        let day = date("2025-03-05");

        save_daily_sales(&conn, day, &[SaleRecord::new(day, "Chang", 2.0, "Beer")], &[], 0.6).unwrap();
        save_daily_sales(&conn, day, &[SaleRecord::new(day, "Chang", 5.0, "Beer")], &[], 0.6).unwrap();

        let sales = load_sales(&conn).unwrap();
        assert_eq!(sales[&day].items[0].qty, 5.0);

        assert!(delete_daily_sales(&conn, day).unwrap());
        assert!(!delete_daily_sales(&conn, day).unwrap());
        assert!(load_sales(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_confirmed_save_records_history_once() {
        let conn = test_db();
        let history = MatchHistoryStore::new();
        let day = date("2025-03-05");
        let batch = vec![SaleRecord::new(day, "Chang", 6.0, "Beer")];
        let confirmations = vec![MatchConfirmation {
            sale_name: "Chang".to_string(),
            catalog_name: "Beer, Chang, 32cl".to_string(),
            conversion_rate: 1.0,
            unit: None,
        }];

        let first = save_confirmed_sales(&conn, &history, day, &batch, &confirmations, &[], 0.6).unwrap();
        assert_eq!(first, SaveOutcome::Saved { records: 1 });

        let second = save_confirmed_sales(&conn, &history, day, &batch, &confirmations, &[], 0.6).unwrap();
        assert_eq!(second, SaveOutcome::Unchanged);

        assert_eq!(history.best_match("Chang").unwrap().use_count, 1);
        assert_eq!(load_history(&conn).unwrap()["chang"][0].use_count, 1);
        assert_eq!(load_sales(&conn).unwrap()[&day].items[0].name, "Beer, Chang, 32cl");
    }

    #[test]
    fn test_invalid_confirmation_saves_nothing() {
        let conn = test_db();
        let history = MatchHistoryStore::new();
        let day = date("2025-03-05");
        let confirmations = vec![MatchConfirmation {
            sale_name: "Chang".to_string(),
            catalog_name: " ".to_string(),
            conversion_rate: 1.0,
            unit: None,
        }];

        let result = save_confirmed_sales(
            &conn,
            &history,
            day,
            &[SaleRecord::new(day, "Chang", 6.0, "Beer")],
            &confirmations,
            &[],
            0.6,
        );

        assert!(result.is_err());
        assert!(history.is_empty());
        assert!(load_sales(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_transfers_round_trip() {
        let conn = test_db();
        let day = date("2025-03-06");
        let record = TransferRecord {
            date: day,
            name: "Chang".to_string(),
            qty: -6.0,
            direction: TransferDirection::Out,
            category: "Beer".to_string(),
            original_name: "chang".to_string(),
            match_score: 1.0,
        };

        save_daily_transfers(&conn, day, TransferDirection::Out, &[record.clone()]).unwrap();

        let transfers = load_transfers(&conn).unwrap();
        assert_eq!(transfers[&day].direction, TransferDirection::Out);
        assert_eq!(transfers[&day].items, vec![record]);

        assert!(delete_daily_transfers(&conn, day).unwrap());
        assert!(load_transfers(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_composites_round_trip() {
        let conn = test_db();
        save_composite(&conn, &margarita()).unwrap();

        let composites = load_composites(&conn).unwrap();
        assert_eq!(composites.len(), 1);
        assert_eq!(composites[0].sub_items[0].qty, 2.0);

        assert!(delete_composite(&conn, "c-1").unwrap());
        assert!(load_composites(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_history_round_trip() {
        let conn = test_db();
        let store = MatchHistoryStore::new();
        store.record("Chang", "Beer, Chang, 32cl", 1.0, Some("Beer"));

        assert_eq!(save_history(&conn, &store.snapshot()).unwrap(), 1);

        let map = load_history(&conn).unwrap();
        assert_eq!(map["chang"][0].catalog_name, "Beer, Chang, 32cl");
        assert_eq!(map["chang"][0].use_count, 1);
    }

    #[test]
    fn test_batch_hash_is_stable() {
        let day = date("2025-03-05");
        let batch = vec![SaleRecord::new(day, "Chang", 2.0, "Beer")];

        assert_eq!(compute_batch_hash(&batch).unwrap(), compute_batch_hash(&batch.clone()).unwrap());
        assert_eq!(compute_batch_hash(&batch).unwrap().len(), 64);
    }

    #[test]
    fn test_load_csv_files() {
        let mut catalog = tempfile::NamedTempFile::new().unwrap();
        writeln!(catalog, "name,category,opening_stock").unwrap();
        writeln!(catalog, "\"Gin, Nakin, 750ml\",Spirit,6").unwrap();
        writeln!(catalog, "Chang,Beer,24").unwrap();

        let snapshot = load_catalog_csv(catalog.path(), date("2025-03-01")).unwrap();
        assert_eq!(snapshot.names(), vec!["Gin, Nakin, 750ml".to_string(), "Chang".to_string()]);
        assert_eq!(snapshot.items[0].opening_stock, 6.0);

        let mut sales = tempfile::NamedTempFile::new().unwrap();
        writeln!(sales, "name,qty,category").unwrap();
        writeln!(sales, "Chang, 4, Beer").unwrap();
        writeln!(sales, ",1,Beer").unwrap();

        let records = load_sales_csv(sales.path(), date("2025-03-05")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Chang");
        assert_eq!(records[0].qty, 4.0);
        assert_eq!(records[0].category, "Beer");

        let mut transfers = tempfile::NamedTempFile::new().unwrap();
        writeln!(transfers, "name,qty").unwrap();
        writeln!(transfers, "Nakin gin,2").unwrap();

        let raw = load_transfer_csv(transfers.path()).unwrap();
        assert_eq!(raw, vec![RawTransfer { original_name: "Nakin gin".to_string(), qty: 2.0 }]);
    }
}
