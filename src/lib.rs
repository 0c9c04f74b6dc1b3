// PAR Stock Reconciliation - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod logging;
pub mod config;
pub mod models;
pub mod matching;       // Name matching (token overlap, edit distance)
pub mod conversion;     // Sold units → stock units
pub mod history;        // Learned sale → catalog matches
pub mod catalog;        // Catalog periods + placeholder mutations
pub mod period;         // Date windows and range totals
pub mod composite;      // Composite registry + expansion
pub mod reconciliation; // Compare, summarize, preview, transfers
pub mod db;             // SQLite persistence collaborator

// Re-export commonly used types
pub use error::{ReconError, ReconResult};
pub use config::ReconConfig;
pub use models::{
    CatalogItem, CatalogSnapshot, CompositeItem, DailySales, DailyTransfers, RawTransfer,
    SaleOrigin, SaleRecord, SalesSnapshot, SubItem, TransferDirection, TransferRecord,
    TransfersSnapshot,
};
pub use matching::{
    edit_similarity, find_best_match, levenshtein_distance, match_items, score, tokenize,
    ItemMatch, MatchResult,
};
pub use conversion::{
    conversion_rate, convert_qty, spirit_conversion_rate, summarize_conversion, unit_label,
    Conversion, ConversionSummary,
};
pub use history::{MatchHistoryEntry, MatchHistoryStore};
pub use catalog::{CatalogHistory, CatalogMutation};
pub use period::{
    dates_in_period, monthly_totals, range_totals, snapshot_stats, transfer_dates, DateWindow, RangeTotals,
    SnapshotStats,
};
pub use composite::{CompositeExpander, CompositeRegistry};
pub use reconciliation::{
    apply_confirmations, confirm_matches, validate_confirmations, LineKind, MatchConfirmation, MatchSource,
    ReconciliationEngine, ReconciliationLine, ReconciliationReport, SalesPreview, SummaryReport,
};
pub use db::{
    Event, SaveOutcome,
    open_database, setup_database, insert_event, get_events_for_entity,
    save_catalog, load_catalogs, apply_catalog_mutation,
    save_daily_sales, save_confirmed_sales, delete_daily_sales, load_sales,
    save_daily_transfers, delete_daily_transfers, load_transfers,
    save_composite, delete_composite, load_composites,
    save_history, load_history,
    load_catalog_csv, load_sales_csv, load_transfer_csv,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
