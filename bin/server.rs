// PAR Stock Reconciliation - Web Server
// REST API with Axum over the SQLite store

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use par_stock_recon::{
    apply_catalog_mutation, dates_in_period, delete_composite, delete_daily_sales, delete_daily_transfers,
    load_catalogs, load_composites, load_history, load_sales, load_transfers, logging, monthly_totals,
    open_database, range_totals, save_composite, save_confirmed_sales, save_daily_transfers, snapshot_stats,
    transfer_dates, CompositeItem, CompositeRegistry, DailySales, DailyTransfers, DateWindow, MatchConfirmation,
    MatchHistoryEntry, MatchHistoryStore, RangeTotals, RawTransfer, ReconConfig, ReconError, ReconciliationEngine,
    SaleRecord, SnapshotStats, SubItem, TransferDirection, TransferRecord,
};

/// Environment variable for the listen address
const ADDR_ENV: &str = "PAR_STOCK_ADDR";
const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    history: MatchHistoryStore,
    config: Arc<ReconConfig>,
}

impl AppState {
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("database lock poisoned")))
    }

    fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::new((*self.config).clone())
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

#[derive(Serialize)]
struct ApiError {
    success: bool,
    error: String,
}

// ============================================================================
// Errors
// ============================================================================

enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<ReconError> for AppError {
    fn from(err: ReconError) -> Self {
        match err {
            ReconError::CompositeNotFound(_) => AppError::NotFound(err.to_string()),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Internal(err) => {
                error!(error = %format!("{:#}", err), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        (status, Json(ApiError { success: false, error: message })).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn parse_date(value: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date (want YYYY-MM-DD): {}", value)))
}

// ============================================================================
// Request bodies
// ============================================================================

/// Sale line as uploaded, before it is tied to a date
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedSale {
    name: String,
    qty: f64,

    #[serde(default)]
    category: String,

    #[serde(default)]
    original_name: String,
}

impl UploadedSale {
    fn into_record(self, date: NaiveDate) -> SaleRecord {
        let mut record = SaleRecord::new(date, &self.name, self.qty, &self.category);
        if !self.original_name.is_empty() {
            record.original_name = self.original_name;
        }
        record
    }
}

#[derive(Deserialize)]
struct PreviewRequest {
    date: String,
    items: Vec<UploadedSale>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveSaleRequest {
    date: String,
    items: Vec<UploadedSale>,

    #[serde(default)]
    confirmations: Vec<MatchConfirmation>,
}

#[derive(Deserialize)]
struct ParseTransferRequest {
    date: String,
    direction: String,
    items: Vec<RawTransfer>,
}

#[derive(Deserialize)]
struct SaveTransferRequest {
    date: String,
    direction: String,
    items: Vec<TransferRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeRequest {
    name: String,
    sub_items: Vec<SubItem>,
}

#[derive(Deserialize)]
struct ComparisonQuery {
    date: Option<String>,
}

fn parse_direction(value: &str) -> Result<TransferDirection, AppError> {
    TransferDirection::parse(value)
        .ok_or_else(|| AppError::BadRequest("direction must be \"in\" or \"out\"".to_string()))
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/par-comparison/:start?date=YYYY-MM-DD
async fn par_comparison(
    State(state): State<AppState>,
    Path(start): Path<String>,
    Query(query): Query<ComparisonQuery>,
) -> Result<Response, AppError> {
    let start = parse_date(&start)?;
    let specific = query.date.as_deref().map(parse_date).transpose()?;

    let conn = state.conn()?;
    let report = state.engine().compare_one(
        &load_catalogs(&conn)?,
        &load_sales(&conn)?,
        &load_transfers(&conn)?,
        start,
        specific,
    );

    match report {
        Some(report) => Ok(ApiResponse::ok(report).into_response()),
        None => Err(AppError::NotFound(format!("no PAR stock period starts on {}", start))),
    }
}

/// GET /api/summary/:start/:end
async fn summary(
    State(state): State<AppState>,
    Path((start, end)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let start = parse_date(&start)?;
    let end = parse_date(&end)?;

    let conn = state.conn()?;
    let report = state.engine().summarize_range(
        &load_catalogs(&conn)?,
        &load_sales(&conn)?,
        &load_transfers(&conn)?,
        start,
        end,
    )?;

    match report {
        Some(report) => Ok(ApiResponse::ok(report).into_response()),
        None => Err(AppError::NotFound(format!("no PAR stock period starts on {}", start))),
    }
}

/// GET /api/stats
async fn stats(State(state): State<AppState>) -> ApiResult<SnapshotStats> {
    let conn = state.conn()?;
    Ok(ApiResponse::ok(snapshot_stats(&load_sales(&conn)?)))
}

/// GET /api/range-totals/:start/:end - per-item sold quantities over a date range
async fn sales_range_totals(
    State(state): State<AppState>,
    Path((start, end)): Path<(String, String)>,
) -> ApiResult<Option<RangeTotals>> {
    let window = DateWindow::new(parse_date(&start)?, parse_date(&end)?)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(range_totals(&load_sales(&conn)?, window)))
}

/// GET /api/monthly-totals/:year/:month
async fn sales_monthly_totals(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> ApiResult<Option<RangeTotals>> {
    let conn = state.conn()?;
    Ok(ApiResponse::ok(monthly_totals(&load_sales(&conn)?, year, month)?))
}

/// POST /api/preview-daily-sale
async fn preview_daily_sale(State(state): State<AppState>, Json(body): Json<PreviewRequest>) -> Result<Response, AppError> {
    let date = parse_date(&body.date)?;
    let items: Vec<SaleRecord> = body.items.into_iter().map(|item| item.into_record(date)).collect();

    let conn = state.conn()?;
    let preview = state
        .engine()
        .preview_sales(date, &items, &load_catalogs(&conn)?, &state.history)?;

    Ok(ApiResponse::ok(preview).into_response())
}

/// POST /api/save-daily-sale - confirm matches, expand composites, persist
async fn save_daily_sale(State(state): State<AppState>, Json(body): Json<SaveSaleRequest>) -> Result<Response, AppError> {
    let date = parse_date(&body.date)?;
    if body.items.is_empty() {
        return Err(AppError::BadRequest("items are required".to_string()));
    }
    let items: Vec<SaleRecord> = body.items.into_iter().map(|item| item.into_record(date)).collect();

    let conn = state.conn()?;
    let outcome = save_confirmed_sales(
        &conn,
        &state.history,
        date,
        &items,
        &body.confirmations,
        &load_composites(&conn)?,
        state.config.composite_threshold,
    )?;

    Ok(ApiResponse::ok(outcome).into_response())
}

/// GET /api/daily-sale/:date - stored (expanded) records of one day
async fn get_daily_sale(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult<DailySales> {
    let date = parse_date(&date)?;
    let conn = state.conn()?;

    load_sales(&conn)?
        .remove(&date)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::NotFound(format!("no sales saved for {}", date)))
}

/// DELETE /api/daily-sale/:date
async fn remove_daily_sale(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult<bool> {
    let date = parse_date(&date)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(delete_daily_sales(&conn, date)?))
}

/// GET /api/dates-in-par-period/:start
async fn par_period_dates(State(state): State<AppState>, Path(start): Path<String>) -> ApiResult<Vec<NaiveDate>> {
    let start = parse_date(&start)?;
    let conn = state.conn()?;

    let catalogs = load_catalogs(&conn)?;
    let window = catalogs
        .valid_window(start, Utc::now().date_naive())
        .ok_or_else(|| AppError::NotFound(format!("no PAR stock period starts on {}", start)))?;

    Ok(ApiResponse::ok(dates_in_period(&load_sales(&conn)?, window)))
}

/// GET /api/group-items
async fn list_group_items(State(state): State<AppState>) -> ApiResult<Vec<CompositeItem>> {
    let conn = state.conn()?;
    Ok(ApiResponse::ok(load_composites(&conn)?))
}

/// GET /api/group-items/:id
async fn get_group_item(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<CompositeItem> {
    let conn = state.conn()?;
    let registry = CompositeRegistry::from_items(load_composites(&conn)?);

    registry
        .get(&id)
        .cloned()
        .map(ApiResponse::ok)
        .ok_or_else(|| ReconError::CompositeNotFound(id).into())
}

/// POST /api/group-items
async fn create_group_item(
    State(state): State<AppState>,
    Json(body): Json<CompositeRequest>,
) -> ApiResult<CompositeItem> {
    let conn = state.conn()?;
    let mut registry = CompositeRegistry::from_items(load_composites(&conn)?);

    let (item, mutation) = registry.register(&body.name, body.sub_items)?;
    save_composite(&conn, &item)?;
    apply_catalog_mutation(&conn, &mutation)?;

    Ok(ApiResponse::ok(item))
}

/// PUT /api/group-items/:id
async fn update_group_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CompositeRequest>,
) -> ApiResult<CompositeItem> {
    let conn = state.conn()?;
    let mut registry = CompositeRegistry::from_items(load_composites(&conn)?);

    let (item, mutations) = registry.update(&id, &body.name, body.sub_items)?;
    save_composite(&conn, &item)?;
    for mutation in &mutations {
        apply_catalog_mutation(&conn, mutation)?;
    }

    Ok(ApiResponse::ok(item))
}

/// DELETE /api/group-items/:id
async fn delete_group_item(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<CompositeItem> {
    let conn = state.conn()?;
    let mut registry = CompositeRegistry::from_items(load_composites(&conn)?);

    let (item, mutation) = registry.remove(&id)?;
    delete_composite(&conn, &item.id)?;
    apply_catalog_mutation(&conn, &mutation)?;

    Ok(ApiResponse::ok(item))
}

/// POST /api/parse-transfer - resolve names without saving
async fn parse_transfer(
    State(state): State<AppState>,
    Json(body): Json<ParseTransferRequest>,
) -> ApiResult<Vec<TransferRecord>> {
    let date = parse_date(&body.date)?;
    let direction = parse_direction(&body.direction)?;

    let conn = state.conn()?;
    let records = state
        .engine()
        .resolve_transfers(date, &body.items, direction, &load_catalogs(&conn)?)
        .ok_or_else(|| AppError::NotFound(format!("no PAR stock period covers {}; upload one first", date)))?;

    Ok(ApiResponse::ok(records))
}

/// POST /api/save-daily-transfer
async fn save_daily_transfer(
    State(state): State<AppState>,
    Json(body): Json<SaveTransferRequest>,
) -> ApiResult<usize> {
    let date = parse_date(&body.date)?;
    let direction = parse_direction(&body.direction)?;

    let conn = state.conn()?;
    save_daily_transfers(&conn, date, direction, &body.items)?;
    Ok(ApiResponse::ok(body.items.len()))
}

/// GET /api/daily-transfer/:date
async fn get_daily_transfer(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult<DailyTransfers> {
    let date = parse_date(&date)?;
    let conn = state.conn()?;

    load_transfers(&conn)?
        .remove(&date)
        .map(ApiResponse::ok)
        .ok_or_else(|| AppError::NotFound(format!("no transfers saved for {}", date)))
}

/// GET /api/transfer-dates - newest first
async fn list_transfer_dates(State(state): State<AppState>) -> ApiResult<Vec<NaiveDate>> {
    let conn = state.conn()?;
    Ok(ApiResponse::ok(transfer_dates(&load_transfers(&conn)?)))
}

/// DELETE /api/daily-transfer/:date
async fn remove_daily_transfer(State(state): State<AppState>, Path(date): Path<String>) -> ApiResult<bool> {
    let date = parse_date(&date)?;
    let conn = state.conn()?;
    Ok(ApiResponse::ok(delete_daily_transfers(&conn, date)?))
}

/// GET /api/matching-history/:sale_name
async fn matching_history(
    State(state): State<AppState>,
    Path(sale_name): Path<String>,
) -> ApiResult<Vec<MatchHistoryEntry>> {
    // Decode URL-encoded sale name
    let decoded = urlencoding::decode(&sale_name)
        .unwrap_or_else(|_| sale_name.clone().into())
        .into_owned();

    Ok(ApiResponse::ok(state.history.entries(&decoded)))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    println!("🌐 PAR Stock Reconciliation - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = ReconConfig::load()?;
    let conn = open_database(&config.database_path)?;
    println!("✓ Database opened: {:?}", config.database_path);

    let history = MatchHistoryStore::from_map(load_history(&conn)?);
    println!("✓ {} remembered sale names", history.len());

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        history,
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/par-comparison/:start", get(par_comparison))
        .route("/summary/:start/:end", get(summary))
        .route("/dates-in-par-period/:start", get(par_period_dates))
        .route("/range-totals/:start/:end", get(sales_range_totals))
        .route("/monthly-totals/:year/:month", get(sales_monthly_totals))
        .route("/preview-daily-sale", post(preview_daily_sale))
        .route("/save-daily-sale", post(save_daily_sale))
        .route("/daily-sale/:date", get(get_daily_sale).delete(remove_daily_sale))
        .route("/group-items", get(list_group_items).post(create_group_item))
        .route(
            "/group-items/:id",
            get(get_group_item).put(update_group_item).delete(delete_group_item),
        )
        .route("/parse-transfer", post(parse_transfer))
        .route("/save-daily-transfer", post(save_daily_transfer))
        .route("/daily-transfer/:date", get(get_daily_transfer).delete(remove_daily_transfer))
        .route("/transfer-dates", get(list_transfer_dates))
        .route("/matching-history/:sale_name", get(matching_history))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    // Start server
    let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/health", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
