use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::db::{Db, NamedKind};
use crate::error::{ErrorResponse, StoirError};
use crate::numbering::resolve_reference_date;
use crate::types::{
    ActivityEntry, BootstrapStatus, Customer, CustomerUpdate, DashboardSummary, Item, ItemFilters,
    ItemUpdate, LineInput, Named, NewCustomer, NewItem, NewSupplier, NewTransaction, NewUser,
    Permission, Session, StockFilters, StockRow, Supplier, SupplierUpdate, Transaction,
    TransactionDetail, TransactionFilters, TransactionKind, User,
};

/// Ports tried after the configured one when it is taken.
pub const PORT_FALLBACK_RANGE: u16 = 20;
pub const PORT_FILE: &str = "daemon.port";
const DEFAULT_ACTIVITY_LIMIT: usize = 50;

type AppState = Arc<Mutex<Db>>;

#[derive(Debug)]
struct AppError(StoirError);

fn status_for(err: &StoirError) -> StatusCode {
    match err {
        StoirError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoirError::AlreadyExists { .. }
        | StoirError::InUse { .. }
        | StoirError::InsufficientStock { .. }
        | StoirError::SetupComplete => StatusCode::CONFLICT,
        StoirError::InvalidDate(_) | StoirError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        StoirError::Unauthorized | StoirError::NotLoggedIn => StatusCode::UNAUTHORIZED,
        StoirError::Forbidden(_) => StatusCode::FORBIDDEN,
        StoirError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = ErrorResponse::from(&self.0);
        (status, Json(body)).into_response()
    }
}

impl From<StoirError> for AppError {
    fn from(err: StoirError) -> Self {
        AppError(err)
    }
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Db>, AppError> {
    state
        .lock()
        .map_err(|_| AppError(StoirError::Internal("database lock poisoned".into())))
}

const BEARER: &str = "Bearer ";

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The logged-in user behind the request's bearer token.
fn signed_in(db: &Db, headers: &HeaderMap) -> Result<User, AppError> {
    let token = bearer_token(headers).ok_or(AppError(StoirError::NotLoggedIn))?;
    Ok(db.session_user(token)?)
}

/// Like [`signed_in`], and the user's role must grant `permission`.
fn authorize(db: &Db, headers: &HeaderMap, permission: Permission) -> Result<User, AppError> {
    let user = signed_in(db, headers)?;
    if !user.role.allows(permission) {
        tracing::warn!(username = %user.username, role = user.role.as_str(), %permission, "permission denied");
        return Err(AppError(StoirError::Forbidden(format!(
            "role {} may not use {permission}",
            user.role.as_str()
        ))));
    }
    Ok(user)
}

pub fn router(db: Db) -> Router {
    let state: AppState = Arc::new(Mutex::new(db));

    let api = Router::new()
        .route("/health", get(health))
        .route("/numbers", post(allocate_number))
        .route("/suppliers", get(list_suppliers).post(create_supplier))
        .route(
            "/suppliers/{code}",
            get(get_supplier)
                .patch(update_supplier)
                .delete(delete_supplier),
        )
        .route("/customers", get(list_customers).post(create_customer))
        .route(
            "/customers/{code}",
            get(get_customer)
                .patch(update_customer)
                .delete(delete_customer),
        )
        .route("/items", get(list_items).post(create_item))
        .route(
            "/items/{code}",
            get(get_item).patch(update_item).delete(delete_item),
        )
        .route(
            "/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route("/transactions/{number}", get(get_transaction))
        .route("/reports/stock", get(stock_report))
        .route("/reports/dashboard-summary", get(dashboard_summary))
        .route("/activity", get(activity))
        .route("/auth/bootstrap-status", get(bootstrap_status))
        .route("/auth/setup-owner", post(setup_owner))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{username}", delete(delete_user));
    let api = named_routes(api, "/categories", NamedKind::Category);
    let api = named_routes(api, "/areas", NamedKind::Area);

    Router::new().nest("/api", api.with_state(state))
}

/// Binds `port` or, when it is taken, the first free port after it.
async fn bind(port: u16) -> Result<(TcpListener, u16), StoirError> {
    let last = port.saturating_add(PORT_FALLBACK_RANGE);
    let mut last_err = None;
    for candidate in port..=last {
        match TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    tracing::warn!(requested = port, bound = candidate, "port in use, fell back");
                }
                return Ok((listener, candidate));
            }
            Err(e) => {
                tracing::debug!(port = candidate, error = %e, "bind failed");
                last_err = Some(e);
            }
        }
    }
    Err(StoirError::Internal(format!(
        "failed to bind any port in {port}..={last}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

pub async fn start(port: u16, data_dir: PathBuf) -> Result<(), StoirError> {
    let db = Db::open(&data_dir)?;
    let app = router(db);

    let (listener, bound) = bind(port).await?;
    let port_file = data_dir.join(PORT_FILE);
    std::fs::write(&port_file, bound.to_string())
        .map_err(|e| StoirError::Internal(format!("failed to write port file: {e}")))?;

    tracing::info!(port = bound, data_dir = %data_dir.display(), "stoir daemon listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| StoirError::Internal(format!("server error: {e}")));

    if let Err(e) = std::fs::remove_file(&port_file) {
        tracing::debug!(error = %e, "could not remove port file");
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// --- Numbering ---

#[derive(Deserialize)]
struct NumberBody {
    prefix: String,
    date: Option<String>,
}

#[derive(Serialize)]
struct NumberResponse {
    number: String,
}

async fn allocate_number(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NumberBody>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Transactions)?;
    let number = db.allocate_number(&body.prefix, body.date.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(NumberResponse {
            number: number.to_string(),
        }),
    ))
}

// --- Categories & areas ---

#[derive(Deserialize)]
struct CreateNamedBody {
    code: Option<String>,
    name: String,
}

#[derive(Deserialize)]
struct RenameBody {
    name: String,
}

fn named_routes(router: Router<AppState>, base: &str, kind: NamedKind) -> Router<AppState> {
    router
        .route(
            base,
            get(move |state: State<AppState>, headers: HeaderMap| {
                list_named(state, headers, kind)
            })
            .post(
                move |state: State<AppState>, headers: HeaderMap, body: Json<CreateNamedBody>| {
                    create_named(state, headers, body, kind)
                },
            ),
        )
        .route(
            &format!("{base}/{{code}}"),
            get(
                move |state: State<AppState>, code: Path<String>, headers: HeaderMap| {
                    get_named(state, code, headers, kind)
                },
            )
            .patch(
                move |state: State<AppState>,
                      code: Path<String>,
                      headers: HeaderMap,
                      body: Json<RenameBody>| {
                    rename_named(state, code, headers, body, kind)
                },
            )
            .delete(
                move |state: State<AppState>, code: Path<String>, headers: HeaderMap| {
                    delete_named(state, code, headers, kind)
                },
            ),
        )
}

async fn list_named(
    State(db): State<AppState>,
    headers: HeaderMap,
    kind: NamedKind,
) -> Result<Json<Vec<Named>>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.list_named(kind)?))
}

async fn create_named(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateNamedBody>,
    kind: NamedKind,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    let named = db.create_named(kind, body.code.as_deref(), &body.name, &user.username)?;
    Ok((StatusCode::CREATED, Json(named)))
}

async fn get_named(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    kind: NamedKind,
) -> Result<Json<Named>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.get_named(kind, &code)?))
}

async fn rename_named(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RenameBody>,
    kind: NamedKind,
) -> Result<Json<Named>, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    Ok(Json(db.rename_named(kind, &code, &body.name, &user.username)?))
}

async fn delete_named(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    kind: NamedKind,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    db.delete_named(kind, &code, &user.username)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Suppliers ---

async fn list_suppliers(
    State(db): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Supplier>>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.list_suppliers()?))
}

async fn create_supplier(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewSupplier>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    let supplier = db.create_supplier(&body, &user.username)?;
    Ok((StatusCode::CREATED, Json(supplier)))
}

async fn get_supplier(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Supplier>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.get_supplier(&code)?))
}

async fn update_supplier(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SupplierUpdate>,
) -> Result<Json<Supplier>, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    Ok(Json(db.update_supplier(&code, &body, &user.username)?))
}

async fn delete_supplier(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    db.delete_supplier(&code, &user.username)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Customers ---

#[derive(Deserialize)]
struct CustomerQuery {
    area: Option<String>,
}

async fn list_customers(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CustomerQuery>,
) -> Result<Json<Vec<Customer>>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.list_customers(query.area.as_deref())?))
}

async fn create_customer(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewCustomer>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    let customer = db.create_customer(&body, &user.username)?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Customer>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.get_customer(&code)?))
}

async fn update_customer(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CustomerUpdate>,
) -> Result<Json<Customer>, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    Ok(Json(db.update_customer(&code, &body, &user.username)?))
}

async fn delete_customer(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    db.delete_customer(&code, &user.username)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Items ---

async fn list_items(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<ItemFilters>,
) -> Result<Json<Vec<Item>>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.list_items(&filters)?))
}

async fn create_item(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewItem>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    let item = db.create_item(&body, &user.username)?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn get_item(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Item>, AppError> {
    let db = lock(&db)?;
    signed_in(&db, &headers)?;
    Ok(Json(db.get_item(&code)?))
}

async fn update_item(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ItemUpdate>,
) -> Result<Json<Item>, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    Ok(Json(db.update_item(&code, &body, &user.username)?))
}

async fn delete_item(
    State(db): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::MasterData)?;
    db.delete_item(&code, &user.username)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Transactions ---

#[derive(Deserialize)]
struct CreateTransactionBody {
    kind: TransactionKind,
    date: Option<String>,
    partner_code: Option<String>,
    note: Option<String>,
    lines: Vec<LineInput>,
}

async fn create_transaction(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateTransactionBody>,
) -> Result<impl IntoResponse, AppError> {
    let new = NewTransaction {
        kind: body.kind,
        date: body.date,
        partner_code: body.partner_code,
        note: body.note,
        lines: body.lines,
    };
    let db = lock(&db)?;
    let user = authorize(&db, &headers, Permission::Transactions)?;
    let detail = db.create_transaction(&new, &user.username)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn list_transactions(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<TransactionFilters>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Reports)?;
    Ok(Json(db.list_transactions(&filters)?))
}

async fn get_transaction(
    State(db): State<AppState>,
    Path(number): Path<String>,
    headers: HeaderMap,
) -> Result<Json<TransactionDetail>, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Transactions)?;
    Ok(Json(db.get_transaction(&number)?))
}

// --- Reports ---

async fn stock_report(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<StockFilters>,
) -> Result<Json<Vec<StockRow>>, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Reports)?;
    Ok(Json(db.stock_report(&filters)?))
}

#[derive(Deserialize)]
struct DashboardQuery {
    today: Option<String>,
}

async fn dashboard_summary(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardSummary>, AppError> {
    let today = resolve_reference_date(query.today.as_deref())?;
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Dashboard)?;
    Ok(Json(db.dashboard_summary(today)?))
}

#[derive(Deserialize)]
struct ActivityQuery {
    limit: Option<usize>,
}

async fn activity(
    State(db): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Settings)?;
    Ok(Json(
        db.activity(query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT))?,
    ))
}

// --- Auth & users ---

async fn bootstrap_status(State(db): State<AppState>) -> Result<Json<BootstrapStatus>, AppError> {
    let db = lock(&db)?;
    Ok(Json(db.bootstrap_status()?))
}

#[derive(Deserialize)]
struct SetupOwnerBody {
    username: String,
    password: String,
    display_name: Option<String>,
}

async fn setup_owner(
    State(db): State<AppState>,
    Json(body): Json<SetupOwnerBody>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let user = db.setup_owner(&body.username, &body.password, body.display_name.as_deref())?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

async fn login(
    State(db): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Session>, AppError> {
    let db = lock(&db)?;
    let session = db.login(&body.username, &body.password)?;
    tracing::info!(username = %session.user.username, "session opened");
    Ok(Json(session))
}

async fn logout(State(db): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let token = bearer_token(&headers).ok_or(AppError(StoirError::NotLoggedIn))?;
    let db = lock(&db)?;
    db.logout(token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(
    State(db): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, AppError> {
    let db = lock(&db)?;
    authorize(&db, &headers, Permission::Settings)?;
    Ok(Json(db.list_users()?))
}

async fn create_user(
    State(db): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewUser>,
) -> Result<impl IntoResponse, AppError> {
    let db = lock(&db)?;
    let actor = authorize(&db, &headers, Permission::Settings)?;
    let user = db.create_user(&body, &actor.username)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn delete_user(
    State(db): State<AppState>,
    Path(username): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let db = lock(&db)?;
    let actor = authorize(&db, &headers, Permission::Settings)?;
    db.delete_user(&username, &actor.username)?;
    Ok(StatusCode::NO_CONTENT)
}
