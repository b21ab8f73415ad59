use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{delete, get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::error::{ApiErrorWithMeta, CoreError};
use crate::jobs::BatchReport;
use crate::licenses::{AdjustOutcome, ProcessOutcome};
use crate::orders::Confirmation;
use crate::platform::Platform;
use crate::products::ProductInput;
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::types::{
    AdminWallet, LedgerEntry, LicenseProduct, OrderDeposit, ReferralCommission, User, UserLicense,
};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The service every handler delegates to.
    pub platform: Platform,
}

type ApiResult<T> = Result<ApiOk<T>, ApiErrorWithMeta>;

fn core_error(meta: &RequestMeta) -> impl FnOnce(CoreError) -> ApiErrorWithMeta + '_ {
    move |e| ApiErrorWithMeta::from_core(e, meta.clone())
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    50
}

/// Paging parameters shared by list endpoints.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct ProductsQuery {
    #[serde(default)]
    pub active_only: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub admin_id: Uuid,
}

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub email: String,
    pub sponsor_ref_code: Option<String>,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: Decimal,
}

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub admin_id: Uuid,
    pub product: ProductInput,
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub product_id: Uuid,
}

#[derive(Deserialize)]
pub struct SubmitTxHashRequest {
    pub user_id: Uuid,
    pub tx_hash: String,
}

/// Body of admin actions that need nothing but the acting admin.
#[derive(Deserialize)]
pub struct AdminAction {
    pub admin_id: Uuid,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub admin_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct ProcessLicenseRequest {
    pub admin_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize)]
pub struct AdjustDaysRequest {
    pub admin_id: Uuid,
    pub days: i32,
}

#[derive(Deserialize)]
pub struct AdjustTimingRequest {
    pub admin_id: Uuid,
    pub shift_minutes: i64,
}

#[derive(Deserialize)]
pub struct PausePotentialRequest {
    pub admin_id: Uuid,
    pub paused: bool,
}

#[derive(Deserialize)]
pub struct AddWalletRequest {
    pub admin_id: Uuid,
    #[serde(default)]
    pub label: String,
    pub address: String,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users", post(register_user_handler))
        .route("/users/{id}/balance", get(balance_handler))
        .route("/users/{id}/ledger", get(ledger_handler))
        .route("/users/{id}/licenses", get(user_licenses_handler))
        .route("/products", get(list_products_handler))
        .route("/admin/products", post(create_product_handler))
        .route("/admin/products/{id}", delete(delete_product_handler))
        .route("/orders", post(create_order_handler))
        .route("/orders/{id}/tx-hash", post(submit_tx_hash_handler))
        .route("/admin/orders/{id}/confirm", post(confirm_order_handler))
        .route("/admin/orders/{id}/cancel", post(cancel_order_handler))
        .route("/admin/licenses/process-due", post(process_due_handler))
        .route("/admin/licenses/{id}/process", post(process_license_handler))
        .route("/admin/licenses/{id}/days", post(adjust_days_handler))
        .route("/admin/licenses/{id}/timing", post(adjust_timing_handler))
        .route(
            "/admin/licenses/{id}/pause-potential",
            post(pause_potential_handler),
        )
        .route(
            "/admin/commissions/{id}/release",
            post(release_commission_handler),
        )
        .route("/admin/commissions/{id}/cancel", post(cancel_commission_handler))
        .route("/admin/wallets", post(add_wallet_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn register_user_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RegisterUserRequest>,
) -> ApiResult<User> {
    let user = st
        .platform
        .register_user(&req.email, req.sponsor_ref_code.as_deref())
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::created("user registered", user, meta))
}

async fn balance_handler(
    State(st): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<BalanceResponse> {
    let balance = st
        .platform
        .balance(user_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok(
        "balance fetched",
        BalanceResponse { user_id, balance },
        meta,
    ))
}

async fn ledger_handler(
    State(st): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(q): Query<PageQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<LedgerEntry>> {
    let entries = st
        .platform
        .ledger_entries(user_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::page("ledger fetched", entries, q.page, q.per_page, meta))
}

async fn user_licenses_handler(
    State(st): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<UserLicense>> {
    let licenses = st
        .platform
        .licenses_for_user(user_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("licenses fetched", licenses, meta))
}

async fn list_products_handler(
    State(st): State<AppState>,
    Query(q): Query<ProductsQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Vec<LicenseProduct>> {
    let products = st
        .platform
        .products(q.active_only)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::page("products fetched", products, q.page, q.per_page, meta))
}

async fn create_product_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateProductRequest>,
) -> ApiResult<LicenseProduct> {
    let product = st
        .platform
        .create_product(req.product, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::created("product created", product, meta))
}

async fn delete_product_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<AdminQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<Uuid> {
    st.platform
        .delete_product(id, q.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("product deleted", id, meta))
}

async fn create_order_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<OrderDeposit> {
    let order = st
        .platform
        .create_order(req.user_id, req.product_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::created("order created", order, meta))
}

async fn submit_tx_hash_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<SubmitTxHashRequest>,
) -> ApiResult<OrderDeposit> {
    let order = st
        .platform
        .submit_tx_hash(id, req.user_id, &req.tx_hash)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("payment submitted", order, meta))
}

async fn confirm_order_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AdminAction>,
) -> ApiResult<Confirmation> {
    let confirmation = st
        .platform
        .confirm_order(id, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("order confirmed", confirmation, meta))
}

async fn cancel_order_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CancelOrderRequest>,
) -> ApiResult<OrderDeposit> {
    let order = st
        .platform
        .cancel_order(id, req.admin_id, req.reason.as_deref())
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("order canceled", order, meta))
}

async fn process_due_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiResult<BatchReport> {
    let report = st
        .platform
        .process_due_licenses()
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("due licenses processed", report, meta))
}

async fn process_license_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ProcessLicenseRequest>,
) -> ApiResult<ProcessOutcome> {
    let outcome = st
        .platform
        .process_license_earnings(id, req.force, Some(req.admin_id))
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("license day processed", outcome, meta))
}

async fn adjust_days_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AdjustDaysRequest>,
) -> ApiResult<AdjustOutcome> {
    let outcome = st
        .platform
        .adjust_license_days(id, req.days, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("license days adjusted", outcome, meta))
}

async fn adjust_timing_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AdjustTimingRequest>,
) -> ApiResult<UserLicense> {
    let license = st
        .platform
        .adjust_license_timing(id, req.shift_minutes, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("license timing adjusted", license, meta))
}

async fn pause_potential_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<PausePotentialRequest>,
) -> ApiResult<UserLicense> {
    let license = st
        .platform
        .set_pause_potential(id, req.paused, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("license flags updated", license, meta))
}

async fn release_commission_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AdminAction>,
) -> ApiResult<ReferralCommission> {
    let commission = st
        .platform
        .release_commission(id, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("commission released", commission, meta))
}

async fn cancel_commission_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AdminAction>,
) -> ApiResult<ReferralCommission> {
    let commission = st
        .platform
        .cancel_commission(id, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::ok("commission canceled", commission, meta))
}

async fn add_wallet_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<AddWalletRequest>,
) -> ApiResult<AdminWallet> {
    let wallet = st
        .platform
        .add_wallet(&req.label, &req.address, req.admin_id)
        .await
        .map_err(core_error(&meta))?;
    Ok(ApiOk::created("wallet added", wallet, meta))
}
