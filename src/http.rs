//! HTTP surface: cart, checkout, payment and gateway callback endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::domain::aggregates::{CartItem, CatalogItem, FieldSpec, Order, PaymentSession};
use crate::domain::pricing;
use crate::domain::value_objects::{Money, OwnerId};
use crate::gateway::PaymentGateway;
use crate::notify::Notifier;
use crate::services::{
    AddItem, CallbackStatus, CartService, CartView, GatewayCallback, OrderBuilder, OrderService, PaymentOrchestrator,
    PaymentOutcome, PaymentRedirect, PaymentSettings, UpdateItem,
};
use crate::store::{Catalog, Store};
use crate::CheckoutError;

type ApiResult<T> = std::result::Result<T, CheckoutError>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub carts: CartService,
    pub checkout: OrderBuilder,
    pub orders: OrderService,
    pub payments: PaymentOrchestrator,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Notifier,
        settings: PaymentSettings,
        currency_scale: u32,
    ) -> Self {
        Self {
            carts: CartService::new(store.clone(), currency_scale),
            checkout: OrderBuilder::new(store.clone(), notifier.clone(), currency_scale),
            orders: OrderService::new(store.clone(), notifier.clone()),
            payments: PaymentOrchestrator::new(store.clone(), gateway, notifier, settings),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "subscription-checkout"})) }))
        .route("/api/v1/catalog/:id", get(get_catalog_item).put(put_catalog_item))
        .route("/api/v1/catalog/:id/discount", put(set_discount))
        .route("/api/v1/cart/:owner", get(get_cart))
        .route("/api/v1/cart/:owner/items", post(add_to_cart))
        .route("/api/v1/cart/:owner/items/:item_id", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/checkout/:owner", post(checkout))
        .route("/api/v1/owners/:owner/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/pay", post(open_payment))
        .route("/api/v1/orders/:id/pay/redirect", get(redirect_to_gateway))
        .route("/api/v1/orders/:id/payment", get(get_payment_session))
        .route("/api/v1/orders/:id/callback", get(payment_callback))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckoutError {
    pub fn status_code(&self) -> StatusCode {
        use CheckoutError::*;
        match self {
            InvalidDiscount(_) | InvalidPrice(_) | AmountOutOfRange | InvalidQuantity | AuthorityMismatch(_)
            | AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            MissingFields(_) | CheckoutRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ItemUnavailable(_) | EmptyCart | AlreadySessioned(_) | OrderNotPending(..) | NotCancelable(_)
            | IllegalTransition(..) => StatusCode::CONFLICT,
            CatalogItemNotFound(_) | CartItemNotFound(_) | OrderNotFound(_) | UnknownOrder(_) => StatusCode::NOT_FOUND,
            Gateway(_) => StatusCode::BAD_GATEWAY,
            GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            Notification(_) | Config(_) | Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() && !self.is_retryable() {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let details = match &self {
            CheckoutError::CheckoutRejected(rejections) => serde_json::to_value(rejections).ok(),
            CheckoutError::MissingFields(missing) => Some(serde_json::json!({ "missing": missing })),
            _ => None,
        };
        let body = ErrorResponse { error: status.canonical_reason().unwrap_or("Error").to_string(), message, details };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PutCatalogItemRequest {
    pub name: String,
    pub base_price: Decimal,
    pub discount_percent: Option<Decimal>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool { true }

#[derive(Debug, Deserialize)]
pub struct DiscountRequest { pub discount_percent: Option<Decimal> }

async fn get_catalog_item(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<CatalogItem>> {
    s.store.catalog_item(id).await?.map(Json).ok_or(CheckoutError::CatalogItemNotFound(id))
}

async fn put_catalog_item(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<PutCatalogItemRequest>) -> ApiResult<Json<CatalogItem>> {
    let price = pricing::check_price(r.base_price)?;
    let mut item = match s.store.catalog_item(id).await? {
        Some(existing) => existing,
        None => CatalogItem { id, ..CatalogItem::create(r.name.clone(), price) },
    };
    item.name = r.name;
    item.update_price(r.base_price)?;
    item.set_discount(r.discount_percent)?;
    item.fields = r.fields;
    item.active = r.active;
    s.store.put_catalog_item(&item).await?;
    Ok(Json(item))
}

async fn set_discount(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<DiscountRequest>) -> ApiResult<Json<CatalogItem>> {
    Ok(Json(s.store.set_discount(id, r.discount_percent).await?))
}

// =============================================================================
// Cart and checkout
// =============================================================================

async fn get_cart(State(s): State<AppState>, Path(owner): Path<String>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.carts.view(&OwnerId::new(owner)).await?))
}

async fn add_to_cart(State(s): State<AppState>, Path(owner): Path<String>, Json(r): Json<AddItem>) -> ApiResult<(StatusCode, Json<CartItem>)> {
    let item = s.carts.add_item(&OwnerId::new(owner), r).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_cart_item(
    State(s): State<AppState>,
    Path((owner, item_id)): Path<(String, Uuid)>,
    Json(r): Json<UpdateItem>,
) -> ApiResult<Json<CartItem>> {
    Ok(Json(s.carts.update_item(&OwnerId::new(owner), item_id, r).await?))
}

async fn remove_cart_item(State(s): State<AppState>, Path((owner, item_id)): Path<(String, Uuid)>) -> ApiResult<StatusCode> {
    s.carts.remove_item(&OwnerId::new(owner), item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutRequest { pub contact: Option<String> }

async fn checkout(State(s): State<AppState>, Path(owner): Path<String>, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    let contact = r.contact.filter(|c| !c.trim().is_empty());
    let order = s.checkout.build_order(&OwnerId::new(owner), contact).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

// =============================================================================
// Orders and payment
// =============================================================================

async fn list_orders(State(s): State<AppState>, Path(owner): Path<String>) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.orders.orders_for_owner(&OwnerId::new(owner)).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.order(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CancelParams { pub owner: String }

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<CancelParams>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.cancel(&OwnerId::new(p.owner), id).await?))
}

async fn open_payment(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<(StatusCode, Json<PaymentRedirect>)> {
    Ok((StatusCode::CREATED, Json(s.payments.open_session(id).await?)))
}

async fn redirect_to_gateway(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Response> {
    let url = s.payments.begin_redirect(id).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

async fn get_payment_session(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<PaymentSession>> {
    s.orders.session(id).await?.map(Json).ok_or(CheckoutError::UnknownOrder(id))
}

/// Query string the gateway appends to the callback URL. Missing values are
/// acknowledged like a forged authority, never rejected by the extractor.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(rename = "Authority")]
    pub authority: Option<String>,
    #[serde(rename = "Status")]
    pub status: Option<String>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PaymentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Duplicates and callbacks failing integrity checks are acknowledged with
/// 200 so the gateway stops redelivering them.
async fn payment_callback(State(s): State<AppState>, Path(id): Path<Uuid>, Query(p): Query<CallbackParams>) -> ApiResult<Json<CallbackAck>> {
    let (Some(authority), Some(status)) = (p.authority, p.status) else {
        tracing::warn!(order_id = %id, "callback without Authority or Status");
        let message = CheckoutError::AuthorityMismatch(id).to_string();
        return Ok(Json(CallbackAck { acknowledged: true, outcome: None, message: Some(message) }));
    };
    let callback = GatewayCallback {
        authority,
        status: CallbackStatus::from(status.as_str()),
        amount: p.amount.map(Money::new),
    };
    match s.payments.handle_callback(id, callback).await {
        Ok(outcome) => Ok(Json(CallbackAck { acknowledged: true, outcome: Some(outcome), message: None })),
        Err(e) if e.is_suspicious() => Ok(Json(CallbackAck { acknowledged: true, outcome: None, message: Some(e.to_string()) })),
        Err(e) => Err(e),
    }
}
