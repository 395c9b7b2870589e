//! REST API server exposing the settlement engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller is identified by the `x-user-id` header. The server seeds a
//! small catalog on startup: user 2 owns store 1, which sells product 1
//! (10 units at 10.00). User 1 has address 1 and account 1 (100.00), and
//! user 2 has account 2 (50.00).
//!
//! # Example requests
//!
//! ```bash
//! # Place an order
//! curl -X POST http://localhost:3000/orders \
//!   -H "x-user-id: 1" -H "Content-Type: application/json" \
//!   -d '{"product": 1, "address": 1, "quantity": 3}'
//!
//! # Pay for it
//! curl -X POST http://localhost:3000/payments \
//!   -H "x-user-id: 1" -H "Content-Type: application/json" \
//!   -d '{"order": 1, "account": 1}'
//!
//! # Ship it (store owner)
//! curl -X POST http://localhost:3000/orders/1/advance \
//!   -H "x-user-id: 2" -H "Content-Type: application/json" \
//!   -d '{"status": "shipped"}'
//!
//! # List my orders
//! curl -H "x-user-id: 1" http://localhost:3000/orders
//! ```

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use marketplace_settlement::{
    Account, AccountId, Address, AddressId, MemoryStorage, Order, OrderId, OrderStatus, Payment,
    PaymentId, Product, ProductId, SettlementConfig, SettlementEngine, SettlementError, Store,
    StoreId, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Engine = SettlementEngine<MemoryStorage>;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub product: u64,
    pub address: u64,
    pub quantity: u32,
}

/// Body for `PUT /orders/{id}`. Omitting `status` keeps the order open.
#[derive(Debug, Deserialize)]
pub struct UpdateOrderRequest {
    pub quantity: u32,
    pub address: u64,
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AdvanceOrderRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order: u64,
    pub account: u64,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: u64,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: u64,
    pub status: OrderStatus,
    pub product: u64,
    pub address: u64,
    pub quantity: u32,
    pub price: Decimal,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            order: order.id.0,
            status: order.status(),
            product: order.line.product.0,
            address: order.line.address.0,
            quantity: order.line.quantity,
            price: order.line.price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Caller Identity ===

/// The user named by the `x-user-id` header.
pub struct Caller(UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(|id| Caller(UserId(id)))
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: "missing or invalid x-user-id header".to_string(),
                        code: "UNAUTHENTICATED".to_string(),
                    }),
                )
            })
    }
}

// === Error Handling ===

pub enum AppError {
    Settlement(SettlementError),
    /// The blocking task running the operation panicked.
    Aborted,
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        AppError::Settlement(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::Settlement(err) => err,
            AppError::Aborted => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: "operation aborted".to_string(),
                        code: "ABORTED".to_string(),
                    }),
                )
                    .into_response();
            }
        };

        let (status, code) = match &err {
            SettlementError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            SettlementError::ProductNotFound(_) => (StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND"),
            SettlementError::AddressNotFound(_) => (StatusCode::NOT_FOUND, "ADDRESS_NOT_FOUND"),
            SettlementError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            SettlementError::PaymentNotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
            SettlementError::StoreNotFound(_) => (StatusCode::NOT_FOUND, "STORE_NOT_FOUND"),
            SettlementError::NoSellerAccount(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NO_SELLER_ACCOUNT")
            }
            SettlementError::InsufficientStock { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_STOCK")
            }
            SettlementError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            SettlementError::OrderAlreadyPaid(_) => (StatusCode::CONFLICT, "ORDER_ALREADY_PAID"),
            SettlementError::OrderClosed(_) => (StatusCode::CONFLICT, "ORDER_CLOSED"),
            SettlementError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            SettlementError::QuantityOutOfRange { .. } | SettlementError::InvalidQuantity => {
                (StatusCode::BAD_REQUEST, "INVALID_QUANTITY")
            }
            SettlementError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            SettlementError::StockOverflow(_)
            | SettlementError::BalanceOverflow(_)
            | SettlementError::PriceOverflow(_) => (StatusCode::UNPROCESSABLE_ENTITY, "OVERFLOW"),
            SettlementError::PermissionDenied => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
            SettlementError::Storage(_) if err.is_retryable() => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
            }
            SettlementError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE"),
        };

        (
            status,
            Json(ErrorResponse {
                error: err.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Runs an engine call on the blocking pool, since it may wait on row locks.
async fn run<T, F>(state: &AppState, op: F) -> Result<T, AppError>
where
    F: FnOnce(&Engine) -> Result<T, SettlementError> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|_| AppError::Aborted)?
        .map_err(AppError::from)
}

// === Handlers ===

/// POST /orders - Place an order.
async fn create_order(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = run(&state, move |engine| {
        engine.create_order(
            buyer,
            ProductId(request.product),
            AddressId(request.address),
            request.quantity,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

/// GET /orders - List the caller's orders.
async fn list_orders(
    State(state): State<AppState>,
    Caller(buyer): Caller,
) -> Result<Json<Vec<OrderResponse>>, AppError> {
    let orders = run(&state, move |engine| engine.orders_of(buyer)).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// GET /orders/{id} - Read one of the caller's orders.
async fn get_order(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Path(id): Path<u64>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = run(&state, move |engine| engine.order(buyer, OrderId(id))).await?;
    Ok(Json(order.into()))
}

/// PUT /orders/{id} - Change quantity and address, or cancel.
async fn update_order(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Path(id): Path<u64>,
    Json(request): Json<UpdateOrderRequest>,
) -> Result<StatusCode, AppError> {
    run(&state, move |engine| {
        engine.update_order(
            OrderId(id),
            buyer,
            request.quantity,
            AddressId(request.address),
            request.status.unwrap_or(OrderStatus::Created),
        )
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /orders/{id} - Delete an order, returning its stock.
async fn delete_order(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Path(id): Path<u64>,
) -> Result<StatusCode, AppError> {
    run(&state, move |engine| engine.delete_order(buyer, OrderId(id))).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/{id}/advance - Fulfilment step, by the store owner.
async fn advance_order(
    State(state): State<AppState>,
    Caller(actor): Caller,
    Path(id): Path<u64>,
    Json(request): Json<AdvanceOrderRequest>,
) -> Result<StatusCode, AppError> {
    run(&state, move |engine| {
        engine.advance_order(actor, OrderId(id), request.status)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /payments - Pay for an order.
async fn create_payment(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let id = run(&state, move |engine| {
        engine.create_payment(buyer, OrderId(request.order), AccountId(request.account))
    })
    .await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: id.0 })))
}

/// GET /payments - List the caller's payments.
async fn list_payments(
    State(state): State<AppState>,
    Caller(buyer): Caller,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(run(&state, move |engine| engine.payments_of(buyer)).await?))
}

/// GET /payments/{id} - Read one of the caller's payments.
async fn get_payment(
    State(state): State<AppState>,
    Caller(buyer): Caller,
    Path(id): Path<u64>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(
        run(&state, move |engine| engine.payment(buyer, PaymentId(id))).await?,
    ))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route(
            "/orders/{id}",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/orders/{id}/advance", post(advance_order))
        .route("/payments", post(create_payment).get(list_payments))
        .route("/payments/{id}", get(get_payment))
        .with_state(state)
}

fn seed(storage: &MemoryStorage) -> Result<(), SettlementError> {
    storage.insert_store(Store::new(StoreId(1), UserId(2), "Kitchen"))?;
    storage.insert_product(Product::new(
        ProductId(1),
        StoreId(1),
        "Kettle",
        dec!(10.00),
        10,
    )?)?;
    storage.insert_address(Address::new(AddressId(1), UserId(1), "Home"))?;
    storage.insert_account(Account::new(AccountId(1), UserId(1), "ACC-0001", dec!(100.00))?)?;
    storage.insert_account(Account::new(AccountId(2), UserId(2), "ACC-0002", dec!(50.00))?)?;
    Ok(())
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let storage = MemoryStorage::new();
    seed(&storage).unwrap();

    let state = AppState {
        engine: Arc::new(SettlementEngine::new(storage, SettlementConfig::default())),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    info!("settlement API server running on http://127.0.0.1:3000");
    println!("Endpoints:");
    println!("  POST   /orders              - Place an order");
    println!("  GET    /orders              - List my orders");
    println!("  GET    /orders/:id          - Get order");
    println!("  PUT    /orders/:id          - Update or cancel order");
    println!("  DELETE /orders/:id          - Delete order");
    println!("  POST   /orders/:id/advance  - Ship, deliver or cancel (seller)");
    println!("  POST   /payments            - Pay for an order");
    println!("  GET    /payments            - List my payments");
    println!("  GET    /payments/:id        - Get payment");

    axum::serve(listener, app).await.unwrap();
}
