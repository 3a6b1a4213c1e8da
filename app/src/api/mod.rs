//! JSON endpoints for the POS screens and the back office, plus the live
//! notice stream. Service calls run on the blocking pool since the document
//! store speaks synchronous postgres.

use anyhow::Context as _;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use log::*;
use r2d2::ManageConnection;
use serde::{Deserialize, Serialize};
use tokio::task;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use infra::ids::Id;
use infra::persistence::Storage;

use crate::inventory::{
    CreateInventoryItem, DeleteInventoryItem, GetInventoryItem, InventoryItem, InventoryItemPatch,
    InventorySummary, ListInventory, NeedsRestock, Restock, Summary, UpdateInventoryItem,
};
use crate::menu::{
    CreateMenuItem, DeleteMenuItem, GetMenuItem, ListCategories, ListMenu, ListPosProducts,
    MenuItem, MenuItemPatch, MenuItemStatus, PosProduct, SetMenuItemStatus, UpdateMenuItem,
};
use crate::orders::{
    GetOrder, ListOrders, Order, OrderStatus, PlaceOrder, SetOrderStatus,
};
use crate::services::{Commandable, Queryable};
use crate::stats::{Dashboard, DashboardStats};
use crate::users::{
    Authenticate, CreateUser, DeleteUser, GetUser, ListUsers, SetUserStatus, UpdateUser, User,
    UserPatch, UserStatus, UserView,
};
use crate::Kusina;

mod error;

pub use error::ApiError;

/// Everything the API returns rides in `{"success": true, "data": ...}`;
/// failures come back through [`ApiError`] instead.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    success: bool,
    data: T,
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

#[derive(Debug, Deserialize)]
struct StatusBody<S> {
    status: S,
}

async fn dispatch<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let data = task::spawn_blocking(f).await.context("worker panicked")??;
    Ok(Json(Envelope {
        success: true,
        data,
    }))
}

pub fn routes<M, D>(app: Kusina<M>) -> Router
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/menu",
            get(list_menu::<M, D>).post(create_menu_item::<M, D>),
        )
        .route("/api/menu/categories", get(menu_categories::<M, D>))
        .route(
            "/api/menu/:id",
            get(show_menu_item::<M, D>)
                .put(update_menu_item::<M, D>)
                .delete(delete_menu_item::<M, D>),
        )
        .route("/api/menu/:id/status", put(set_menu_item_status::<M, D>))
        .route("/api/pos/products", get(pos_products::<M, D>))
        .route(
            "/api/inventory",
            get(list_inventory::<M, D>).post(create_inventory_item::<M, D>),
        )
        .route("/api/inventory/needs-restock", get(needs_restock::<M, D>))
        .route("/api/inventory/summary", get(inventory_summary::<M, D>))
        .route(
            "/api/inventory/:id",
            get(show_inventory_item::<M, D>)
                .put(update_inventory_item::<M, D>)
                .delete(delete_inventory_item::<M, D>),
        )
        .route("/api/inventory/:id/restock", post(restock_item::<M, D>))
        .route(
            "/api/orders",
            get(list_orders::<M, D>).post(place_order::<M, D>),
        )
        .route("/api/orders/:id", get(show_order::<M, D>))
        .route("/api/orders/:id/status", put(set_order_status::<M, D>))
        .route(
            "/api/users",
            get(list_users::<M, D>).post(create_user::<M, D>),
        )
        .route(
            "/api/users/:id",
            get(show_user::<M, D>)
                .put(update_user::<M, D>)
                .delete(delete_user::<M, D>),
        )
        .route("/api/users/:id/status", put(set_user_status::<M, D>))
        .route("/api/auth/login", post(login::<M, D>))
        .route("/api/stats/dashboard", get(dashboard::<M, D>))
        .route("/api/admin/events", get(admin_events::<M, D>))
        .with_state(app)
}

async fn health() -> Json<Envelope<&'static str>> {
    Json(Envelope {
        success: true,
        data: "ok",
    })
}

async fn list_menu<M, D>(
    State(app): State<Kusina<M>>,
    Query(req): Query<ListMenu>,
) -> ApiResult<Vec<MenuItem>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().query(req)).await
}

async fn create_menu_item<M, D>(
    State(app): State<Kusina<M>>,
    Json(req): Json<CreateMenuItem>,
) -> ApiResult<MenuItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().execute(req)).await
}

async fn menu_categories<M, D>(State(app): State<Kusina<M>>) -> ApiResult<Vec<String>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().query(ListCategories)).await
}

async fn show_menu_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<MenuItem>>,
) -> ApiResult<MenuItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().query(GetMenuItem { id })).await
}

async fn update_menu_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<MenuItem>>,
    Json(patch): Json<MenuItemPatch>,
) -> ApiResult<MenuItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().execute(UpdateMenuItem { id, patch })).await
}

async fn delete_menu_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<MenuItem>>,
) -> ApiResult<()>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().execute(DeleteMenuItem { id })).await
}

async fn set_menu_item_status<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<MenuItem>>,
    Json(body): Json<StatusBody<MenuItemStatus>>,
) -> ApiResult<MenuItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || {
        app.menu().execute(SetMenuItemStatus {
            id,
            status: body.status,
        })
    })
    .await
}

async fn pos_products<M, D>(State(app): State<Kusina<M>>) -> ApiResult<Vec<PosProduct>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.menu().query(ListPosProducts)).await
}

async fn list_inventory<M, D>(
    State(app): State<Kusina<M>>,
    Query(req): Query<ListInventory>,
) -> ApiResult<Vec<InventoryItem>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().query(req)).await
}

async fn create_inventory_item<M, D>(
    State(app): State<Kusina<M>>,
    Json(req): Json<CreateInventoryItem>,
) -> ApiResult<InventoryItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().execute(req)).await
}

async fn needs_restock<M, D>(State(app): State<Kusina<M>>) -> ApiResult<Vec<InventoryItem>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().query(NeedsRestock)).await
}

async fn inventory_summary<M, D>(State(app): State<Kusina<M>>) -> ApiResult<Summary>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().query(InventorySummary)).await
}

async fn show_inventory_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<InventoryItem>>,
) -> ApiResult<InventoryItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().query(GetInventoryItem { id })).await
}

async fn update_inventory_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<InventoryItem>>,
    Json(patch): Json<InventoryItemPatch>,
) -> ApiResult<InventoryItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().execute(UpdateInventoryItem { id, patch })).await
}

async fn delete_inventory_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<InventoryItem>>,
) -> ApiResult<()>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.inventory().execute(DeleteInventoryItem { id })).await
}

async fn restock_item<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<InventoryItem>>,
    Json(mut req): Json<Restock>,
) -> ApiResult<InventoryItem>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    req.id = id;
    dispatch(move || app.inventory().execute(req)).await
}

async fn list_orders<M, D>(
    State(app): State<Kusina<M>>,
    Query(req): Query<ListOrders>,
) -> ApiResult<Vec<Order>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.orders().query(req)).await
}

async fn place_order<M, D>(
    State(app): State<Kusina<M>>,
    Json(req): Json<PlaceOrder>,
) -> ApiResult<Order>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    debug!("Place order: {:?}", req);
    dispatch(move || app.orders().execute(req)).await
}

async fn show_order<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<Order>>,
) -> ApiResult<Order>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.orders().query(GetOrder { id })).await
}

async fn set_order_status<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<Order>>,
    Json(body): Json<StatusBody<OrderStatus>>,
) -> ApiResult<Order>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || {
        app.orders().execute(SetOrderStatus {
            id,
            status: body.status,
        })
    })
    .await
}

async fn list_users<M, D>(
    State(app): State<Kusina<M>>,
    Query(req): Query<ListUsers>,
) -> ApiResult<Vec<UserView>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().query(req)).await
}

async fn create_user<M, D>(
    State(app): State<Kusina<M>>,
    Json(req): Json<CreateUser>,
) -> ApiResult<UserView>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().execute(req)).await
}

async fn show_user<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<User>>,
) -> ApiResult<UserView>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().query(GetUser { id })).await
}

async fn update_user<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<User>>,
    Json(patch): Json<UserPatch>,
) -> ApiResult<UserView>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().execute(UpdateUser { id, patch })).await
}

async fn delete_user<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<User>>,
) -> ApiResult<()>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().execute(DeleteUser { id })).await
}

async fn set_user_status<M, D>(
    State(app): State<Kusina<M>>,
    Path(id): Path<Id<User>>,
    Json(body): Json<StatusBody<UserStatus>>,
) -> ApiResult<UserView>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || {
        app.users().execute(SetUserStatus {
            id,
            status: body.status,
        })
    })
    .await
}

async fn login<M, D>(
    State(app): State<Kusina<M>>,
    Json(req): Json<Authenticate>,
) -> ApiResult<UserView>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.users().query(req)).await
}

async fn dashboard<M, D>(State(app): State<Kusina<M>>) -> ApiResult<Dashboard>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    dispatch(move || app.stats().query(DashboardStats)).await
}

async fn admin_events<M, D>(
    State(app): State<Kusina<M>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>>
where
    M: ManageConnection<Connection = D>,
    D: Storage + Send + 'static,
{
    let rx = app.events().subscribe();
    debug!("New notice subscriber");
    let stream = tokio_stream::once(crate::events::Notice::connected())
        .chain(BroadcastStream::new(rx).filter_map(|notice| notice.ok()))
        .map(|notice| Event::default().json_data(&notice));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::http::StatusCode;
    use infra::memory::MemoryManager;

    fn app() -> Kusina<MemoryManager> {
        let pool = r2d2::Pool::builder()
            .max_size(2)
            .build(MemoryManager::default())
            .expect("build pool");
        Kusina::new(pool)
    }

    #[test]
    fn builds_a_router_over_the_memory_store() {
        let _router = routes(app());
    }

    #[tokio::test]
    async fn login_authenticates_a_bootstrapped_account() {
        let app = app();
        app.setup().expect("setup");

        let Json(envelope) = login(
            State(app),
            Json(Authenticate {
                username: "admin".to_string(),
                password: "admin123".to_string(),
            }),
        )
        .await
        .expect("login");

        assert!(envelope.success);
        assert_eq!("admin", envelope.data.username);
    }

    #[tokio::test]
    async fn login_rejects_a_bad_password() {
        use axum::response::IntoResponse;

        let app = app();
        app.setup().expect("setup");

        let err = login(
            State(app),
            Json(Authenticate {
                username: "admin".to_string(),
                password: "nope".to_string(),
            }),
        )
        .await
        .expect_err("login should fail");

        assert_eq!(StatusCode::UNAUTHORIZED, err.into_response().status());
    }
}
