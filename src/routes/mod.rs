pub mod admin;
pub mod carts;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shipping;

use utoipa_axum::router::OpenApiRouter;

use crate::app_state::AppState;

/// Every HTTP route the service exposes, with its OpenAPI description.
pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    orders::routes_with_openapi()
        .merge(carts::routes_with_openapi())
        .merge(payments::routes_with_openapi())
        .merge(shipping::routes_with_openapi())
        .merge(notifications::routes_with_openapi())
        .merge(admin::routes_with_openapi())
}
