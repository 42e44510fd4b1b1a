use agrimarket_orderservice::{app_state::AppState, bootstrap, config, db, routes, swagger};
use anyhow::Result;
use axum::Router;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_env();
    bootstrap::init_tracing();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let routes = routes::routes_with_openapi();

    let mut openapi = routes.get_openapi().clone();
    openapi.info = utoipa::openapi::InfoBuilder::new()
        .title("AgriMarket OrderService API")
        .version("1.0.0")
        .build();
    let swagger_ui = swagger::create_swagger_ui(openapi)?;

    tracing::info!("Bootstrapping...");
    let port = config.server.port;
    let db_pool = db::connect(&config.database).await?;
    let state = AppState::build(config, db_pool).await?;

    let app = Router::new()
        .merge(routes)
        .merge(swagger_ui)
        .with_state(state);

    bootstrap::serve("OrderService", app, port).await
}
