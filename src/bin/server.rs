//! Serves every model from `MODELS_PATH` over PostgreSQL under `/api/v1/<path_segment>`.

use model_ctrl::{
    apply_migrations, common_routes_with_ready, controllers, load_from_path, model_routes, resolve, AppState,
    PgModel, Settings,
};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("model_ctrl=info".parse()?))
        .init();

    let settings = Settings::from_env()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .connect(&settings.database_url)
        .await?;

    let config = load_from_path(&settings.models_path).await?;
    let model = resolve(&config)?;
    if settings.sync_schema {
        apply_migrations(&pool, &model).await?;
    }
    tracing::info!(models = model.entities.len(), "models resolved");

    let api = model_routes(controllers(PgModel::all(&pool, &model)))?;
    let state = AppState { pool };
    let app = Router::new()
        .merge(common_routes_with_ready(state))
        .nest("/api/v1", api)
        .layer(RequestBodyLimitLayer::new(settings.body_limit_bytes));

    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
