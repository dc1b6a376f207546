//! State for routes that talk to the database directly rather than through a `Model`.

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
}
