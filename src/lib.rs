//! Generic REST controllers for ORM-style models: list, paginate, CRUD, scopes, instance methods
//! and relation traversal, each one a named axum handler over the [`Model`] trait.

pub mod case;
pub mod config;
pub mod controller;
pub mod error;
pub mod migration;
pub mod model;
pub mod pagination;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, load_from_str, resolve, FullConfig, ResolvedEntity, ResolvedModel};
pub use controller::{controller, Controller, InstanceMethod};
pub use error::{AppError, ConfigError};
pub use migration::apply_migrations;
pub use model::{FindOptions, Model, Row};
pub use pagination::{paginate, Pagination};
pub use routes::{common_routes, common_routes_with_ready, controllers, model_routes};
pub use settings::Settings;
pub use state::AppState;
pub use store::{MemoryModel, MemoryStore, PgModel};
