pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod services;
pub mod validation;
pub mod workflows;

pub use error::{ApiError, ApiResult, AppError};

use std::sync::Arc;

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub engine: Arc<workflows::WorkflowEngine>,
}
