pub mod account;
pub mod account_logging;
pub mod auth;
pub mod callback;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod identity;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod model_income;
pub mod repo_income;
pub mod session;
pub mod state;
pub mod store;
pub mod time;

pub use error::{AppError, AppResult};
pub use logging::init_logging;
