pub mod error;
pub mod github;
pub mod handlers;
pub mod keep_alive;
pub mod observability;
pub mod router;
pub mod state;
pub mod types;

pub use error::AppError;
pub use state::{AppState, build_state};

#[cfg(test)]
pub(crate) mod test_support;
