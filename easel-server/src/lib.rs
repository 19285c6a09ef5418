pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{DeliveryMode, ServerArgs};
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
