pub mod error;
pub mod models;
pub mod modules;
pub mod proxy;

pub use error::{AppError, AppResult};
pub use models::ReconcilerConfig;
pub use proxy::mappers::gemini::wrapper::{unwrap_response, wrap_request};
pub use proxy::{ReconcileContext, SignatureCache, SignatureStore};
