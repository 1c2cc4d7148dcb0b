// proxy 模块 - 请求/响应重写层

pub mod common;
pub mod mappers;
pub mod session_manager;
pub mod signature_cache;

#[cfg(test)]
pub mod tests;

pub use mappers::ReconcileContext;
pub use signature_cache::{SignatureCache, SignatureStore};
