// Gemini mapper 模块
// v1internal 信封与响应侧签名收集

pub mod collector;
pub mod wrapper;

pub use collector::record_response_signatures;
pub use wrapper::{inject_ids_to_response, unwrap_response, wrap_request};
