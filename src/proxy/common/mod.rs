// Common 模块 - 公共工具

pub mod json_schema;
pub mod model_mapping;
