// Gemini v1internal 包装/解包
use serde_json::{json, Value};

use crate::proxy::common::json_schema::clean_tool_declarations;
use crate::proxy::common::model_mapping::ModelFamily;
use crate::proxy::mappers::common_utils::deep_clean_undefined;
use crate::proxy::mappers::reconcile::{reconcile_payload, ReconcileContext};

/// 包装请求体为 v1internal 格式
///
/// The inner request is cleaned, reconciled (thinking, then tool pairing)
/// and its tool schemas simplified before it is enveloped.
pub fn wrap_request(
    body: &Value,
    project_id: &str,
    mapped_model: &str,
    ctx: &ReconcileContext<'_>,
) -> Value {
    // 优先使用传入的 mapped_model，其次尝试从 body 获取
    let original_model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(mapped_model);
    let final_model_name = if !mapped_model.is_empty() {
        mapped_model
    } else {
        original_model
    };

    let mut inner_request = body.clone();

    // 深度清理 [undefined] 字符串 (Cherry Studio 等客户端常见注入)
    deep_clean_undefined(&mut inner_request);

    let summary = reconcile_payload(&mut inner_request, ctx);
    for warning in summary.warnings() {
        tracing::warn!("[Gemini-Wrap] Pairing recovery: {}", warning);
    }

    let cleaned = clean_tool_declarations(&mut inner_request);

    if let Some(obj) = inner_request.as_object_mut() {
        obj.remove("model");
        if let Some(sid) = ctx.session_id {
            obj.insert("sessionId".to_string(), json!(sid));
        }
    }

    tracing::debug!(
        "[Gemini-Wrap] original='{}', final='{}', family={}, conversations={}, schemas_cleaned={}",
        original_model,
        final_model_name,
        ctx.family.as_str(),
        summary.conversations,
        cleaned
    );

    json!({
        "project": project_id,
        "requestId": format!("agent-{}", uuid::Uuid::new_v4()),
        "request": inner_request,
        "model": final_model_name,
        "userAgent": "antigravity",
        "requestType": "agent"
    })
}

/// 解包响应（提取 response 字段）
pub fn unwrap_response(response: &Value) -> Value {
    response.get("response").unwrap_or(response).clone()
}

/// 为 Claude 模型的 Gemini 响应自动注入 Tool ID
///
/// Clients echo the ids back next turn, which keeps the pairing pass on the
/// exact-id path instead of name recovery.
pub fn inject_ids_to_response(response: &mut Value, family: ModelFamily) {
    if !family.is_signature_strict() {
        return;
    }

    let Some(candidates) = response.get_mut("candidates").and_then(Value::as_array_mut) else {
        return;
    };
    for candidate in candidates {
        let Some(parts) = candidate
            .pointer_mut("/content/parts")
            .and_then(Value::as_array_mut)
        else {
            continue;
        };

        let mut name_counters: std::collections::HashMap<String, usize> =
            std::collections::HashMap::new();
        for part in parts {
            let Some(fc) = part.get_mut("functionCall").and_then(Value::as_object_mut) else {
                continue;
            };
            if fc.get("id").is_some() {
                continue;
            }
            let name = fc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let count = name_counters.entry(name.clone()).or_insert(0);
            *count += 1;
            let call_id = format!("call_{}_{}", name, count);
            tracing::debug!("[Gemini-Wrap] Response stage: Injected call_id '{}'", call_id);
            fc.insert("id".to_string(), json!(call_id));
        }
    }
}
