// stdin -> stdout 过滤器: 调和一个请求体 (或一个上游响应) 后输出
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use serde_json::Value;

use antigravity_reconciler_lib::modules::{config, logger};
use antigravity_reconciler_lib::proxy::common::model_mapping::{map_model_alias, ModelFamily};
use antigravity_reconciler_lib::proxy::mappers::gemini::collector::record_response_signatures;
use antigravity_reconciler_lib::proxy::mappers::gemini::wrapper::inject_ids_to_response;
use antigravity_reconciler_lib::proxy::session_manager::SessionManager;
use antigravity_reconciler_lib::{unwrap_response, wrap_request, ReconcileContext, SignatureCache};

const PROJECT_ENV: &str = "ANTIGRAVITY_PROJECT_ID";

fn main() -> Result<()> {
    logger::init_logger();
    let cfg = config::get_config();

    let mode = std::env::args().nth(1).unwrap_or_else(|| "request".to_string());

    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read payload from stdin")?;
    let body: Value = serde_json::from_str(&raw).context("stdin is not valid JSON")?;

    let model = body.get("model").and_then(Value::as_str).unwrap_or_default();
    let mapped_model = map_model_alias(model);
    let family = ModelFamily::detect(&mapped_model);
    let session_id = SessionManager::extract_session_id(&body);
    let store = SignatureCache::global();

    let output = match mode.as_str() {
        "request" => {
            let project_id = body
                .get("project")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| std::env::var(PROJECT_ENV).ok())
                .unwrap_or_default();

            tracing::info!(
                "[Reconciler] model={} -> {} family={} session={}",
                model,
                mapped_model,
                family.as_str(),
                session_id.as_deref().unwrap_or("-")
            );

            let ctx = ReconcileContext::from_config(store, family, cfg)
                .with_session(session_id.as_deref());
            wrap_request(&body, &project_id, &mapped_model, &ctx)
        }
        "response" => {
            let mut response = unwrap_response(&body);
            let recorded = record_response_signatures(&response, session_id.as_deref(), store);
            inject_ids_to_response(&mut response, family);
            tracing::info!("[Reconciler] Response processed, signatures recorded: {}", recorded);
            response
        }
        other => bail!("unknown mode '{}', expected 'request' or 'response'", other),
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &output).context("failed to write payload")?;
    stdout.write_all(b"\n")?;
    Ok(())
}
