//! Signature Cache Concurrency Tests
//! 多会话并发读写签名缓存
//!
//! 测试目标:
//! 1. 并发写入后每个会话都能读回自己的签名
//! 2. 会话之间不串号 (同样的思维文本, 不同的签名)
//! 3. 并发调和请求只信任本会话的签名

#[cfg(test)]
mod signature_concurrency_tests {
    use std::sync::Arc;

    use crate::proxy::common::model_mapping::ModelFamily;
    use crate::proxy::mappers::reconcile::{reconcile_payload, ReconcileContext};
    use crate::proxy::signature_cache::{SignatureCache, SignatureStore};
    use serde_json::json;

    const SESSIONS: usize = 16;
    const ENTRIES_PER_SESSION: usize = 50;

    fn sig_for(session: usize, entry: usize) -> String {
        format!("sig-{:04}-{:04}-{}", session, entry, "x".repeat(64))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_record_and_lookup_isolated_per_session() {
        let store = Arc::new(SignatureCache::with_settings(
            std::time::Duration::from_secs(3600),
            SESSIONS * ENTRIES_PER_SESSION * 2,
        ));

        let mut handles = Vec::new();
        for session in 0..SESSIONS {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let sid = format!("session-{}", session);
                for entry in 0..ENTRIES_PER_SESSION {
                    // Same text in every session
                    let text = format!("plan step {}", entry);
                    store.record(&sid, &text, &sig_for(session, entry));
                    tokio::task::yield_now().await;
                    assert_eq!(store.lookup(&sid, &text), Some(sig_for(session, entry)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), SESSIONS * ENTRIES_PER_SESSION);
        for session in 0..SESSIONS {
            let sid = format!("session-{}", session);
            for entry in 0..ENTRIES_PER_SESSION {
                let text = format!("plan step {}", entry);
                assert_eq!(store.lookup(&sid, &text), Some(sig_for(session, entry)));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconcile_trusts_only_own_session() {
        let store = Arc::new(SignatureCache::new());
        for session in 0..SESSIONS {
            store.record(&format!("session-{}", session), "shared thought", &sig_for(session, 0));
        }

        let mut handles = Vec::new();
        for session in 0..SESSIONS {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let sid = format!("session-{}", session);
                // Each request replays the signature of its neighbour session
                let foreign = sig_for((session + 1) % SESSIONS, 0);
                let own = sig_for(session, 0);
                let mut payload = json!({"contents": [
                    {"role": "user", "parts": [{"text": "go"}]},
                    {"role": "model", "parts": [
                        {"thought": true, "text": "shared thought", "thoughtSignature": own},
                        {"text": "ok"}
                    ]},
                    {"role": "user", "parts": [{"text": "again"}]},
                    {"role": "model", "parts": [
                        {"thought": true, "text": "shared thought", "thoughtSignature": foreign},
                        {"text": "ok"}
                    ]}
                ]});

                let ctx = ReconcileContext::new(store.as_ref(), ModelFamily::Gemini)
                    .with_session(Some(sid.as_str()));
                reconcile_payload(&mut payload, &ctx);

                let contents = payload["contents"].as_array().unwrap();
                assert_eq!(contents[1]["parts"][0]["thoughtSignature"], own);
                assert_eq!(contents[3]["parts"], json!([{"text": "ok"}]));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_session_while_others_write() {
        let store = Arc::new(SignatureCache::new());
        store.record("doomed", "t", &sig_for(99, 0));

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for entry in 0..ENTRIES_PER_SESSION {
                    store.record("survivor", &format!("t{}", entry), &sig_for(1, entry));
                    tokio::task::yield_now().await;
                }
            })
        };
        let deleter = {
            let store = store.clone();
            tokio::spawn(async move { store.delete_session("doomed") })
        };
        writer.await.unwrap();
        deleter.await.unwrap();

        assert_eq!(store.lookup("doomed", "t"), None);
        assert_eq!(store.lookup("survivor", "t0"), Some(sig_for(1, 0)));
        assert_eq!(store.len(), ENTRIES_PER_SESSION);
    }
}
