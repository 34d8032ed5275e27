//! End-to-end exercises of the JSON-RPC surface in mock mode: no network,
//! synthetic provider and store ids, real SQLite state under a temp dir.

use std::sync::Arc;

use serde_json::{json, Value};

use emissary_core::config::EmissaryConfig;
use emissary_server::app::Services;
use emissary_server::mcp::handle_request;

async fn mock_services(dir: &tempfile::TempDir) -> Arc<Services> {
    let mut config = EmissaryConfig::default();
    config.server.state_path = Some(dir.path().to_string_lossy().into_owned());
    config.dev.adapter_mock = true;
    // Hermetic: never scan the real CLI transcript directories.
    config.follow.transcript_dirs = vec![dir.path().join("transcripts").to_string_lossy().into_owned()];
    Services::init(config).await.unwrap()
}

fn call(name: &str, args: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": name, "arguments": args }
    })
}

fn result_text(response: &Value) -> String {
    response
        .pointer("/result/content/0/text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn initialize_reports_tool_capability() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        json!({ "jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {} }),
    )
    .await
    .unwrap();

    assert_eq!(resp.pointer("/result/serverInfo/name").unwrap(), "emissary");
    assert!(resp.pointer("/result/capabilities/tools").is_some());
}

#[tokio::test]
async fn tools_list_includes_chat_tools_and_alias() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
    )
    .await
    .unwrap();

    let names: Vec<String> = resp
        .pointer("/result/tools")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str().map(str::to_string))
        .collect();
    assert!(names.contains(&"chat_with_gpt4_1".to_string()));
    assert!(names.contains(&"chat_with_gemini_pro".to_string()));
    assert!(names.contains(&"chat_with_grok".to_string()));
    assert!(names.contains(&"search_project_memory".to_string()));
    assert!(names.contains(&"search_project_history".to_string()));
    assert!(names.contains(&"live_follow_session".to_string()));
    assert!(names.contains(&"ping".to_string()));
}

#[tokio::test]
async fn unreadable_image_fails_validation_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        call(
            "chat_with_gpt4_1",
            json!({
                "instructions": "what is this?",
                "session_id": "s-img",
                "images": ["/tmp/definitely-missing-image-4321.png"],
            }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(resp.pointer("/result/isError").unwrap(), true);
    assert!(result_text(&resp).starts_with("VALIDATION_ERROR"));
}

#[tokio::test]
async fn live_follow_without_transcripts_reports_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        call("live_follow_session", json!({ "session_id": "nope" })),
    )
    .await
    .unwrap();
    // Not-found is a readable message, not a tool error.
    assert_eq!(resp.pointer("/result/isError").unwrap(), false);
    assert!(result_text(&resp).contains("No transcript found"));
}

#[tokio::test]
async fn ping_tool_returns_pong() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(&services, call("ping", json!({}))).await.unwrap();
    assert_eq!(result_text(&resp), "pong");
    assert_eq!(resp.pointer("/result/isError").unwrap(), false);
}

#[tokio::test]
async fn chat_without_context_returns_content_and_resp_id() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        call(
            "chat_with_gpt4_1",
            json!({ "instructions": "Say 'Hello World'", "context": [], "session_id": "s1" }),
        ),
    )
    .await
    .unwrap();

    let text = result_text(&resp);
    assert!(!text.is_empty());
    assert_eq!(resp.pointer("/result/isError").unwrap(), false);

    // The mock Responses adapter issued and stored a resp_-prefixed
    // continuation id; no vector store was created for an empty context.
    let stored = services.sessions.get_response_id("s1").await.unwrap().unwrap();
    assert!(stored.starts_with("resp_"));
    assert!(services.store_manager.get_all_for_session("s1").is_empty());
}

#[tokio::test]
async fn small_context_file_is_inlined_and_stays_inline() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let readme = dir.path().join("README.md");
    std::fs::write(&readme, "# Demo\n\nAll about the demo project.\n").unwrap();
    let args = json!({
        "instructions": "Summarize",
        "context": [readme.to_string_lossy()],
        "session_id": "s2",
    });

    let resp = handle_request(&services, call("chat_with_gpt4_1", args.clone()))
        .await
        .unwrap();
    // The mock adapter echoes the head of the prompt; the README landed in
    // the inline channel, not a vector store.
    assert_eq!(resp.pointer("/result/isError").unwrap(), false);
    assert!(services.store_manager.get_all_for_session("s2").is_empty());

    let stable = services.stable_list.get_stable_list("s2").await.unwrap().unwrap();
    assert_eq!(stable, vec![readme.clone()]);

    // Second identical call: stable list unchanged.
    handle_request(&services, call("chat_with_gpt4_1", args))
        .await
        .unwrap();
    let again = services.stable_list.get_stable_list("s2").await.unwrap().unwrap();
    assert_eq!(again, vec![readme]);
}

#[tokio::test]
async fn oversized_context_creates_session_store() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    // o3 has a 200k window; one 4MB file must overflow.
    let big = dir.path().join("big.txt");
    std::fs::write(&big, "z".repeat(4_000_000)).unwrap();
    let small = dir.path().join("small.txt");
    std::fs::write(&small, "tiny").unwrap();

    let resp = handle_request(
        &services,
        call(
            "chat_with_o3",
            json!({
                "instructions": "Dig in",
                "context": [big.to_string_lossy(), small.to_string_lossy()],
                "session_id": "s3",
            }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(resp.pointer("/result/isError").unwrap(), false);

    let stores = services.store_manager.get_all_for_session("s3");
    assert_eq!(stores.len(), 1);
    assert!(stores[0].starts_with("vs_mock_"));

    // The inline channel kept only the small file.
    let stable = services.stable_list.get_stable_list("s3").await.unwrap().unwrap();
    assert_eq!(stable, vec![small]);
}

#[tokio::test]
async fn priority_overflow_is_a_budget_error() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let huge = dir.path().join("huge.txt");
    std::fs::write(&huge, "y".repeat(4_000_000)).unwrap();

    let resp = handle_request(
        &services,
        call(
            "chat_with_o3",
            json!({
                "instructions": "x",
                "priority_context": [huge.to_string_lossy()],
                "session_id": "s4",
            }),
        ),
    )
    .await
    .unwrap();

    assert_eq!(resp.pointer("/result/isError").unwrap(), true);
    assert!(result_text(&resp).starts_with("BUDGET_EXCEEDED"));
    // The failure happened before any vector store was created.
    assert!(services.store_manager.get_all_for_session("s4").is_empty());
}

#[tokio::test]
async fn missing_required_argument_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        call("chat_with_gpt4_1", json!({ "instructions": "no session" })),
    )
    .await
    .unwrap();
    assert_eq!(resp.pointer("/result/isError").unwrap(), true);
    assert!(result_text(&resp).starts_with("VALIDATION_ERROR"));
}

#[tokio::test]
async fn unknown_tool_is_reported_without_crashing() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(&services, call("definitely_not_a_tool", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.pointer("/result/isError").unwrap(), true);
    assert!(result_text(&resp).contains("Unknown tool"));
}

#[tokio::test]
async fn unknown_method_is_a_method_not_found_error() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        json!({ "jsonrpc": "2.0", "id": 9, "method": "bogus/method" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.pointer("/error/code").unwrap(), -32601);
}

#[tokio::test]
async fn notifications_get_no_response() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    let resp = handle_request(
        &services,
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
    )
    .await;
    assert!(resp.is_none());
}

#[tokio::test]
async fn gemini_mock_round_trip_keeps_history() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    for _ in 0..2 {
        let resp = handle_request(
            &services,
            call(
                "chat_with_gemini_pro",
                json!({ "instructions": "hello", "session_id": "g1" }),
            ),
        )
        .await
        .unwrap();
        assert_eq!(resp.pointer("/result/isError").unwrap(), false);
    }

    let history = services.sessions.get_gemini_history("g1").await.unwrap().unwrap();
    // Two turns of user+model each.
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn cancelled_error_yields_empty_content_block() {
    let dir = tempfile::tempdir().unwrap();
    let services = mock_services(&dir).await;

    // Drive the executor boundary directly: a cancel mid-flight surfaces as
    // an empty-content success at the transport.
    let ops = Arc::clone(&services.ops);
    let run = tokio::spawn({
        let ops = Arc::clone(&ops);
        async move {
            ops.run_with_timeout(
                "chat_with_gpt4_1-test".into(),
                std::time::Duration::from_secs(60),
                async {
                    tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                    Ok(String::new())
                },
            )
            .await
        }
    });
    for _ in 0..100 {
        if ops.active_count() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    ops.cancel_all_operations();
    let result = run.await.unwrap();
    assert!(matches!(result, Err(emissary_core::EmissaryError::Cancelled)));

    // And the server still answers new calls afterwards.
    let resp = handle_request(&services, call("ping", json!({}))).await.unwrap();
    assert_eq!(result_text(&resp), "pong");
}
