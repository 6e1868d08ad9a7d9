//! End-to-end tests for the admin API.
//!
//! Each test starts the real router and worker pool on a random port over an
//! in-memory database, with a scripted LLM standing in for the provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use email_ops::api::{self, AppState};
use email_ops::automation::{ActionRegistry, LlmClassifier, Orchestrator};
use email_ops::error::LlmError;
use email_ops::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use email_ops::pipeline::EmailProcessor;
use email_ops::store::{Database, LibSqlBackend};
use email_ops::worker::{AutomationQueue, WorkerDeps, spawn_workers};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Classifies everything as "Quotes", drafts a fixed reply and asks for a
/// single task via function calling.
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = if request.json_mode {
            json!({
                "task_title": "Quote for Jo",
                "task_description": "Price up a boiler replacement",
                "priority": 3,
                "labels": ["quotes", "Not A Label"],
                "reasoning": "Asks for a price",
            })
            .to_string()
        } else {
            "<p>Thanks Jo, a quote is on its way.</p>".to_string()
        };
        Ok(CompletionResponse {
            content,
            input_tokens: 20,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        _request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        Ok(ToolCompletionResponse {
            content: Some("The customer needs a callback.".into()),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "create_task".into(),
                arguments: json!({"title": "Call back Jo", "priority": 4}),
            }],
            input_tokens: 40,
            output_tokens: 12,
            finish_reason: FinishReason::ToolUse,
            response_id: None,
        })
    }
}

/// Start the full service on a random port and return its base URL.
async fn start_server() -> String {
    let store: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
    let registry = Arc::new(ActionRegistry::standard(store.clone(), llm.clone()));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), llm.clone(), registry));
    let processor = Arc::new(EmailProcessor::new(
        store.clone(),
        Arc::new(LlmClassifier::new(llm)),
    ));
    let (queue, rx) = AutomationQueue::new(16);
    spawn_workers(
        2,
        &queue,
        rx,
        WorkerDeps {
            processor,
            orchestrator: orchestrator.clone(),
        },
    );
    let app = api::router(AppState {
        store,
        orchestrator,
        queue,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}")
}

async fn post(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

async fn get(client: &reqwest::Client, url: String) -> (u16, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap_or(Value::Null))
}

/// Account, "Quotes" label in the given mode, and one ingested email.
/// Returns (account_id, label_id, email_id).
async fn seed(client: &reqwest::Client, base: &str, mode: &str) -> (String, String, String) {
    let (status, account) = post(
        client,
        format!("{base}/api/accounts"),
        json!({"provider": "gmail", "email": "ops@plumbing.example"}),
    )
    .await;
    assert_eq!(status, 201);
    let account_id = account["id"].as_str().unwrap().to_string();

    let (_, label) = post(
        client,
        format!("{base}/api/labels"),
        json!({
            "account_id": account_id,
            "name": "Quotes",
            "prompt": "Customer asks for a price",
            "mode": mode,
        }),
    )
    .await;
    let label_id = label["id"].as_str().unwrap().to_string();

    for (name, function) in [("Draft Reply", "draft_reply"), ("Create Task", "create_task")] {
        let (_, action) = post(
            client,
            format!("{base}/api/actions"),
            json!({"account_id": account_id, "name": name, "function": function}),
        )
        .await;
        let (status, _) = post(
            client,
            format!("{base}/api/labels/{label_id}/actions"),
            json!({"action_id": action["id"]}),
        )
        .await;
        assert_eq!(status, 201);
    }

    let (_, email) = post(
        client,
        format!("{base}/api/emails"),
        json!({
            "account_id": account_id,
            "external_message_id": "msg-1",
            "from_address": "jo@customer.example",
            "from_name": "Jo",
            "subject": "Boiler quote",
            "body_html": "<p>Could you quote for a new boiler?</p>",
        }),
    )
    .await;
    let email_id = email["id"].as_str().unwrap().to_string();
    (account_id, label_id, email_id)
}

#[tokio::test]
async fn configuration_round_trips() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let (account_id, label_id, _) = seed(&client, &base, "legacy").await;

        let (status, label) = get(&client, format!("{base}/api/labels/{label_id}")).await;
        assert_eq!(status, 200);
        assert_eq!(label["name"], "Quotes");
        assert_eq!(label["prompt"], "Customer asks for a price");
        assert_eq!(label["mode"], "legacy");

        let (_, linked) = get(&client, format!("{base}/api/labels/{label_id}/actions")).await;
        let orders: Vec<i64> = linked
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["order"].as_i64().unwrap())
            .collect();
        assert_eq!(orders, vec![1, 2]);

        let (status, sop) = post(
            &client,
            format!("{base}/api/sops"),
            json!({
                "account_id": account_id,
                "name": "Pricing",
                "description": "Any quote",
                "instructions": "Quotes are valid for 30 days",
                "priority": 2,
            }),
        )
        .await;
        assert_eq!(status, 201);
        let (_, fetched) = get(&client, format!("{base}/api/sops/{}", sop["id"].as_str().unwrap())).await;
        assert_eq!(fetched, sop);

        let (status, health) = get(&client, format!("{base}/health")).await;
        assert_eq!(status, 200);
        assert_eq!(health["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ai_label_runs_inline() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let (account_id, label_id, email_id) = seed(&client, &base, "ai").await;

        let (status, run) = post(
            &client,
            format!("{base}/api/emails/{email_id}/labels/{label_id}/run"),
            json!({}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(run["state"], "completed");
        assert_eq!(run["mode"], "ai");
        assert_eq!(run["reasoning"], "The customer needs a callback.");
        let results = run["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["function"], "create_task");
        assert_eq!(results[0]["tool_call_id"], "call_1");

        let (_, tasks) = get(&client, format!("{base}/api/tasks?account_id={account_id}")).await;
        let tasks = tasks.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["title"], "Call back Jo");
        assert_eq!(tasks[0]["priority"], 4);

        let (_, drafts) = get(&client, format!("{base}/api/drafts?email_id={email_id}")).await;
        assert!(drafts.as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn processing_applies_labels_and_runs_automation() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = reqwest::Client::new();
        let (_, label_id, email_id) = seed(&client, &base, "legacy").await;

        let (status, body) = post(
            &client,
            format!("{base}/api/emails/{email_id}/process"),
            json!({}),
        )
        .await;
        assert_eq!(status, 202);
        assert_eq!(body["status"], "queued");

        // Workers run in the background; poll until the label run lands.
        let run = loop {
            let (_, runs) = get(&client, format!("{base}/api/runs?email_id={email_id}")).await;
            if let Some(run) = runs.as_array().and_then(|r| r.first())
                && (run["state"] == "completed" || run["state"] == "failed")
            {
                break run.clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(run["label_id"], label_id.as_str());
        assert_eq!(run["state"], "completed");

        let (_, detail) = get(&client, format!("{base}/api/emails/{email_id}")).await;
        let labels: Vec<&str> = detail["labels"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["name"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["Quotes"]);

        let (_, drafts) = get(&client, format!("{base}/api/drafts?email_id={email_id}")).await;
        assert_eq!(drafts.as_array().unwrap().len(), 1);

        // The classifier's task and the create_task action share one row.
        let (_, tasks) = get(&client, format!("{base}/api/tasks?email_id={email_id}")).await;
        let tasks = tasks.as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["title"], "Quote for Jo");
    })
    .await
    .expect("test timed out");
}
