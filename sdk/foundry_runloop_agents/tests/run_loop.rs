//! End-to-end tests of the run loop against a mocked Agent Service.

use std::time::Duration;

use foundry_runloop_agents::agent::{AgentCreateRequest, FunctionDefinition};
use foundry_runloop_agents::approval::ApprovalPolicy;
use foundry_runloop_agents::driver::{PollPolicy, RunDriver};
use foundry_runloop_agents::run::{RunCreateRequest, RunStatus};
use foundry_runloop_agents::session;
use foundry_runloop_agents::tools::{FunctionTool, ToolRegistry};
use foundry_runloop_agents::RunLoopError;
use foundry_runloop_core::test_support::mock_client;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const THREAD: &str = "thread_abc";
const RUN: &str = "run_abc";
const RUN_PATH: &str = "/threads/thread_abc/runs/run_abc";

fn run_body(status: &str) -> Value {
    json!({
        "id": RUN,
        "object": "thread.run",
        "created_at": 1700000000,
        "thread_id": THREAD,
        "assistant_id": "asst_xyz",
        "status": status
    })
}

fn function_action(calls: &[(&str, &str)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": "{}"}
            })
        })
        .collect();

    let mut run = run_body("requires_action");
    run["required_action"] = json!({
        "type": "submit_tool_outputs",
        "submit_tool_outputs": {"tool_calls": tool_calls}
    });
    run
}

fn favorite_city_registry() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools
        .register(FunctionTool::new(
            FunctionDefinition {
                name: "getUserFavoriteCity".into(),
                description: Some("Gets the user's favorite city.".into()),
                parameters: None,
            },
            |_| Ok("Seattle, WA".to_string()),
        ))
        .expect("first registration");
    tools
}

fn fast() -> PollPolicy {
    PollPolicy::fixed(Duration::from_millis(5)).with_deadline(Duration::from_secs(5))
}

/// Answer GETs on the run with each body once, in order; the last one repeats.
async fn mount_polls(server: &MockServer, bodies: Vec<Value>) {
    let last = bodies.len().saturating_sub(1);
    for (i, body) in bodies.into_iter().enumerate() {
        let mock = Mock::given(method("GET"))
            .and(path(RUN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body));
        let mock = if i == last { mock } else { mock.up_to_n_times(1) };
        mock.mount(server).await;
    }
}

async fn mount_create(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("queued")))
        .mount(server)
        .await;
}

#[tokio::test]
async fn function_round_submits_favorite_city() {
    let server = MockServer::start().await;
    mount_create(&server).await;
    mount_polls(
        &server,
        vec![
            run_body("in_progress"),
            function_action(&[("call_1", "getUserFavoriteCity")]),
            run_body("in_progress"),
            run_body("completed"),
        ],
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .and(body_json(json!({
            "tool_outputs": [{"tool_call_id": "call_1", "output": "Seattle, WA"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("queued")))
        .expect(1)
        .mount(&server)
        .await;

    let driver = RunDriver::new(mock_client(&server), favorite_city_registry()).with_policy(fast());
    let request = RunCreateRequest::for_agent("asst_xyz").expect("valid request");

    let outcome = driver.execute(THREAD, &request).await.expect("completed");

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(outcome.tool_calls, 1);
}

#[tokio::test]
async fn all_calls_of_a_round_are_submitted_together() {
    let server = MockServer::start().await;
    mount_polls(
        &server,
        vec![
            function_action(&[
                ("call_1", "getUserFavoriteCity"),
                ("call_2", "getUserFavoriteCity"),
            ]),
            run_body("completed"),
        ],
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .and(body_json(json!({
            "tool_outputs": [
                {"tool_call_id": "call_1", "output": "Seattle, WA"},
                {"tool_call_id": "call_2", "output": "Seattle, WA"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("in_progress")))
        .expect(1)
        .mount(&server)
        .await;

    let driver = RunDriver::new(mock_client(&server), favorite_city_registry()).with_policy(fast());
    let run = serde_json::from_value(run_body("queued")).expect("valid run");

    let outcome = driver.drive(run).await.expect("completed");

    assert_eq!(outcome.tool_rounds, 1);
    assert_eq!(outcome.tool_calls, 2);
}

#[tokio::test]
async fn a_submitted_round_is_never_answered_twice() {
    let server = MockServer::start().await;
    mount_polls(
        &server,
        vec![
            function_action(&[("call_1", "getUserFavoriteCity")]),
            function_action(&[("call_2", "getUserFavoriteCity")]),
            run_body("completed"),
        ],
    )
    .await;

    // The service has not caught up yet and still lists call_1.
    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .and(body_json(json!({
            "tool_outputs": [{"tool_call_id": "call_1", "output": "Seattle, WA"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(function_action(&[("call_1", "getUserFavoriteCity")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .and(body_json(json!({
            "tool_outputs": [{"tool_call_id": "call_2", "output": "Seattle, WA"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("in_progress")))
        .expect(1)
        .mount(&server)
        .await;

    let driver = RunDriver::new(mock_client(&server), favorite_city_registry()).with_policy(fast());
    let run = serde_json::from_value(function_action(&[("call_1", "getUserFavoriteCity")]))
        .expect("valid run");

    let outcome = driver.drive(run).await.expect("completed");

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tool_rounds, 2);
    assert_eq!(outcome.tool_calls, 2);
}

#[tokio::test]
async fn unknown_tool_cancels_the_run() {
    let server = MockServer::start().await;
    mount_polls(&server, vec![function_action(&[("call_1", "launchRockets")])]).await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("cancelling")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("queued")))
        .expect(0)
        .mount(&server)
        .await;

    let driver = RunDriver::new(mock_client(&server), favorite_city_registry()).with_policy(fast());
    let run = serde_json::from_value(run_body("queued")).expect("valid run");

    let err = driver.drive(run).await.unwrap_err();

    assert!(matches!(err, RunLoopError::UnknownTool { ref name } if name == "launchRockets"));
}

#[tokio::test]
async fn failed_run_surfaces_remote_error() {
    let server = MockServer::start().await;

    let mut failed = run_body("failed");
    failed["last_error"] = json!({
        "code": "server_error",
        "message": "Sorry, something went wrong."
    });
    mount_polls(&server, vec![run_body("in_progress"), failed]).await;

    let driver = RunDriver::new(mock_client(&server), ToolRegistry::new()).with_policy(fast());
    let run = serde_json::from_value(run_body("queued")).expect("valid run");

    match driver.drive(run).await.unwrap_err() {
        RunLoopError::RunFailed {
            status,
            code,
            message,
        } => {
            assert_eq!(status, RunStatus::Failed);
            assert_eq!(code, "server_error");
            assert_eq!(message, "Sorry, something went wrong.");
        }
        other => panic!("expected RunFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn deadline_cancels_and_times_out() {
    let server = MockServer::start().await;
    mount_polls(&server, vec![run_body("in_progress")]).await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("cancelling")))
        .expect(1)
        .mount(&server)
        .await;

    let policy = PollPolicy::fixed(Duration::from_millis(20)).with_deadline(Duration::from_millis(100));
    let driver = RunDriver::new(mock_client(&server), ToolRegistry::new()).with_policy(policy);
    let run = serde_json::from_value(run_body("queued")).expect("valid run");

    match driver.drive(run).await.unwrap_err() {
        RunLoopError::Timeout {
            elapsed,
            last_status,
        } => {
            assert_eq!(last_status, RunStatus::InProgress);
            assert!(elapsed > Duration::from_millis(80));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn mcp_approvals_follow_policy() {
    let server = MockServer::start().await;

    let mut approval = run_body("requires_action");
    approval["required_action"] = json!({
        "type": "submit_tool_approval",
        "submit_tool_approval": {
            "tool_calls": [
                {"id": "call_a", "type": "mcp", "name": "add", "arguments": "{}", "server_label": "test-mcp"},
                {"id": "call_b", "type": "mcp", "name": "wipe", "arguments": "{}", "server_label": "untrusted"}
            ]
        }
    });
    mount_polls(&server, vec![approval, run_body("completed")]).await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/runs/run_abc/submit_tool_outputs"))
        .and(body_json(json!({
            "tool_approvals": [
                {"tool_call_id": "call_a", "approve": true},
                {"tool_call_id": "call_b", "approve": false}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(run_body("in_progress")))
        .expect(1)
        .mount(&server)
        .await;

    let driver = RunDriver::new(mock_client(&server), ToolRegistry::new())
        .with_policy(fast())
        .with_approvals(ApprovalPolicy::allow_servers(["test-mcp"]));
    let run = serde_json::from_value(run_body("queued")).expect("valid run");

    let outcome = driver.drive(run).await.expect("completed");
    assert_eq!(outcome.tool_calls, 2);
}

#[tokio::test]
async fn scoped_session_asks_and_cleans_up() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/assistants"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "asst_xyz",
            "object": "assistant",
            "created_at": 1700000000,
            "model": "gpt-4o"
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": THREAD,
            "object": "thread",
            "created_at": 1700000000
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/threads/thread_abc/messages"))
        .and(body_json(json!({
            "role": "user",
            "content": "What is my favorite city?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_user",
            "object": "thread.message",
            "created_at": 1700000000,
            "thread_id": THREAD,
            "role": "user",
            "content": [{"type": "text", "text": {"value": "What is my favorite city?"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    mount_create(&server).await;
    mount_polls(&server, vec![run_body("completed")]).await;

    Mock::given(method("GET"))
        .and(path("/threads/thread_abc/messages"))
        .and(query_param("run_id", RUN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{
                "id": "msg_reply",
                "object": "thread.message",
                "created_at": 1700000001,
                "thread_id": THREAD,
                "role": "assistant",
                "run_id": RUN,
                "content": [{"type": "text", "text": {"value": "Seattle, WA", "annotations": []}}]
            }],
            "has_more": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/threads/thread_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": THREAD, "object": "thread.deleted", "deleted": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/assistants/asst_xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "asst_xyz", "object": "assistant.deleted", "deleted": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server);
    let driver = RunDriver::new(client.clone(), favorite_city_registry()).with_policy(fast());
    let request = AgentCreateRequest::builder()
        .model("gpt-4o")
        .tools(driver.tools().definitions())
        .build()
        .expect("valid request");

    let replies = session::scoped(&client, &request, |handle| async move {
        let messages = handle.ask(&driver, "What is my favorite city?").await?;
        Ok::<_, RunLoopError>(messages.assistant_text())
    })
    .await
    .expect("session succeeded");

    assert_eq!(replies, vec!["Seattle, WA"]);
}
