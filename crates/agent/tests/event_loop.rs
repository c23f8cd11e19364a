//! End-to-end tests of the agent event loop.
//!
//! Every test drives a real [`Agent`] against a scripted model, so the whole
//! pipeline runs: streaming assembly, retry, tool execution, history
//! management and metrics.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Recorder, agent, echo};
use serde_json::{Value, json};
use tendril_agent::{FunctionTool, RetryPolicy, SlidingWindowConversationManager, ToolOutput};
use tendril_core::error::{Error, ModelError, ToolError};
use tendril_core::event::AgentEvent;
use tendril_core::message::{ContentBlock, Role, ToolUse};
use tendril_core::model::{ContentDelta, StopReason, StreamEvent, ToolUseStart};
use tendril_providers::{ScriptStep, ScriptedModel};

// ── Plain answers ────────────────────────────────────────────────────────

#[tokio::test]
async fn text_answer_takes_one_cycle() {
    let model = Arc::new(ScriptedModel::new().then_text("Hello"));
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).build().unwrap();

    let result = agent.call("Hi").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::EndTurn);
    assert_eq!(result.text(), "Hello");
    assert_eq!(result.metrics.cycles, 1);
    assert_eq!(result.metrics.usage.total_tokens, 15);
    assert_eq!(agent.messages().len(), 2);
    assert_eq!(agent.messages()[1].role, Role::Assistant);

    let types = recorder.types();
    assert_eq!(types[0], "init_event_loop");
    assert_eq!(types[1], "cycle_start");
    assert!(types.contains(&"text_delta"));
    assert_eq!(types.last(), Some(&"message"));
}

#[tokio::test]
async fn system_prompt_and_tool_specs_reach_the_model() {
    let model = Arc::new(ScriptedModel::new().then_text("ok"));
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder)
        .system_prompt("Be brief.")
        .tool(echo())
        .build()
        .unwrap();

    agent.call("Hi").await.unwrap();

    let request = &model.requests()[0];
    assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
    assert_eq!(request.tool_specs.len(), 1);
    assert_eq!(request.tool_specs[0].name, "echo");
    assert_eq!(request.messages.len(), 1);
}

// ── Tool use ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_result_feeds_the_next_cycle() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_use("t1", "echo", json!({"x": 1}))
            .then_text("done"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).tool(echo()).build().unwrap();

    let result = agent.call("echo this").await.unwrap();

    assert_eq!(result.text(), "done");
    assert_eq!(result.metrics.cycles, 2);
    assert_eq!(result.metrics.tool_executions, 1);
    assert_eq!(result.metrics.tool_metrics["echo"].success_count, 1);

    // prompt, tool use, tool result, answer
    let messages = agent.messages();
    assert_eq!(messages.len(), 4);
    let ContentBlock::ToolResult(tool_result) = &messages[2].content[0] else {
        panic!("Expected a tool result turn, got {:?}", messages[2]);
    };
    assert_eq!(tool_result.tool_use_id, "t1");
    assert!(!tool_result.is_error());
    let parsed: Value = serde_json::from_str(&tool_result.text()).unwrap();
    assert_eq!(parsed, json!({"x": 1}));

    // The second request carries the result back to the model.
    assert_eq!(model.requests()[1].messages.len(), 3);
    assert_eq!(recorder.count("tool_execution_start"), 1);
    assert_eq!(recorder.count("tool_execution_complete"), 1);
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_use("t1", "missing", json!({}))
            .then_text("sorry"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).tool(echo()).build().unwrap();

    let result = agent.call("use a tool").await.unwrap();

    assert_eq!(result.text(), "sorry");
    let ContentBlock::ToolResult(tool_result) = &agent.messages()[2].content[0] else {
        panic!("Expected a tool result turn");
    };
    assert!(tool_result.is_error());
    assert!(tool_result.text().contains("missing"));
}

#[tokio::test]
async fn failing_tool_is_contained() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_uses(&[
                ToolUse::new("a", "boom", json!({})),
                ToolUse::new("b", "echo", json!({"ok": true})),
            ])
            .then_text("recovered"),
    );
    let recorder = Arc::new(Recorder::default());
    let boom = FunctionTool::new("boom", "Fails", |_input: Value| async {
        Err::<ToolOutput, _>(ToolError::InvalidArguments("bad".into()))
    });
    let mut agent = agent(&model, &recorder)
        .tool(Arc::new(boom))
        .tool(echo())
        .build()
        .unwrap();

    let result = agent.call("go").await.unwrap();

    assert_eq!(result.text(), "recovered");
    let results = &agent.messages()[2].content;
    assert_eq!(results.len(), 2);
    match (&results[0], &results[1]) {
        (ContentBlock::ToolResult(a), ContentBlock::ToolResult(b)) => {
            assert_eq!(a.tool_use_id, "a");
            assert!(a.is_error());
            assert_eq!(b.tool_use_id, "b");
            assert!(!b.is_error());
        }
        other => panic!("Expected two tool results, got {other:?}"),
    }
    assert_eq!(result.metrics.tool_metrics["boom"].error_count, 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_tools_keep_request_order() {
    let slow = FunctionTool::new("wait", "Sleeps", |input: Value| async move {
        let ms = input["ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, ToolError>(ToolOutput::from(format!("waited {ms}")))
    });
    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_uses(&[
                ToolUse::new("first", "wait", json!({"ms": 300})),
                ToolUse::new("second", "wait", json!({"ms": 100})),
                ToolUse::new("third", "wait", json!({"ms": 200})),
            ])
            .then_text("all done"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder)
        .tool(Arc::new(slow))
        .max_parallel_tools(3)
        .build()
        .unwrap();

    let started = tokio::time::Instant::now();
    agent.call("go").await.unwrap();

    // Run together, the three sleeps overlap.
    assert!(started.elapsed() < Duration::from_millis(600));
    let ids: Vec<String> = agent.messages()[2]
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult(r) => Some(r.tool_use_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, ["first", "second", "third"]);
}

#[tokio::test]
async fn tool_can_stop_the_loop() {
    // Function tools cannot see the request state.
    struct Halt;

    #[async_trait::async_trait]
    impl tendril_core::tool::Tool for Halt {
        fn name(&self) -> &str {
            "halt"
        }
        fn description(&self) -> &str {
            "Stops the loop"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn invoke(
            &self,
            tool_use: &ToolUse,
            ctx: &tendril_core::tool::ToolContext<'_>,
        ) -> Result<tendril_core::message::ToolResult, ToolError> {
            ctx.request_state.request_stop();
            Ok(tendril_core::message::ToolResult::success(&tool_use.id, "halted"))
        }
    }

    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_use("t1", "halt", json!({}))
            .then_text("never reached"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder)
        .tool(Arc::new(Halt))
        .build()
        .unwrap();

    let result = agent.call("go").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::ToolUse);
    assert!(result.request_state.should_stop());
    assert_eq!(model.call_count(), 1);
    assert_eq!(model.remaining(), 1);
}

// ── Throttling ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn throttled_requests_back_off_exponentially() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_error(ModelError::Throttled("slow down".into()))
            .then_error(ModelError::Throttled("slow down".into()))
            .then_text("finally"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).build().unwrap();

    let started = tokio::time::Instant::now();
    let result = agent.call("Hi").await.unwrap();

    assert_eq!(result.text(), "finally");
    assert_eq!(model.call_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(12_000));

    let throttles: Vec<(u32, u64)> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::Throttled {
                attempt,
                retry_in_ms,
                ..
            } => Some((attempt, retry_in_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(throttles, [(1, 4000), (2, 8000)]);
}

#[tokio::test(start_paused = true)]
async fn throttling_gives_up_after_max_attempts() {
    let model = Arc::new(ScriptedModel::new());
    for _ in 0..3 {
        model.push(ScriptStep::Fail(ModelError::Throttled("slow down".into())));
    }
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder)
        .retry_policy(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
        })
        .build()
        .unwrap();

    let err = agent.call("Hi").await.unwrap_err();

    assert!(matches!(err, Error::Model(ModelError::Throttled(_))));
    assert_eq!(model.call_count(), 3);
    assert_eq!(recorder.count("throttled"), 2);
}

// ── Failures ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn failure_after_tools_carries_request_state() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_tool_use("t1", "echo", json!({}))
            .then_error(ModelError::Api {
                status_code: 500,
                message: "internal".into(),
            }),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).tool(echo()).build().unwrap();

    let err = agent.call("go").await.unwrap_err();

    assert!(err.request_state().is_some());
    assert_eq!(recorder.count("force_stop"), 1);
    // The tool exchange stays in history.
    assert_eq!(agent.messages().len(), 3);
}

#[tokio::test]
async fn interrupted_stream_is_reported() {
    let model = Arc::new(ScriptedModel::new().then_partial(
        vec![
            StreamEvent::MessageStart {
                role: Role::Assistant,
            },
            StreamEvent::ContentBlockStart { tool_use: None },
        ],
        ModelError::StreamInterrupted("connection reset".into()),
    ));
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).build().unwrap();

    let err = agent.call("Hi").await.unwrap_err();

    assert!(matches!(err, Error::Model(ModelError::StreamInterrupted(_))));
    assert_eq!(agent.messages().len(), 1);
}

#[tokio::test]
async fn truncated_tool_use_is_dropped_on_the_next_call() {
    let truncated = vec![
        StreamEvent::MessageStart {
            role: Role::Assistant,
        },
        StreamEvent::ContentBlockStart {
            tool_use: Some(ToolUseStart {
                tool_use_id: "t1".into(),
                name: "echo".into(),
            }),
        },
        StreamEvent::ContentBlockDelta {
            delta: ContentDelta::ToolUseInput("{\"x\":".into()),
        },
        StreamEvent::MessageStop {
            stop_reason: StopReason::MaxTokens,
        },
    ];
    let model = Arc::new(ScriptedModel::new().then_events(truncated).then_text("ok"));
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder).tool(echo()).build().unwrap();

    let result = agent.call("Hi").await.unwrap();

    assert_eq!(result.stop_reason, StopReason::MaxTokens);
    let tool_uses = result.tool_uses();
    assert_eq!(tool_uses.len(), 1);
    assert_eq!(tool_uses[0].id, "t1");
    assert!(tool_uses[0].input.is_null());
    assert_eq!(result.metrics.tool_executions, 0);

    // The next call drops the truncated turn before sending history.
    agent.call("again").await.unwrap();
    let second = &model.requests()[1].messages;
    let texts: Vec<String> = second.iter().map(|m| m.text()).collect();
    assert_eq!(texts, ["Hi", "again"]);
    assert!(agent.messages().iter().all(|m| m.tool_uses().is_empty()));
}

// ── History management ───────────────────────────────────────────────────

#[tokio::test]
async fn window_trims_after_each_call() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_text("one")
            .then_text("two")
            .then_text("three"),
    );
    let recorder = Arc::new(Recorder::default());
    let mut agent = agent(&model, &recorder)
        .conversation_manager(SlidingWindowConversationManager::new(4))
        .build()
        .unwrap();

    for prompt in ["a", "b", "c"] {
        agent.call(prompt).await.unwrap();
    }

    let texts: Vec<String> = agent.messages().iter().map(|m| m.text()).collect();
    assert_eq!(texts, ["b", "two", "c", "three"]);
    assert_eq!(agent.metrics().cycles, 3);
}

#[tokio::test]
async fn overflow_relief_keeps_the_first_turn() {
    let model = Arc::new(
        ScriptedModel::new()
            .then_error(ModelError::ContextWindowOverflow("too long".into()))
            .then_text("fits"),
    );
    let recorder = Arc::new(Recorder::default());
    let history = (0..11)
        .map(|i| tendril_core::message::Message::user(format!("turn {i}")))
        .collect();
    let mut agent = agent(&model, &recorder).messages(history).build().unwrap();

    agent.call("latest").await.unwrap();

    // 12 turns, the earliest quarter after turn 0 dropped.
    let retried = &model.requests()[1].messages;
    assert_eq!(retried.len(), 9);
    assert_eq!(retried[0].text(), "turn 0");
    assert_eq!(retried[1].text(), "turn 4");
    assert_eq!(retried.last().map(|m| m.text()), Some("latest".to_string()));
}
