//! End-to-end controller tests with an in-memory database and a scripted
//! chat model: new-message runs, event buffering, branching, artifact tool
//! flows, permission interrupts with resume, timeouts, and sanitization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use artifactflow_agent::llm::client::ChatModel;
use artifactflow_agent::llm::types::{ChatOutcome, ChatRequest, StreamChunk};
use artifactflow_agent::{MockChatModel, MockReply};
use artifactflow_engine::{
    ControllerConfig, Event, EventType, ExecutionController, StreamItem, StreamManager,
};
use artifactflow_store::{ArtifactStore, ConversationStore, Database, UpdateType};
use artifactflow_tools::ToolPermission;

struct Harness {
    controller: Arc<ExecutionController>,
    conversations: ConversationStore,
    artifacts: ArtifactStore,
    streams: Arc<StreamManager>,
}

async fn harness(replies: Vec<MockReply>, config: ControllerConfig) -> Harness {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();

    let conversations = ConversationStore::new(db.clone());
    let artifacts = ArtifactStore::new(db);
    let streams = StreamManager::new(Duration::from_secs(30));
    let model = Arc::new(MockChatModel::new(replies));

    let controller = ExecutionController::new(
        conversations.clone(),
        artifacts.clone(),
        model,
        Arc::clone(&streams),
        config,
    );

    Harness {
        controller,
        conversations,
        artifacts,
        streams,
    }
}

fn debug_config() -> ControllerConfig {
    ControllerConfig {
        debug: true,
        ..ControllerConfig::default()
    }
}

/// Drain a run's stream into its events, skipping heartbeats.
async fn drain(streams: &Arc<StreamManager>, run_id: &str) -> Vec<Event> {
    let mut consumer = streams.consume(run_id, Duration::from_secs(5)).unwrap();
    let mut events = Vec::new();
    while let Some(item) = consumer.next().await {
        if let StreamItem::Event(event) = item {
            events.push(event);
        }
    }
    events
}

fn types(events: &[Event]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn simple_reply_streams_and_persists() {
    let h = harness(vec![MockReply::text("Hello there!")], debug_config()).await;

    let run = h.controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&h.controller).drive_new_message(
        run.clone(),
        "hi".into(),
        None,
    ));

    let events = drain(&h.streams, &run.run_id).await;
    driver.await.unwrap();

    // metadata first, terminal complete last, agent lifecycle in between.
    assert_eq!(events.first().unwrap().event_type, EventType::Metadata);
    let meta = events[0].data.as_ref().unwrap();
    assert_eq!(meta["conversation_id"], run.conversation_id.as_str());
    assert_eq!(meta["run_id"], run.run_id.as_str());

    let event_types = types(&events);
    assert!(event_types.contains(&EventType::AgentStart));
    assert!(event_types.contains(&EventType::LlmChunk));
    assert!(event_types.contains(&EventType::AgentComplete));
    assert_eq!(*event_types.last().unwrap(), EventType::Complete);

    // Exactly one terminal event, and it is the last one.
    let terminal_count = event_types.iter().filter(|t| t.is_terminal()).count();
    assert_eq!(terminal_count, 1);

    let complete = events.last().unwrap().data.as_ref().unwrap();
    assert_eq!(complete["interrupted"], false);
    assert_eq!(complete["response"], "Hello there!");
    assert!(complete["execution_metrics"]["llm_calls"].as_u64().unwrap() >= 1);

    // Persistence happened before the terminal event was observable.
    let message = h.conversations.get_message(&run.message_id).await.unwrap();
    assert_eq!(message.response.as_deref(), Some("Hello there!"));

    let conversation = h.conversations.get(&run.conversation_id).await.unwrap();
    assert_eq!(conversation.active_branch.as_deref(), Some(run.message_id.as_str()));
}

#[tokio::test]
async fn late_subscriber_receives_buffered_events() {
    let h = harness(vec![MockReply::text("buffered reply")], debug_config()).await;

    let run = h.controller.start_message(None).await.unwrap();
    // The whole run finishes before anyone attaches.
    Arc::clone(&h.controller)
        .drive_new_message(run.clone(), "hi".into(), None)
        .await;

    let events = drain(&h.streams, &run.run_id).await;
    assert_eq!(events.first().unwrap().event_type, EventType::Metadata);
    assert_eq!(events.last().unwrap().event_type, EventType::Complete);
}

#[tokio::test]
async fn run_survives_consumer_that_never_attaches() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let conversations = ConversationStore::new(db.clone());
    let artifacts = ArtifactStore::new(db);
    // Tight TTL so the buffer is reclaimed mid-run.
    let streams = StreamManager::new(Duration::from_millis(10));
    let model = Arc::new(MockChatModel::new(vec![MockReply::text("persisted anyway")]));
    let controller = ExecutionController::new(
        conversations.clone(),
        artifacts,
        model,
        Arc::clone(&streams),
        debug_config(),
    );

    let run = controller.start_message(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await; // TTL fires
    Arc::clone(&controller)
        .drive_new_message(run.clone(), "hi".into(), None)
        .await;

    // Buffer reclaimed, but the message still got its response.
    assert_eq!(streams.active_count(), 0);
    let message = conversations.get_message(&run.message_id).await.unwrap();
    assert_eq!(message.response.as_deref(), Some("persisted anyway"));
}

#[tokio::test]
async fn branching_keeps_both_paths() {
    let h = harness(
        vec![
            MockReply::text("first answer"),
            MockReply::text("second answer"),
            MockReply::text("branched answer"),
        ],
        debug_config(),
    )
    .await;

    // Turn 1.
    let run1 = h.controller.start_message(None).await.unwrap();
    Arc::clone(&h.controller)
        .drive_new_message(run1.clone(), "first".into(), None)
        .await;
    let conv_id = run1.conversation_id.clone();

    // Turn 2 continues the branch.
    let run2 = h
        .controller
        .start_message(Some(conv_id.clone()))
        .await
        .unwrap();
    Arc::clone(&h.controller)
        .drive_new_message(run2.clone(), "second".into(), None)
        .await;

    // Turn 3 branches off turn 1's message explicitly.
    let run3 = h
        .controller
        .start_message(Some(conv_id.clone()))
        .await
        .unwrap();
    Arc::clone(&h.controller)
        .drive_new_message(run3.clone(), "alt".into(), Some(run1.message_id.clone()))
        .await;

    let conversation = h.conversations.get(&conv_id).await.unwrap();
    assert_eq!(
        conversation.active_branch.as_deref(),
        Some(run3.message_id.as_str())
    );

    // The original path is intact.
    let original: Vec<String> = h
        .conversations
        .path(&conv_id, Some(&run2.message_id))
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(original, vec![run1.message_id.clone(), run2.message_id.clone()]);

    // The active path ends at the branch.
    let branched: Vec<String> = h
        .conversations
        .path(&conv_id, None)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(branched, vec![run1.message_id.clone(), run3.message_id.clone()]);

    // Both children hang off the first message.
    let children = h
        .conversations
        .children(&conv_id, &run1.message_id)
        .await
        .unwrap();
    assert_eq!(children.len(), 2);
}

#[tokio::test]
async fn artifact_create_and_update_via_tools() {
    let h = harness(
        vec![
            MockReply::text(
                "<tool_call><name>create_artifact</name><params>\
                 <id>plan</id>\
                 <content_type>markdown</content_type>\
                 <title><![CDATA[Plan]]></title>\
                 <content><![CDATA[A\nB]]></content>\
                 </params></tool_call>",
            ),
            MockReply::text(
                "<tool_call><name>update_artifact</name><params>\
                 <id>plan</id>\
                 <old_str><![CDATA[A]]></old_str>\
                 <new_str><![CDATA[A']]></new_str>\
                 <lock_version>1</lock_version>\
                 </params></tool_call>",
            ),
            MockReply::text("Plan drafted and refined."),
        ],
        debug_config(),
    )
    .await;

    let run = h.controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&h.controller).drive_new_message(
        run.clone(),
        "make a plan".into(),
        None,
    ));
    let events = drain(&h.streams, &run.run_id).await;
    driver.await.unwrap();

    // Both tool rounds succeeded on-stream.
    let tool_completes: Vec<&Event> = events
        .iter()
        .filter(|e| e.event_type == EventType::ToolComplete)
        .collect();
    assert_eq!(tool_completes.len(), 2);
    for event in &tool_completes {
        assert_eq!(event.data.as_ref().unwrap()["success"], true);
    }

    // Artifact state: content updated, dense versions, v1 retrievable.
    let artifact = h
        .artifacts
        .get(&run.conversation_id, "plan")
        .await
        .unwrap();
    assert_eq!(artifact.content, "A'\nB");
    assert_eq!(artifact.current_version, 2);
    assert_eq!(artifact.lock_version, 2);

    let versions = h
        .artifacts
        .list_versions(&run.conversation_id, "plan")
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].update_type, UpdateType::Create);
    assert_eq!(versions[1].update_type, UpdateType::Update);

    let v1 = h
        .artifacts
        .get_version(&run.conversation_id, "plan", 1)
        .await
        .unwrap();
    assert_eq!(v1.content, "A\nB");
}

#[tokio::test]
async fn stale_lock_is_recoverable_by_the_agent() {
    let h = harness(
        vec![
            MockReply::text(
                "<tool_call><name>create_artifact</name><params>\
                 <id>doc</id><content_type>markdown</content_type>\
                 <title>Doc</title><content>x</content>\
                 </params></tool_call>",
            ),
            // Wrong lock: conflict comes back as a tool error.
            MockReply::text(
                "<tool_call><name>update_artifact</name><params>\
                 <id>doc</id><old_str>x</old_str><new_str>y</new_str>\
                 <lock_version>9</lock_version>\
                 </params></tool_call>",
            ),
            // Retry with the fresh lock succeeds.
            MockReply::text(
                "<tool_call><name>update_artifact</name><params>\
                 <id>doc</id><old_str>x</old_str><new_str>y</new_str>\
                 <lock_version>1</lock_version>\
                 </params></tool_call>",
            ),
            MockReply::text("fixed after conflict"),
        ],
        debug_config(),
    )
    .await;

    let run = h.controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&h.controller).drive_new_message(
        run.clone(),
        "edit the doc".into(),
        None,
    ));
    let events = drain(&h.streams, &run.run_id).await;
    driver.await.unwrap();

    // The conflicting round failed, the run did not.
    let results: Vec<bool> = events
        .iter()
        .filter(|e| e.event_type == EventType::ToolComplete)
        .map(|e| e.data.as_ref().unwrap()["success"] == true)
        .collect();
    assert_eq!(results, vec![true, false, true]);
    assert_eq!(events.last().unwrap().event_type, EventType::Complete);

    let artifact = h.artifacts.get(&run.conversation_id, "doc").await.unwrap();
    assert_eq!(artifact.content, "y");
}

#[tokio::test]
async fn permission_interrupt_then_denied_resume() {
    // web_fetch is raised to confirm level; the lead delegates to the
    // crawl agent, whose fetch then suspends the run.
    let h2 = harness(
        vec![
            MockReply::text(
                "<tool_call><name>call_subagent</name><params>\
                 <agent_type>crawl_agent</agent_type>\
                 <instruction><![CDATA[fetch https://example.com]]></instruction>\
                 </params></tool_call>",
            ),
            MockReply::text(
                "<tool_call><name>web_fetch</name><params>\
                 <url_list><item>https://example.com</item></url_list>\
                 </params></tool_call>",
            ),
            MockReply::text("Could not fetch; reporting without it."),
            MockReply::text("Final: fetch was denied, answered from context."),
        ],
        ControllerConfig {
            debug: true,
            permission_overrides: HashMap::from([(
                "web_fetch".to_string(),
                ToolPermission::Confirm,
            )]),
            ..ControllerConfig::default()
        },
    )
    .await;

    let run = h2.controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&h2.controller).drive_new_message(
        run.clone(),
        "fetch example.com".into(),
        None,
    ));
    let events = drain(&h2.streams, &run.run_id).await;
    driver.await.unwrap();

    // Suspended: permission_request, then complete{interrupted:true}.
    let request = events
        .iter()
        .find(|e| e.event_type == EventType::PermissionRequest)
        .expect("permission_request on stream");
    assert_eq!(request.tool.as_deref(), Some("web_fetch"));
    assert_eq!(request.data.as_ref().unwrap()["permission_level"], "confirm");

    let complete = events.last().unwrap();
    assert_eq!(complete.event_type, EventType::Complete);
    let data = complete.data.as_ref().unwrap();
    assert_eq!(data["interrupted"], true);
    assert_eq!(data["interrupt_type"], "tool_permission");
    assert_eq!(data["interrupt_data"]["tool"], "web_fetch");
    assert!(h2.controller.is_suspended(&run.run_id));

    // Resume with denial.
    h2.controller
        .start_resume(&run.conversation_id, &run.run_id, &run.message_id)
        .await
        .unwrap();
    let driver = tokio::spawn(Arc::clone(&h2.controller).drive_resume(
        run.conversation_id.clone(),
        run.run_id.clone(),
        run.message_id.clone(),
        false,
    ));
    let resume_events = drain(&h2.streams, &run.run_id).await;
    driver.await.unwrap();

    let denial = resume_events
        .iter()
        .find(|e| e.event_type == EventType::ToolComplete)
        .expect("tool_complete for the denial");
    let data = denial.data.as_ref().unwrap();
    assert_eq!(data["success"], false);
    assert_eq!(data["error"], "Permission denied by user");

    // The run continued to a normal completion and persisted its response.
    let complete = resume_events.last().unwrap();
    assert_eq!(complete.event_type, EventType::Complete);
    assert_eq!(complete.data.as_ref().unwrap()["interrupted"], false);

    let message = h2
        .conversations
        .get_message(&run.message_id)
        .await
        .unwrap();
    assert!(message.response.is_some());
    assert!(!h2.controller.is_suspended(&run.run_id));
}

#[tokio::test]
async fn resume_validation_rejects_mismatches() {
    let h = harness(vec![MockReply::text("done")], debug_config()).await;

    let run = h.controller.start_message(None).await.unwrap();
    Arc::clone(&h.controller)
        .drive_new_message(run.clone(), "hi".into(), None)
        .await;

    // Completed run is not suspended.
    let err = h
        .controller
        .start_resume(&run.conversation_id, &run.run_id, &run.message_id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be resumed"));

    // Unknown message.
    assert!(
        h.controller
            .start_resume(&run.conversation_id, &run.run_id, "msg-ghost")
            .await
            .is_err()
    );

    // Mismatched run id.
    assert!(
        h.controller
            .start_resume(&run.conversation_id, "run-other", &run.message_id)
            .await
            .is_err()
    );
}

/// A model that never answers within the test timeout.
struct StallingModel;

#[async_trait]
impl ChatModel for StallingModel {
    async fn stream_chat(
        &self,
        _request: &ChatRequest,
        _on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> artifactflow_agent::Result<ChatOutcome> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ChatOutcome::default())
    }
}

#[tokio::test]
async fn hard_timeout_emits_error_and_persists() {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let conversations = ConversationStore::new(db.clone());
    let artifacts = ArtifactStore::new(db);
    let streams = StreamManager::new(Duration::from_secs(30));
    let controller = ExecutionController::new(
        conversations.clone(),
        artifacts,
        Arc::new(StallingModel),
        Arc::clone(&streams),
        ControllerConfig {
            debug: true,
            stream_timeout: Duration::from_millis(100),
            ..ControllerConfig::default()
        },
    );

    let run = controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&controller).drive_new_message(
        run.clone(),
        "hang forever".into(),
        None,
    ));
    let events = drain(&streams, &run.run_id).await;
    driver.await.unwrap();

    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert!(
        last.data.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("timed out")
    );

    let message = conversations.get_message(&run.message_id).await.unwrap();
    assert!(message.response.as_deref().unwrap().starts_with("Error:"));
}

#[tokio::test]
async fn non_debug_mode_sanitizes_error_details() {
    let h = harness(
        vec![MockReply::error(
            artifactflow_agent::LlmErrorKind::Auth,
            "api key sk-secret was rejected",
        )],
        ControllerConfig::default(), // debug = false
    )
    .await;

    let run = h.controller.start_message(None).await.unwrap();
    let driver = tokio::spawn(Arc::clone(&h.controller).drive_new_message(
        run.clone(),
        "hi".into(),
        None,
    ));
    let events = drain(&h.streams, &run.run_id).await;
    driver.await.unwrap();

    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert_eq!(last.data.as_ref().unwrap()["error"], "Internal server error");
}
