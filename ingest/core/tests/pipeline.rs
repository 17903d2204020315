//! End-to-end exchange tests: body → session → decoder → sink → store

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use ingest_core::session::{ReaderBody, ResponseBody};
use ingest_core::store::StoreChange;
use ingest_core::{
    ConversationId, ConversationStore, IngestError, MessageId, Part, Result, SessionOptions,
    SessionOutcome, SessionRegistry, StoreSink, StreamEvent, StreamSession, StreamSink,
};

/// Body yielding fixed chunks, then either ending or stalling
struct ChunkedBody {
    chunks: VecDeque<Vec<u8>>,
    stall: bool,
    releases: Arc<AtomicUsize>,
}

impl ChunkedBody {
    fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            stall: false,
            releases: Arc::default(),
        }
    }

    fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }
}

#[async_trait]
impl ResponseBody for ChunkedBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(Some(chunk)),
            None if self.stall => std::future::pending().await,
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

async fn collect(session: &mut StreamSession, body: &mut dyn ResponseBody) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let mut sink = |event: StreamEvent| events.push(event);
    session
        .run(body, &mut sink, SessionOptions::default())
        .await
        .unwrap();
    events
}

const MIXED_STREAM: &str = concat!(
    "f:{\"messageId\":\"m1\"}\n",
    "0:\"héllo \"\n",
    "data: {\"type\":\"text-delta\",\"delta\":\"wörld ✓\"}\n",
    "\n",
    "b:{\"type\":\"tool-input-start\",\"toolCallId\":\"t1\",\"toolName\":\"read\"}\n",
    "data: {\"type\":\"tool-input-delta\",\"toolCallId\":\"t1\",\"inputTextDelta\":\"{\\\"path\\\":\"}\n",
    "data: {\"type\":\"tool-input-delta\",\"toolCallId\":\"t1\",\"inputTextDelta\":\"\\\"a.ts\\\"}\"}\n",
    "data: {\"type\":\"tool-input-end\",\"toolCallId\":\"t1\"}\n",
    "8:[{\"type\":\"data-status\",\"id\":\"s\",\"data\":{\"phase\":\"done\"}}]\n",
    "garbage line\n",
    "d:{\"finishReason\":\"stop\"}\n",
    "data: [DONE]\n",
);

#[tokio::test]
async fn test_scenario_a_raw_text_without_ids() {
    let mut store = ConversationStore::new();
    let mut body = ChunkedBody::new(["0:\"hel\"\n0:\"lo\"\n", "d:{\"finishReason\":\"stop\"}\n"]);
    let releases = body.releases.clone();

    let mut session = StreamSession::for_message(MessageId::from("assistant-1"));
    let outcome = session
        .run(&mut body, &mut StoreSink::new(&mut store), SessionOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Completed);
    assert_eq!(store.message_count(), 1);
    let message = store.get_message(&MessageId::from("assistant-1")).unwrap();
    assert_eq!(message.text(), Some("hello"));

    let finishes: Vec<_> = store
        .activity()
        .entries()
        .filter(|entry| entry.kind == "finish")
        .collect();
    assert_eq!(finishes.len(), 1);
    assert_eq!(finishes[0].data, json!({"reason": "stop"}));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_scenario_b_tool_call_triad() {
    let wire = concat!(
        "data: {\"type\":\"start\",\"messageId\":\"m1\"}\n",
        "data: {\"type\":\"tool-input-start\",\"toolCallId\":\"t1\",\"toolName\":\"read\"}\n",
        "data: {\"type\":\"tool-input-delta\",\"toolCallId\":\"t1\",\"inputTextDelta\":\"{\\\"path\\\":\"}\n",
        "data: {\"type\":\"tool-input-delta\",\"toolCallId\":\"t1\",\"inputTextDelta\":\"\\\"a.ts\\\"}\"}\n",
        "data: {\"type\":\"tool-input-end\",\"toolCallId\":\"t1\"}\n",
        "data: {\"type\":\"finish\",\"finishReason\":\"tool-calls\"}\n",
        "data: [DONE]\n",
    );
    let m1 = MessageId::from("m1");
    let mut store = ConversationStore::new();
    let mut changes = store.subscribe();
    let mut snapshots: Vec<Option<Part>> = Vec::new();

    {
        let mut sink = |event: StreamEvent| {
            StoreSink::new(&mut store).on_event(event);
            let part = store.get_message(&m1).and_then(|m| m.tool_call("t1")).cloned();
            snapshots.push(part);
        };
        let mut body = ChunkedBody::new([wire]);
        StreamSession::new()
            .run(&mut body, &mut sink, SessionOptions::default())
            .await
            .unwrap();
    }

    // start, tool start, 2 deltas, end, finish ([DONE] is deduplicated)
    assert_eq!(snapshots.len(), 6);
    assert_eq!(snapshots[0], None);
    let empty = Part::ToolCall {
        call_id: "t1".to_string(),
        name: "read".to_string(),
        args: json!({}),
    };
    assert_eq!(snapshots[1].as_ref(), Some(&empty));
    assert_eq!(snapshots[3].as_ref(), Some(&empty));
    assert_eq!(
        snapshots[4],
        Some(Part::ToolCall {
            call_id: "t1".to_string(),
            name: "read".to_string(),
            args: json!({"path": "a.ts"}),
        })
    );

    // One insert, one add_tool_call, one update_tool_call, the finish entry
    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push(change);
    }
    let finish = store.activity().entries().next().unwrap().id.clone();
    assert_eq!(
        seen,
        vec![
            StoreChange::MessageAdded(m1.clone()),
            StoreChange::MessageUpdated(m1.clone()),
            StoreChange::MessageUpdated(m1),
            StoreChange::ActivityAppended(finish),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_cancel_mid_stream() {
    let cancel = CancellationToken::new();
    let mut body = ChunkedBody::new(["0:\"partial\"\n", "0:\" more\"\n"]).stalling();
    let releases = body.releases.clone();

    let mut events = Vec::new();
    let trigger = cancel.clone();
    let mut sink = |event: StreamEvent| {
        events.push(event);
        trigger.cancel();
    };

    let outcome = StreamSession::new()
        .run(&mut body, &mut sink, SessionOptions::new(cancel))
        .await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::Cancelled);
    assert_eq!(events.len(), 1);
    assert!(events.iter().all(|event| !event.is_terminal()));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chunk_boundary_invariance_at_every_offset() {
    let bytes = MIXED_STREAM.as_bytes();
    let baseline = collect(
        &mut StreamSession::for_message(MessageId::from("m0")),
        &mut ChunkedBody::new([bytes.to_vec()]),
    )
    .await;

    // Step start, 2 text, tool start/2 deltas/end, data part, one finish
    assert_eq!(baseline.len(), 9);
    assert_eq!(baseline.iter().filter(|e| e.is_terminal()).count(), 1);

    for offset in 0..=bytes.len() {
        let (head, tail) = bytes.split_at(offset);
        let mut body = ChunkedBody::new([head.to_vec(), tail.to_vec()]);
        let events = collect(&mut StreamSession::for_message(MessageId::from("m0")), &mut body).await;
        assert_eq!(events, baseline, "split at byte {offset}");
    }
}

#[tokio::test]
async fn test_single_byte_reads_match_whole_stream() {
    let whole = collect(
        &mut StreamSession::for_message(MessageId::from("m0")),
        &mut ReaderBody::new(MIXED_STREAM.as_bytes()),
    )
    .await;
    let trickled = collect(
        &mut StreamSession::for_message(MessageId::from("m0")),
        &mut ReaderBody::new(MIXED_STREAM.as_bytes()).with_read_size(1),
    )
    .await;
    assert_eq!(trickled, whole);
}

#[tokio::test]
async fn test_reader_error_surfaces_once() {
    let reader = tokio_test::io::Builder::new()
        .read(b"0:\"par\"\n")
        .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
        .build();
    let mut body = ReaderBody::new(reader);
    let mut events = Vec::new();

    let result = StreamSession::for_message(MessageId::from("m0"))
        .run(
            &mut body,
            &mut |e: StreamEvent| events.push(e),
            SessionOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(IngestError::Network(_))));
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], StreamEvent::TextDelta { .. }));
    assert!(matches!(events[1], StreamEvent::Error { .. }));
}

#[tokio::test]
async fn test_mixed_stream_builds_store_state() {
    let mut store = ConversationStore::new();
    let mut body = ChunkedBody::new([MIXED_STREAM]);
    StreamSession::new()
        .run(&mut body, &mut StoreSink::new(&mut store), SessionOptions::default())
        .await
        .unwrap();

    let message = store.get_message(&MessageId::from("m1")).unwrap();
    assert_eq!(message.text(), Some("héllo wörld ✓"));
    assert_eq!(
        message.tool_call("t1"),
        Some(&Part::ToolCall {
            call_id: "t1".to_string(),
            name: "read".to_string(),
            args: json!({"path": "a.ts"}),
        })
    );
    assert!(message.parts.iter().any(|part| matches!(
        part,
        Part::DataPart { kind, part_id: Some(id), data, .. }
            if kind == "data-status" && id == "s" && *data == json!({"phase": "done"})
    )));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_records_finish_once() {
    let mut store = ConversationStore::new();
    let mut body = ChunkedBody::new(["0:\"slow\"\n"]).stalling();
    let releases = body.releases.clone();

    let outcome = StreamSession::for_message(MessageId::from("m0"))
        .run(
            &mut body,
            &mut StoreSink::new(&mut store),
            SessionOptions::default().with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(outcome, SessionOutcome::TimedOut);
    let entries: Vec<_> = store.activity().entries().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, json!({"reason": "timeout"}));
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_registry_supersedes_in_flight_session() {
    let registry = SessionRegistry::new();
    let conversation = ConversationId::from("c1");

    let first = async {
        let ticket = registry.begin(&conversation);
        let mut body = ChunkedBody::new(["0:\"old\"\n"]).stalling();
        let mut events = Vec::new();
        let outcome = StreamSession::new()
            .run(&mut body, &mut |e: StreamEvent| events.push(e), SessionOptions::new(ticket.token()))
            .await
            .unwrap();
        // A superseded ticket must not unregister its successor
        assert!(!registry.finish(&ticket));
        (outcome, events)
    };

    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let ticket = registry.begin(&conversation);
        let mut body = ChunkedBody::new(["0:\"new\"\n"]).stalling();
        let mut events = Vec::new();
        let options = SessionOptions::new(ticket.token()).with_timeout(Duration::from_secs(1));
        let outcome = StreamSession::new()
            .run(&mut body, &mut |e: StreamEvent| events.push(e), options)
            .await
            .unwrap();
        assert!(registry.is_in_flight(&conversation));
        assert!(registry.finish(&ticket));
        (outcome, events)
    };

    let ((first_outcome, first_events), (second_outcome, second_events)) =
        tokio::join!(first, second);

    assert_eq!(first_outcome, SessionOutcome::Cancelled);
    assert!(first_events.iter().all(|e| !e.is_terminal()));
    assert_eq!(second_outcome, SessionOutcome::TimedOut);
    assert_eq!(second_events.last(), Some(&StreamEvent::finish("timeout")));
    assert_eq!(registry.in_flight(), 0);
}

#[tokio::test]
async fn test_idless_reasoning_is_kept_per_message() {
    let first = concat!(
        "data: {\"type\":\"start\",\"messageId\":\"m1\"}\n",
        "data: {\"type\":\"reasoning-start\"}\n",
        "data: {\"type\":\"reasoning-delta\",\"delta\":\"first thoughts\"}\n",
        "data: {\"type\":\"reasoning-end\"}\n",
        "data: {\"type\":\"finish\",\"finishReason\":\"stop\"}\n",
    );
    let second = concat!(
        "data: {\"type\":\"start\",\"messageId\":\"m2\"}\n",
        "data: {\"type\":\"reasoning-start\"}\n",
        "data: {\"type\":\"reasoning-delta\",\"delta\":\"second\"}\n",
    );

    let mut store = ConversationStore::new();
    let mut changes = store.subscribe();
    for wire in [first, second] {
        let mut body = ChunkedBody::new([wire]);
        StreamSession::new()
            .run(&mut body, &mut StoreSink::new(&mut store), SessionOptions::default())
            .await
            .unwrap();
    }

    let m1 = MessageId::from("m1");
    let m2 = MessageId::from("m2");
    let texts = |id: &MessageId| -> Vec<String> {
        store.reasoning().for_message(id).map(|s| s.text.clone()).collect()
    };
    assert_eq!(texts(&m1), vec!["first thoughts".to_string()]);
    assert_eq!(texts(&m2), vec!["second".to_string()]);
    assert_eq!(store.reasoning().len(), 2);

    let mut reasoning_changes = 0;
    let mut finishes = 0;
    while let Ok(change) = changes.try_recv() {
        match change {
            StoreChange::ReasoningUpdated { .. } => reasoning_changes += 1,
            StoreChange::ActivityAppended(_) => finishes += 1,
            _ => {}
        }
    }
    // start/delta/end for m1, start/delta for m2
    assert_eq!(reasoning_changes, 5);
    // Each session ends with exactly one finish entry
    assert_eq!(finishes, 2);
}
