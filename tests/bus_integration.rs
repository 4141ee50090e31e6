//! Integration tests for the message bus.
//!
//! These tests verify the complete delivery workflow including:
//! - Publish through the queue-draining executor to a sender
//! - Period limits gating repeat sends within a window
//! - Whitelist-only delivery
//! - Auditing of every attempt, sent or not
//! - The priority-lane variant under a consumer loop

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use taskpulse::bus::{
    BusExecutor, Lane, LaneBus, LaneConsumer, MemoryMessageDao, Message, MessageSender,
    PeriodLimit, SendError,
};
use taskpulse::delay_queue::DelayQueue;
use taskpulse::runtime::{RuntimeConfig, TaskRuntime};
use taskpulse::store::MemorySortedSet;
use taskpulse::time::Clock;

const T0: i64 = 1_700_000_000;

// =============================================================================
// Test Helpers
// =============================================================================

/// Sender that records every message it is handed.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<Message>>,
}

impl RecordingSender {
    fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, m: &Message) -> Result<(), SendError> {
        self.sent.lock().push(m.clone());
        Ok(())
    }
}

/// Sender that always fails.
struct BrokenSender;

#[async_trait]
impl MessageSender for BrokenSender {
    async fn send(&self, _m: &Message) -> Result<(), SendError> {
        Err(SendError::new("gateway unreachable"))
    }
}

struct BusHarness {
    clock: Arc<Clock>,
    runtime: TaskRuntime,
    bus: Arc<BusExecutor>,
    dao: Arc<MemoryMessageDao>,
    sender: Arc<RecordingSender>,
}

/// A pinned-clock runtime with one registered bus executor.
fn bus_harness(whitelist: Vec<i64>) -> BusHarness {
    let clock = Arc::new(Clock::new());
    clock.pin(T0);
    let queue = Arc::new(DelayQueue::new(
        Arc::new(MemorySortedSet::new()),
        "dq",
        Arc::clone(&clock),
    ));
    let dao = Arc::new(MemoryMessageDao::new(Arc::clone(&clock)));
    let sender = Arc::new(RecordingSender::default());
    let bus = Arc::new(
        BusExecutor::new(
            "mail",
            queue,
            Arc::clone(&dao) as _,
            Arc::clone(&sender) as _,
            Arc::clone(&clock),
        )
        .with_whitelist(whitelist),
    );

    let runtime = TaskRuntime::with_clock(RuntimeConfig::default(), Arc::clone(&clock));
    runtime.register(Arc::clone(&bus) as _);
    BusHarness {
        clock,
        runtime,
        bus,
        dao,
        sender,
    }
}

/// One busy-poll cycle of virtual time, enough for exactly one sweep.
async fn one_sweep() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

fn daily_message(group: &str) -> Message {
    Message {
        group: group.to_string(),
        period_limit: PeriodLimit::windowed(86_400, 1),
        ..Message::default()
    }
}

// =============================================================================
// Queue-draining executor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn published_message_is_delivered_and_audited() {
    let h = bus_harness(Vec::new());
    h.bus
        .publish(
            7,
            Message {
                group: "notice".to_string(),
                ..Message::default()
            },
            0,
        )
        .await;
    h.runtime.start().await;
    one_sweep().await;

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, 7);

    let records = h.dao.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].sent);
    assert_eq!(records[0].group_id, "notice");
}

#[tokio::test(start_paused = true)]
async fn second_send_in_the_same_window_is_gated_but_audited() {
    let h = bus_harness(Vec::new());
    h.runtime.start().await;

    h.bus.publish(7, daily_message("daily"), 0).await;
    one_sweep().await;
    h.bus.publish(7, daily_message("daily"), 0).await;
    one_sweep().await;

    // Delivered once; both attempts audited.
    assert_eq!(h.sender.sent().len(), 1);
    let records = h.dao.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].sent);
    assert!(!records[1].sent);

    // Next window: the quota is fresh.
    let (_, window_end) = PeriodLimit::windowed(86_400, 1).window(T0);
    h.clock.pin(window_end);
    h.bus.publish(7, daily_message("daily"), 0).await;
    one_sweep().await;

    assert_eq!(h.sender.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn whitelist_only_messages_reach_only_whitelisted_users() {
    let h = bus_harness(vec![7]);
    h.runtime.start().await;

    let restricted = Message {
        group: "beta".to_string(),
        whitelist_only: true,
        ..Message::default()
    };
    h.bus.publish(9, restricted.clone(), 0).await;
    one_sweep().await;
    h.bus.publish(7, restricted, 0).await;
    one_sweep().await;

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, 7);

    // The gated attempt is still audited.
    let records = h.dao.records();
    assert_eq!(records.len(), 2);
    assert!(!records[0].sent);
    assert!(records[1].sent);
}

#[tokio::test(start_paused = true)]
async fn failed_send_is_audited_with_the_error() {
    let clock = Arc::new(Clock::new());
    clock.pin(T0);
    let queue = Arc::new(DelayQueue::new(
        Arc::new(MemorySortedSet::new()),
        "dq",
        Arc::clone(&clock),
    ));
    let dao = Arc::new(MemoryMessageDao::new(Arc::clone(&clock)));
    let bus = Arc::new(BusExecutor::new(
        "mail",
        queue,
        Arc::clone(&dao) as _,
        Arc::new(BrokenSender) as _,
        Arc::clone(&clock),
    ));
    let runtime = TaskRuntime::with_clock(RuntimeConfig::default(), clock);
    runtime.register(Arc::clone(&bus) as _);
    runtime.start().await;

    bus.publish(
        7,
        Message {
            group: "notice".to_string(),
            ..Message::default()
        },
        0,
    )
    .await;
    one_sweep().await;

    let records = dao.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].sent);
}

#[tokio::test(start_paused = true)]
async fn future_message_is_not_delivered_until_due() {
    let h = bus_harness(Vec::new());
    h.runtime.start().await;

    h.bus
        .publish(
            7,
            Message {
                group: "later".to_string(),
                ..Message::default()
            },
            600,
        )
        .await;
    one_sweep().await;
    assert!(h.sender.sent().is_empty());

    // Due time reached on the runtime clock.
    h.clock.pin(T0 + 600);
    one_sweep().await;
    assert_eq!(h.sender.sent().len(), 1);
}

// =============================================================================
// Priority-lane consumer
// =============================================================================

struct LaneHarness {
    clock: Arc<Clock>,
    bus: LaneBus,
    dao: Arc<MemoryMessageDao>,
    sender: Arc<RecordingSender>,
    shutdown: CancellationToken,
    consumer: tokio::task::JoinHandle<()>,
}

fn lane_harness() -> LaneHarness {
    let clock = Arc::new(Clock::new());
    clock.pin(T0);
    let queue = Arc::new(DelayQueue::new(
        Arc::new(MemorySortedSet::new()),
        "dq",
        Arc::clone(&clock),
    ));
    let bus = LaneBus::new("notify", queue);
    let dao = Arc::new(MemoryMessageDao::new(Arc::clone(&clock)));
    let sender = Arc::new(RecordingSender::default());
    let shutdown = CancellationToken::new();

    let consumer = LaneConsumer::new(
        bus.clone(),
        Arc::clone(&dao) as _,
        Arc::clone(&sender) as _,
        Arc::clone(&clock),
    )
    .with_concurrency(1);
    let handle = tokio::spawn(consumer.run(shutdown.clone()));

    LaneHarness {
        clock,
        bus,
        dao,
        sender,
        shutdown,
        consumer: handle,
    }
}

async fn one_poll() {
    tokio::time::sleep(Duration::from_millis(600)).await;
}

#[tokio::test(start_paused = true)]
async fn critical_lane_drains_before_the_low_lane() {
    let h = lane_harness();
    h.bus
        .emit_low(
            8,
            Message {
                group: "digest".to_string(),
                ..Message::default()
            },
            0,
        )
        .await;
    h.bus
        .emit(
            7,
            Message {
                group: "alert".to_string(),
                ..Message::default()
            },
        )
        .await;
    one_poll().await;

    let sent = h.sender.sent();
    assert_eq!(sent.len(), 2);
    // Same cycle, but the critical lane is always drained first.
    assert_eq!(sent[0].group, "alert");
    assert_eq!(sent[1].group, "digest");

    h.shutdown.cancel();
    h.consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn scheduled_emission_waits_for_its_due_time() {
    let h = lane_harness();
    h.bus
        .emit_at(
            7,
            Message {
                group: "reminder".to_string(),
                ..Message::default()
            },
            900,
        )
        .await;
    one_poll().await;
    assert!(h.sender.sent().is_empty());
    assert_eq!(h.bus.backlog().await, 1);

    h.clock.pin(T0 + 900);
    one_poll().await;
    assert_eq!(h.sender.sent().len(), 1);
    assert_eq!(h.bus.backlog().await, 0);

    h.shutdown.cancel();
    h.consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn message_without_user_id_is_audited_as_failed() {
    let h = lane_harness();
    h.bus
        .emit(
            0,
            Message {
                group: "orphan".to_string(),
                ..Message::default()
            },
        )
        .await;
    one_poll().await;

    assert!(h.sender.sent().is_empty());
    let records = h.dao.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].sent);

    h.shutdown.cancel();
    h.consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unparseable_payload_is_dropped_terminally() {
    let clock = Arc::new(Clock::new());
    clock.pin(T0);
    let queue = Arc::new(DelayQueue::new(
        Arc::new(MemorySortedSet::new()),
        "dq",
        Arc::clone(&clock),
    ));
    // Inject garbage straight into the critical lane's queue.
    queue.add("notify:critical", "not json", 0).await;

    let bus = LaneBus::new("notify", Arc::clone(&queue));
    let dao = Arc::new(MemoryMessageDao::new(Arc::clone(&clock)));
    let sender = Arc::new(RecordingSender::default());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(
        LaneConsumer::new(
            bus.clone(),
            Arc::clone(&dao) as _,
            Arc::clone(&sender) as _,
            clock,
        )
        .run(shutdown.clone()),
    );

    tokio::time::sleep(Duration::from_millis(600)).await;

    // Dropped without delivery, audit, or redelivery.
    assert!(sender.sent().is_empty());
    assert!(dao.records().is_empty());
    assert_eq!(bus.backlog().await, 0);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn quota_without_window_length_gates_without_killing_the_consumer() {
    let h = lane_harness();

    // Wire payload with a limit but no period: audited as not sent, and
    // the consumer keeps running.
    let malformed: Message =
        serde_json::from_str(r#"{"group":"broken","period_limit":{"limit":1}}"#).unwrap();
    h.bus.emit(7, malformed).await;
    one_poll().await;

    assert!(h.sender.sent().is_empty());
    let records = h.dao.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].sent);

    // The lanes are still being drained.
    h.bus
        .emit(
            7,
            Message {
                group: "alert".to_string(),
                ..Message::default()
            },
        )
        .await;
    one_poll().await;
    assert_eq!(h.sender.sent().len(), 1);

    h.shutdown.cancel();
    h.consumer.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lane_enum_emits_to_the_chosen_lane() {
    let h = lane_harness();
    h.bus
        .emit_in(
            Lane::Default,
            7,
            Message {
                group: "routine".to_string(),
                ..Message::default()
            },
            0,
        )
        .await;
    one_poll().await;

    assert_eq!(h.sender.sent().len(), 1);

    h.shutdown.cancel();
    h.consumer.await.unwrap();
}
