//! End-to-end scenarios spanning more than one module: admission control,
//! strict priority isolation, critical-write fallback to the emergency
//! buffer followed by a sync pass, and bus request/reply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use evox_core::{
    BackgroundSync, BackgroundSyncConfig, DataIo, DataIoConfig, Intent, Message, MessageBus,
    MessageType, MemoryProvider, Priority, PriorityLimits, Scheduler, SchedulerConfig,
};
use serde_json::json;

fn scheduler_with(limits: PriorityLimits) -> Scheduler {
    Scheduler::new(SchedulerConfig {
        queue_limits: limits,
        concurrency_limits: PriorityLimits { high: 1, medium: 1, low: 1 },
    })
}

#[tokio::test]
async fn admission_rejects_the_third_high_priority_submission() {
    let scheduler = scheduler_with(PriorityLimits { high: 2, medium: 100, low: 100 });
    let blocker = Arc::new(tokio::sync::Notify::new());

    // Occupy the single HIGH worker so the next two submissions sit in the queue.
    let b = blocker.clone();
    let _running = scheduler.submit(Priority::High, None, move || async move { b.notified().await }).unwrap();

    let _queued = scheduler.submit(Priority::High, None, || async move {}).unwrap();
    let rejected = scheduler.submit(Priority::High, None, || async move {});

    assert!(matches!(rejected, Err(e) if e.is_queue_full()));
    assert_eq!(scheduler.stats().high.rejected_total, 1);
    blocker.notify_waiters();
}

#[tokio::test]
async fn high_priority_work_starts_without_waiting_on_low_priority_work() {
    let scheduler = scheduler_with(PriorityLimits { high: 10, medium: 10, low: 10 });
    let start_times = Arc::new(Mutex::new(Vec::new()));

    let low_times = start_times.clone();
    let low = scheduler
        .submit(Priority::Low, None, move || async move {
            low_times.lock().unwrap().push(("low", Instant::now()));
            tokio::time::sleep(Duration::from_millis(40)).await;
        })
        .unwrap();

    let high_times = start_times.clone();
    let high = scheduler
        .submit(Priority::High, None, move || async move {
            high_times.lock().unwrap().push(("high", Instant::now()));
        })
        .unwrap();

    low.wait().await.unwrap();
    high.wait().await.unwrap();

    let recorded = start_times.lock().unwrap();
    let low_start = recorded.iter().find(|(name, _)| *name == "low").unwrap().1;
    let high_start = recorded.iter().find(|(name, _)| *name == "high").unwrap().1;
    assert!(high_start <= low_start + Duration::from_millis(20));
}

#[tokio::test]
async fn critical_write_survives_a_primary_outage_via_emergency_buffer_and_sync() {
    let primary = Arc::new(MemoryProvider::new("primary"));
    primary.set_mock_unhealthy(true);
    let data_io = Arc::new(DataIo::new(primary.clone(), DataIoConfig::default()));

    assert!(data_io.write("k1", &json!("v1"), Intent::Critical).await);
    assert_eq!(data_io.emergency_buffer().list_pending().len(), 1);

    primary.set_mock_unhealthy(false);
    let sync = BackgroundSync::new(data_io.clone(), BackgroundSyncConfig::default());
    sync.run_once().await;

    assert!(data_io.emergency_buffer().list_pending().is_empty());
    let value = data_io.read("k1", Intent::Critical).await;
    assert_eq!(value, Some(json!("v1")));
}

#[tokio::test]
async fn bus_request_response_round_trips_through_a_fresh_reply_topic() {
    let bus = Arc::new(MessageBus::new());
    let responder = bus.clone();
    let responded = Arc::new(AtomicBool::new(false));
    let flag = responded.clone();
    bus.subscribe(
        "increment",
        Arc::new(move |msg: &Message| {
            flag.store(true, Ordering::SeqCst);
            let n = msg.payload.as_i64().unwrap_or(0);
            let reply_to = msg.reply_to.clone().unwrap();
            responder.publish(
                &reply_to,
                json!(n + 1),
                MessageType::Response,
                None,
                msg.correlation_id.clone(),
                None,
                Default::default(),
            );
        }),
    );

    let reply = bus.request_response("increment", json!(41), Duration::from_secs(1), None).await.unwrap();
    assert_eq!(reply, json!(42));
    assert!(responded.load(Ordering::SeqCst));
}
