//! Priority-ordered publish/subscribe bus with request/reply correlation.
//!
//! Grounded on `evox/core/communication/message_bus.py`'s `MessageBus` and
//! `PriorityMessageQueue`: three internal queues (`high`/`normal`/`low`),
//! one dispatcher that always drains a higher-priority queue completely
//! before touching a lower one, concurrent per-subscriber delivery with
//! per-callback exception isolation, and a `request_response` helper built
//! from a one-shot reply-topic subscription plus a timeout that always
//! unsubscribes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::CoreError;
use crate::intent::{Intent, MessagePriority};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Command,
    Event,
    Query,
    Response,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub topic: String,
    pub payload: Value,
    pub timestamp_millis: i64,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub intent: Option<Intent>,
}

fn now_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// A bus subscriber. Implementations that never `.await` behave like a plain
/// synchronous callback.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message);
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(&Message) + Send + Sync,
{
    async fn handle(&self, message: &Message) {
        (self)(message)
    }
}

struct Subscription {
    subscriber_id: String,
    handler: Arc<dyn MessageHandler>,
}

struct BusStatsInner {
    published: AtomicU64,
    delivered: AtomicU64,
    max_error_log_entries: usize,
    errors: Mutex<VecDeque<String>>,
}

impl BusStatsInner {
    fn new(max_error_log_entries: usize) -> Self {
        Self {
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            max_error_log_entries: max_error_log_entries.max(1),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    fn record_error(&self, detail: String) {
        let mut errors = self.errors.lock().expect("bus stats mutex poisoned");
        if errors.len() >= self.max_error_log_entries {
            errors.pop_front();
        }
        errors.push_back(detail);
    }
}

#[derive(Debug, Clone)]
pub struct BusStats {
    pub published_total: u64,
    pub delivered_total: u64,
    pub recent_errors: Vec<String>,
}

struct Shared {
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
    stats: Arc<BusStatsInner>,
}

/// Three strict-priority queues feeding a single dispatcher task.
pub struct MessageBus {
    high_tx: mpsc::UnboundedSender<Message>,
    normal_tx: mpsc::UnboundedSender<Message>,
    low_tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(crate::config::BusConfig::default())
    }

    pub fn with_config(config: crate::config::BusConfig) -> Self {
        let (high_tx, mut high_rx) = mpsc::unbounded_channel::<Message>();
        let (normal_tx, mut normal_rx) = mpsc::unbounded_channel::<Message>();
        let (low_tx, mut low_rx) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared {
            subscriptions: Mutex::new(HashMap::new()),
            stats: Arc::new(BusStatsInner::new(config.max_error_log_entries)),
        });

        let dispatch_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                if let Ok(msg) = high_rx.try_recv() {
                    deliver(&dispatch_shared, msg).await;
                    continue;
                }
                if let Ok(msg) = normal_rx.try_recv() {
                    deliver(&dispatch_shared, msg).await;
                    continue;
                }
                if let Ok(msg) = low_rx.try_recv() {
                    deliver(&dispatch_shared, msg).await;
                    continue;
                }
                tokio::select! {
                    biased;
                    Some(msg) = high_rx.recv() => deliver(&dispatch_shared, msg).await,
                    Some(msg) = normal_rx.recv() => deliver(&dispatch_shared, msg).await,
                    Some(msg) = low_rx.recv() => deliver(&dispatch_shared, msg).await,
                    else => break,
                }
            }
        });

        Self { high_tx, normal_tx, low_tx, shared }
    }

    pub fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> String {
        let subscriber_id = Uuid::new_v4().to_string();
        self.shared
            .subscriptions
            .lock()
            .expect("bus subscriptions mutex poisoned")
            .entry(topic.to_string())
            .or_default()
            .push(Subscription { subscriber_id: subscriber_id.clone(), handler });
        subscriber_id
    }

    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> bool {
        let mut subs = self.shared.subscriptions.lock().expect("bus subscriptions mutex poisoned");
        match subs.get_mut(topic) {
            Some(list) => {
                let before = list.len();
                list.retain(|s| s.subscriber_id != subscriber_id);
                if list.is_empty() {
                    subs.remove(topic);
                    true
                } else {
                    before != list.len()
                }
            }
            None => false,
        }
    }

    /// Publishes `payload` on `topic`. `intent`, if given, resolves to a
    /// [`MessagePriority`] (via [`Intent::config`]) that selects which of the
    /// three internal queues carries it; pass `None` for `Normal`.
    pub fn publish(
        &self,
        topic: &str,
        payload: Value,
        message_type: MessageType,
        intent: Option<Intent>,
        correlation_id: Option<String>,
        reply_to: Option<String>,
        metadata: HashMap<String, Value>,
    ) -> String {
        let message_priority = intent.map(|i| i.config().message_priority);
        let message = Message {
            id: Uuid::new_v4().to_string(),
            message_type,
            topic: topic.to_string(),
            payload,
            timestamp_millis: now_millis(),
            correlation_id,
            reply_to,
            metadata,
            intent,
        };
        let id = message.id.clone();
        self.shared.stats.published.fetch_add(1, Ordering::Relaxed);

        let sender = match message_priority.unwrap_or(MessagePriority::Normal) {
            MessagePriority::High => &self.high_tx,
            MessagePriority::Normal => &self.normal_tx,
            MessagePriority::Low => &self.low_tx,
        };
        // The dispatcher task only exits once every sender is dropped; a
        // send error here means the bus has been torn down.
        let _ = sender.send(message);
        id
    }

    /// Publishes a query on `topic` and awaits a matching reply on a
    /// freshly allocated reply topic, unsubscribing unconditionally
    /// (success, error, or timeout).
    pub async fn request_response(
        &self,
        topic: &str,
        payload: Value,
        timeout: Duration,
        intent: Option<Intent>,
    ) -> Result<Value, CoreError<std::convert::Infallible>> {
        let reply_topic = format!("__reply__/{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel::<Value>();
        let tx = Mutex::new(Some(tx));

        struct OneShotReplyHandler {
            tx: Mutex<Option<oneshot::Sender<Value>>>,
        }
        #[async_trait]
        impl MessageHandler for OneShotReplyHandler {
            async fn handle(&self, message: &Message) {
                if let Some(tx) = self.tx.lock().expect("oneshot reply handler poisoned").take() {
                    let _ = tx.send(message.payload.clone());
                }
            }
        }

        let handler = Arc::new(OneShotReplyHandler { tx });
        let subscriber_id = self.subscribe(&reply_topic, handler);

        let correlation_id = Uuid::new_v4().to_string();
        self.publish(
            topic,
            payload,
            MessageType::Query,
            intent,
            Some(correlation_id),
            Some(reply_topic.clone()),
            HashMap::new(),
        );

        let result = tokio::time::timeout(timeout, rx).await;
        self.unsubscribe(&reply_topic, &subscriber_id);

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CoreError::Cancelled),
            Err(_) => Err(CoreError::Timeout { elapsed: timeout, timeout }),
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            published_total: self.shared.stats.published.load(Ordering::Relaxed),
            delivered_total: self.shared.stats.delivered.load(Ordering::Relaxed),
            recent_errors: self.shared.stats.errors.lock().expect("bus stats mutex poisoned").iter().cloned().collect(),
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn deliver(shared: &Arc<Shared>, message: Message) {
    let handlers: Vec<Arc<dyn MessageHandler>> = {
        let subs = shared.subscriptions.lock().expect("bus subscriptions mutex poisoned");
        match subs.get(&message.topic) {
            Some(list) => list.iter().map(|s| s.handler.clone()).collect(),
            None => return,
        }
    };
    if handlers.is_empty() {
        return;
    }

    let message = Arc::new(message);
    let mut tasks = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let message = message.clone();
        tasks.push(tokio::spawn(async move { handler.handle(&message).await }));
    }
    for task in tasks {
        match task.await {
            Ok(()) => {
                shared.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                shared.stats.record_error(format!("subscriber callback panicked: {e}"));
            }
        }
    }
}
