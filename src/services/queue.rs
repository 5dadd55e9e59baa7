use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Direction};
use tokio::sync::Notify;

const KEY_PREFIX: &str = "media_pipeline";

/// How long a single BLMOVE parks before the consumer loop re-issues it.
const BLOCK_TIMEOUT_SECS: f64 = 5.0;

/// Removes one copy of a payload from the in-flight list and, when asked,
/// pushes it back onto the queue in the same atomic step.
const SETTLE_SCRIPT: &str = r#"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 and ARGV[2] == '1' then
    redis.call('LPUSH', KEYS[2], ARGV[1])
end
return removed
"#;

/// A message handed to a consumer and not yet settled.
#[derive(Debug)]
pub struct Delivery {
    pub queue: String,
    pub payload: Vec<u8>,
    pub tag: u64,
    settled: AtomicBool,
}

impl Delivery {
    pub fn new(queue: impl Into<String>, payload: Vec<u8>, tag: u64) -> Self {
        Self {
            queue: queue.into(),
            payload,
            tag,
            settled: AtomicBool::new(false),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    fn ensure_unsettled(&self) -> Result<(), QueueError> {
        if self.is_settled() {
            return Err(QueueError::AlreadySettled(self.tag));
        }
        Ok(())
    }

    fn mark_settled(&self) {
        self.settled.store(true, Ordering::Release);
    }
}

/// Durable, at-least-once channel between producers and workers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Make sure `queue` is usable by this process.
    async fn declare(&self, queue: &str) -> Result<(), QueueError>;

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Park until one message is available and take it in flight.
    async fn next_delivery(&self, queue: &str) -> Result<Delivery, QueueError>;

    /// Remove a delivery from the queue for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivery, optionally returning it to the back of the queue.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Number of messages waiting (not in flight).
    async fn depth(&self, queue: &str) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed reliable queue.
///
/// Messages wait in `<prefix>:<queue>` and move atomically into a per-consumer
/// in-flight list while a worker holds them, so a crashed worker's messages
/// are recovered the next time it declares the queue.
pub struct RedisQueue {
    client: redis::Client,
    consumer_id: String,
    next_tag: AtomicU64,
    settle_script: redis::Script,
}

impl RedisQueue {
    pub fn new(redis_url: &str, consumer_id: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            consumer_id: consumer_id.into(),
            next_tag: AtomicU64::new(1),
            settle_script: redis::Script::new(SETTLE_SCRIPT),
        })
    }

    fn queue_key(queue: &str) -> String {
        format!("{KEY_PREFIX}:{queue}")
    }

    fn inflight_key(&self, queue: &str) -> String {
        format!("{KEY_PREFIX}:{queue}:inflight:{}", self.consumer_id)
    }

    async fn settle(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        delivery.ensure_unsettled()?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let removed: i64 = self
            .settle_script
            .key(self.inflight_key(&delivery.queue))
            .key(Self::queue_key(&delivery.queue))
            .arg(delivery.payload.as_slice())
            .arg(if requeue { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        delivery.mark_settled();
        if removed == 0 {
            return Err(QueueError::AlreadySettled(delivery.tag));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisQueue {
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        self.health_check().await?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let inflight = self.inflight_key(queue);
        let target = Self::queue_key(queue);

        let mut recovered = 0u64;
        loop {
            let moved: Option<Vec<u8>> = conn
                .lmove(&inflight, &target, Direction::Right, Direction::Right)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }

        if recovered > 0 {
            tracing::warn!(
                queue,
                consumer_id = %self.consumer_id,
                recovered,
                "Returned unsettled deliveries to the queue"
            );
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        conn.lpush::<_, _, ()>(Self::queue_key(queue), payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Delivery, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let source = Self::queue_key(queue);
        let inflight = self.inflight_key(queue);

        loop {
            let payload: Option<Vec<u8>> = conn
                .blmove(
                    &source,
                    &inflight,
                    Direction::Right,
                    Direction::Left,
                    BLOCK_TIMEOUT_SECS,
                )
                .await
                .map_err(QueueError::Redis)?;

            if let Some(payload) = payload {
                let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
                return Ok(Delivery::new(queue, payload, tag));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, false).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.settle(delivery, requeue).await
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        let depth: u64 = conn
            .llen(Self::queue_key(queue))
            .await
            .map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryQueueState {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    inflight: HashMap<u64, Vec<u8>>,
    next_tag: u64,
    acked: u64,
    requeued: u64,
    dropped: Vec<Vec<u8>>,
    fail_publish: bool,
}

/// In-process broker with the same settlement rules as [`RedisQueue`].
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
    available: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `publish` calls fail.
    pub fn fail_publishing(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Take a message without parking.
    pub fn try_next(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state.lock();
        let payload = state.queues.get_mut(queue)?.pop_front()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.inflight.insert(tag, payload.clone());
        Some(Delivery::new(queue, payload, tag))
    }

    pub fn waiting(&self, queue: &str) -> usize {
        self.state.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().inflight.len()
    }

    pub fn acked(&self) -> u64 {
        self.state.lock().acked
    }

    pub fn requeued(&self) -> u64 {
        self.state.lock().requeued
    }

    /// Payloads rejected without requeue.
    pub fn dropped(&self) -> Vec<Vec<u8>> {
        self.state.lock().dropped.clone()
    }

    fn settle(&self, delivery: &Delivery, outcome: Settlement) -> Result<(), QueueError> {
        delivery.ensure_unsettled()?;
        let mut state = self.state.lock();
        let payload = state
            .inflight
            .remove(&delivery.tag)
            .ok_or(QueueError::AlreadySettled(delivery.tag))?;
        delivery.mark_settled();

        match outcome {
            Settlement::Ack => state.acked += 1,
            Settlement::Requeue => {
                state.requeued += 1;
                state
                    .queues
                    .entry(delivery.queue.clone())
                    .or_default()
                    .push_back(payload);
                drop(state);
                self.available.notify_waiters();
            }
            Settlement::Drop => state.dropped.push(payload),
        }
        Ok(())
    }
}

enum Settlement {
    Ack,
    Requeue,
    Drop,
}

#[async_trait]
impl Broker for MemoryQueue {
    async fn declare(&self, queue: &str) -> Result<(), QueueError> {
        self.state
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.fail_publish {
                return Err(QueueError::Unavailable("publishing disabled".to_string()));
            }
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(payload.to_vec());
        }
        self.available.notify_waiters();
        Ok(())
    }

    async fn next_delivery(&self, queue: &str) -> Result<Delivery, QueueError> {
        loop {
            let notified = self.available.notified();
            if let Some(delivery) = self.try_next(queue) {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, Settlement::Ack)
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let outcome = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Drop
        };
        self.settle(delivery, outcome)
    }

    async fn depth(&self, queue: &str) -> Result<u64, QueueError> {
        Ok(self.waiting(queue) as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Delivery {0} was already acknowledged or rejected")]
    AlreadySettled(u64),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ack_removes_message() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"one").await.unwrap();

        let delivery = queue.next_delivery("q").await.unwrap();
        assert_eq!(delivery.payload, b"one");
        assert_eq!(queue.in_flight(), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.waiting("q"), 0);
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn test_double_ack_is_an_error_not_a_crash() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"one").await.unwrap();
        let delivery = queue.next_delivery("q").await.unwrap();

        queue.ack(&delivery).await.unwrap();
        assert!(matches!(
            queue.ack(&delivery).await,
            Err(QueueError::AlreadySettled(_))
        ));
        assert!(matches!(
            queue.nack(&delivery, true).await,
            Err(QueueError::AlreadySettled(_))
        ));
        assert_eq!(queue.acked(), 1);
        assert_eq!(queue.waiting("q"), 0);
    }

    #[tokio::test]
    async fn test_requeue_goes_behind_waiting_messages() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"first").await.unwrap();
        queue.publish("q", b"second").await.unwrap();

        let first = queue.next_delivery("q").await.unwrap();
        queue.nack(&first, true).await.unwrap();

        assert_eq!(queue.next_delivery("q").await.unwrap().payload, b"second");
        assert_eq!(queue.next_delivery("q").await.unwrap().payload, b"first");
        assert_eq!(queue.requeued(), 1);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_drops() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"bad").await.unwrap();
        let delivery = queue.next_delivery("q").await.unwrap();

        queue.nack(&delivery, false).await.unwrap();
        assert_eq!(queue.waiting("q"), 0);
        assert_eq!(queue.dropped(), vec![b"bad".to_vec()]);
    }

    #[tokio::test]
    async fn test_next_delivery_parks_until_publish() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next_delivery("q").await.unwrap().payload }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.publish("q", b"late").await.unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, b"late");
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let queue = MemoryQueue::new();
        queue.publish("a", b"x").await.unwrap();
        assert!(queue.try_next("b").is_none());
        assert_eq!(queue.depth("a").await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires Redis: REDIS_URL=redis://localhost cargo test -- --ignored
    async fn test_redis_reliable_queue() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let consumer = format!("test-{}", uuid::Uuid::new_v4());
        let queue_name = format!("test_queue_{}", uuid::Uuid::new_v4());
        let queue = RedisQueue::new(&url, consumer).unwrap();
        queue.declare(&queue_name).await.unwrap();

        queue.publish(&queue_name, b"payload").await.unwrap();
        let delivery = queue.next_delivery(&queue_name).await.unwrap();
        queue.nack(&delivery, true).await.unwrap();
        assert_eq!(queue.depth(&queue_name).await.unwrap(), 1);

        let again = queue.next_delivery(&queue_name).await.unwrap();
        queue.ack(&again).await.unwrap();
        assert!(queue.ack(&again).await.is_err());
        assert_eq!(queue.depth(&queue_name).await.unwrap(), 0);
    }
}
