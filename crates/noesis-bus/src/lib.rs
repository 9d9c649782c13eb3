use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const CHANNEL_CAPACITY: usize = 256;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// One of the three fan-out streams (§4.9, §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Thoughts,
    Tasks,
    Timeline,
}

/// A message published on a stream. `Heartbeat` is emitted periodically so idle
/// subscribers can detect liveness (§4.9); it is never ordered against `Payload`
/// messages across streams, matching "no ordering is required across streams".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    Heartbeat,
    Payload(serde_json::Value),
}

/// Fan-out hub for `thoughts`/`tasks`/`timeline` (C9). Each stream is an independent
/// `tokio::sync::broadcast` channel — any number of subscribers receive every
/// published message; the bus retains no history, so a late subscriber only sees
/// messages published after it subscribed (§5 "the event bus retains no history").
pub struct EventBus {
    thoughts: broadcast::Sender<BusMessage>,
    tasks: broadcast::Sender<BusMessage>,
    timeline: broadcast::Sender<BusMessage>,
    heartbeat_handle: JoinHandle<()>,
}

impl EventBus {
    pub fn new() -> Self {
        let (thoughts, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (tasks, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (timeline, _) = broadcast::channel(CHANNEL_CAPACITY);

        let hb_thoughts = thoughts.clone();
        let hb_tasks = tasks.clone();
        let hb_timeline = timeline.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                let _ = hb_thoughts.send(BusMessage::Heartbeat);
                let _ = hb_tasks.send(BusMessage::Heartbeat);
                let _ = hb_timeline.send(BusMessage::Heartbeat);
            }
        });

        Self {
            thoughts,
            tasks,
            timeline,
            heartbeat_handle,
        }
    }

    fn sender(&self, stream: StreamKind) -> &broadcast::Sender<BusMessage> {
        match stream {
            StreamKind::Thoughts => &self.thoughts,
            StreamKind::Tasks => &self.tasks,
            StreamKind::Timeline => &self.timeline,
        }
    }

    /// Publish to a stream. A `send` with no subscribers is not an error — it just
    /// means nobody was listening.
    pub fn publish(&self, stream: StreamKind, value: serde_json::Value) {
        let _ = self.sender(stream).send(BusMessage::Payload(value));
    }

    /// Subscribe to a stream. Dropping the returned stream detaches the subscriber
    /// (releases the broadcast receiver), per §4.9 "subscription cancellation
    /// detaches the subscriber".
    pub fn subscribe(
        &self,
        stream: StreamKind,
    ) -> impl tokio_stream::Stream<Item = BusMessage> + Send + 'static {
        let receiver = self.sender(stream).subscribe();
        BroadcastStream::new(receiver).filter_map(|item| item.ok())
    }

    pub fn subscriber_count(&self, stream: StreamKind) -> usize {
        self.sender(stream).receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.heartbeat_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt as _;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.subscribe(StreamKind::Tasks));
        bus.publish(StreamKind::Tasks, serde_json::json!({"task_id": 1}));

        let msg = stream.next().await.unwrap();
        match msg {
            BusMessage::Payload(v) => assert_eq!(v["task_id"], 1),
            BusMessage::Heartbeat => panic!("expected payload"),
        }
    }

    #[tokio::test]
    async fn test_streams_are_independent() {
        let bus = EventBus::new();
        let mut thoughts_stream = Box::pin(bus.subscribe(StreamKind::Thoughts));
        bus.publish(StreamKind::Tasks, serde_json::json!({"x": 1}));

        let result = tokio::time::timeout(Duration::from_millis(50), thoughts_stream.next()).await;
        assert!(result.is_err(), "thoughts subscriber should not see tasks messages");
    }

    #[tokio::test]
    async fn test_late_subscriber_does_not_see_history() {
        let bus = EventBus::new();
        bus.publish(StreamKind::Timeline, serde_json::json!({"before": true}));
        let mut stream = Box::pin(bus.subscribe(StreamKind::Timeline));
        bus.publish(StreamKind::Timeline, serde_json::json!({"after": true}));

        let msg = stream.next().await.unwrap();
        match msg {
            BusMessage::Payload(v) => assert_eq!(v["after"], true),
            BusMessage::Heartbeat => panic!("expected payload"),
        }
    }

    #[tokio::test]
    async fn test_subscriber_count_reflects_detach() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(StreamKind::Tasks), 0);
        let stream = bus.subscribe(StreamKind::Tasks);
        assert_eq!(bus.subscriber_count(StreamKind::Tasks), 1);
        drop(stream);
        assert_eq!(bus.subscriber_count(StreamKind::Tasks), 0);
    }
}
