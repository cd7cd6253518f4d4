//! Integration tests for the in-memory transport.
//!
//! A subscription runs in a spawned task, just like a bus would drive it,
//! and the test talks to it through a second handle on the same broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_transport::{
    InMemoryTransport, MessageHandler, Transport, TransportError, unsubscribe_channel,
};

/// Records every `(channel, body)` it is handed.
#[derive(Default)]
struct Recorder {
    subscribed: Mutex<Vec<String>>,
    received: Mutex<Vec<(String, String)>>,
}

impl MessageHandler for Recorder {
    fn on_subscribed(&self, channel: &str) {
        self.subscribed.lock().unwrap().push(channel.to_string());
    }

    fn on_message(&self, channel: &str, body: &str) {
        self.received
            .lock()
            .unwrap()
            .push((channel.to_string(), body.to_string()));
    }
}

/// Polls until `channel` has `count` subscribers.
async fn wait_for_subscribers(transport: &InMemoryTransport, channel: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while transport.subscriber_count(channel) != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached");
}

#[tokio::test]
async fn test_subscription_receives_only_its_channel() {
    let subscriber = InMemoryTransport::new();
    let publisher = subscriber.connect();
    let recorder = Arc::new(Recorder::default());
    let (unsubscriber, signal) = unsubscribe_channel();

    let task = {
        let subscriber = subscriber.clone();
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move { subscriber.subscribe("events", &*recorder, signal).await })
    };
    wait_for_subscribers(&publisher, "events", 1).await;

    publisher.publish("events", "ping;{\"n\":1}").await.unwrap();
    publisher.publish("other", "ping;{\"n\":2}").await.unwrap();
    publisher.publish("events", "ping;{\"n\":3}").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    unsubscriber.unsubscribe();

    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("subscription should end after unsubscribe")
        .unwrap();
    assert!(result.is_ok());

    assert_eq!(*recorder.subscribed.lock().unwrap(), vec!["events".to_string()]);
    let received = recorder.received.lock().unwrap();
    assert_eq!(
        *received,
        vec![
            ("events".to_string(), "ping;{\"n\":1}".to_string()),
            ("events".to_string(), "ping;{\"n\":3}".to_string()),
        ]
    );
    assert_eq!(publisher.subscriber_count("events"), 0);
}

#[tokio::test]
async fn test_every_subscriber_gets_every_message() {
    let broker = InMemoryTransport::new();
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let (unsubscriber, signal) = unsubscribe_channel();

    let mut tasks = Vec::new();
    for recorder in [&first, &second] {
        let transport = broker.connect();
        let recorder = Arc::clone(recorder);
        let signal = signal.clone();
        tasks.push(tokio::spawn(async move {
            transport.subscribe("events", &*recorder, signal).await
        }));
    }
    wait_for_subscribers(&broker, "events", 2).await;

    broker.publish("events", "x;{}").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    unsubscriber.unsubscribe();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(first.received.lock().unwrap().len(), 1);
    assert_eq!(second.received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_outage_ends_live_subscription_with_connection_closed() {
    let transport = InMemoryTransport::new();
    let recorder = Arc::new(Recorder::default());
    let (_unsubscriber, signal) = unsubscribe_channel();

    let task = {
        let transport = transport.clone();
        let recorder = Arc::clone(&recorder);
        tokio::spawn(async move { transport.subscribe("events", &*recorder, signal).await })
    };
    wait_for_subscribers(&transport, "events", 1).await;

    transport.set_reachable(false);
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("outage should end the subscription")
        .unwrap();
    assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
}

#[tokio::test]
async fn test_subscribe_while_unreachable_fails_fast() {
    let transport = InMemoryTransport::new();
    transport.set_reachable(false);
    let (_unsubscriber, signal) = unsubscribe_channel();

    let result = transport
        .subscribe("events", &Recorder::default(), signal)
        .await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));

    transport.set_reachable(true);
    assert!(transport.publish("events", "x;{}").await.is_ok());
}

#[tokio::test]
async fn test_subscribe_after_close_fails() {
    let transport = InMemoryTransport::new();
    transport.close().await.unwrap();
    let (_unsubscriber, signal) = unsubscribe_channel();

    let result = transport
        .subscribe("events", &Recorder::default(), signal)
        .await;
    assert!(matches!(result, Err(TransportError::Closed)));
}
