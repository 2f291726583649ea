//! End-to-end tests driving the public bridge API.
//!
//! These tests exercise the full subscribe/post/unsubscribe lifecycle:
//! - Laziness: nothing registers with the bus before subscribe
//! - Delivery: posted values arrive typed, complete, and in order
//! - Teardown: unsubscribing (or dropping) unregisters exactly once
//! - Overflow policies picked per sequence

use std::sync::Arc;

use streambus::{AnyEvent, DeadEvent, EventBus, EventBusBridge, OverflowPolicy};
use tokio_stream::StreamExt;

#[derive(Debug, Clone, PartialEq)]
struct OrderPlaced {
    id: u32,
}

fn setup() -> (EventBus, EventBusBridge) {
    let bus = EventBus::new();
    let bridge = EventBusBridge::new(bus.clone());
    (bus, bridge)
}

#[tokio::test]
async fn posted_events_arrive_in_order() {
    let (bus, bridge) = setup();
    let mut stream = bridge.events::<u32>().subscribe().unwrap();

    bus.post(0u32);
    bus.post(1u32);

    assert_eq!(stream.next().await, Some(Arc::new(0)));
    assert_eq!(stream.next().await, Some(Arc::new(1)));
}

#[tokio::test]
async fn subscription_is_lazy_until_subscribe() {
    let (bus, bridge) = setup();

    let sequence = bridge.events::<OrderPlaced>();
    assert_eq!(bus.listener_count(), 0);

    let stream = sequence.subscribe().unwrap();
    assert_eq!(bus.listener_count(), 1);

    drop(stream);
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn events_before_subscribe_are_missed() {
    let (bus, bridge) = setup();
    let sequence = bridge.events::<u32>();

    bus.post(0u32);
    let mut stream = sequence.subscribe().unwrap();
    bus.post(1u32);
    stream.unsubscribe();

    assert_eq!(stream.next().await, Some(Arc::new(1)));
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn unsubscribed_stream_receives_nothing_further() {
    let (bus, bridge) = setup();
    let mut stream = bridge.events::<OrderPlaced>().subscribe().unwrap();

    stream.unsubscribe();
    bus.post(OrderPlaced { id: 1 });

    assert_eq!(stream.next().await, None);
    assert_eq!(bus.listener_count(), 0);
}

#[tokio::test]
async fn any_event_subscription_sees_every_type() {
    let (bus, bridge) = setup();
    let mut stream = bridge.events::<AnyEvent>().subscribe().unwrap();

    bus.post(OrderPlaced { id: 1 });
    bus.post("hello".to_string());
    bus.post(2u32);

    let first = stream.next().await.unwrap();
    assert_eq!(
        first.downcast_ref::<OrderPlaced>(),
        Some(&OrderPlaced { id: 1 })
    );

    let second = stream.next().await.unwrap();
    assert_eq!(second.downcast_ref::<String>().map(String::as_str), Some("hello"));

    let third = stream.next().await.unwrap();
    assert_eq!(third.downcast_ref::<u32>(), Some(&2));
}

#[tokio::test]
async fn unclaimed_posts_arrive_as_dead_events() {
    let (bus, bridge) = setup();
    let mut dead = bridge.events::<DeadEvent>().subscribe().unwrap();

    bus.post(OrderPlaced { id: 9 });

    let wrapper = dead.next().await.unwrap();
    assert_eq!(
        wrapper.event().downcast_ref::<OrderPlaced>(),
        Some(&OrderPlaced { id: 9 })
    );
}

#[tokio::test]
async fn claimed_posts_produce_no_dead_events() {
    let (bus, bridge) = setup();
    let mut orders = bridge.events::<OrderPlaced>().subscribe().unwrap();
    let mut dead = bridge.events::<DeadEvent>().subscribe().unwrap();

    bus.post(OrderPlaced { id: 3 });

    assert_eq!(orders.next().await, Some(Arc::new(OrderPlaced { id: 3 })));

    // Anything wrapped would already be buffered; ending the dead
    // subscription proves the buffer stayed empty.
    dead.unsubscribe();
    assert!(dead.next().await.is_none());
}

#[tokio::test]
async fn any_event_subscription_claims_posts() {
    let (bus, bridge) = setup();
    let mut all = bridge.events::<AnyEvent>().subscribe().unwrap();
    let mut dead = bridge.events::<DeadEvent>().subscribe().unwrap();

    bus.post(7u32);

    assert!(all.next().await.unwrap().is::<u32>());

    dead.unsubscribe();
    assert!(dead.next().await.is_none());
}

#[tokio::test]
async fn latest_policy_skips_to_newest() {
    let (bus, bridge) = setup();
    let mut stream = bridge
        .events_with::<u32>(OverflowPolicy::Latest)
        .subscribe()
        .unwrap();

    bus.post(0u32);
    bus.post(1u32);

    assert_eq!(stream.next().await, Some(Arc::new(1)));
}

#[tokio::test]
async fn drop_newest_policy_keeps_earliest() {
    let (bus, bridge) = setup();
    let mut stream = bridge
        .events_with::<u32>(OverflowPolicy::DropNewest { capacity: 2 })
        .subscribe()
        .unwrap();

    for n in 0..5u32 {
        bus.post(n);
    }
    stream.unsubscribe();

    assert_eq!(stream.next().await, Some(Arc::new(0)));
    assert_eq!(stream.next().await, Some(Arc::new(1)));
    assert_eq!(stream.next().await, None);
}

#[tokio::test]
async fn independent_subscriptions_each_receive() {
    let (bus, bridge) = setup();
    let sequence = bridge.events::<u32>();
    let mut a = sequence.subscribe().unwrap();
    let mut b = sequence.subscribe().unwrap();

    bus.post(42u32);

    assert_eq!(a.next().await, Some(Arc::new(42)));
    assert_eq!(b.next().await, Some(Arc::new(42)));
}

#[tokio::test]
async fn hundred_posts_arrive_complete_and_ordered() {
    let (bus, bridge) = setup();
    let mut stream = bridge.events::<u32>().subscribe().unwrap();

    for n in 0..100u32 {
        bus.post(n);
    }
    stream.unsubscribe();

    let values: Vec<u32> = stream.map(|v| *v).collect().await;
    assert_eq!(values, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn concurrent_posts_are_all_delivered() {
    let (bus, bridge) = setup();
    let mut stream = bridge.events::<u32>().subscribe().unwrap();

    // Spawn 10 tasks each posting 10 distinct values
    let mut handles = vec![];
    for task in 0..10u32 {
        let bus = bus.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..10 {
                bus.post(task * 10 + n);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    stream.unsubscribe();

    let mut values: Vec<u32> = stream.map(|v| *v).collect().await;
    values.sort_unstable();
    assert_eq!(values, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn subscription_with_no_posts_is_pending() {
    let (_bus, bridge) = setup();
    let stream = bridge.events::<u32>().subscribe().unwrap();

    let mut task = tokio_test::task::spawn(stream);
    tokio_test::assert_pending!(task.poll_next());
}

#[tokio::test]
async fn post_with_no_listeners_is_dropped_quietly() {
    let (bus, _bridge) = setup();

    bus.post(OrderPlaced { id: 1 });

    assert_eq!(bus.listener_count(), 0);
}
