//! Tests for the message observer: dedupe, ordering, fan-out.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{provider_message, snowflake_at};
use vermeer::gateway::{DeletedMessage, GatewayEvent};
use vermeer::observer::{MessageEvent, MessageObserver};
use vermeer::Snowflake;

fn observer(grace_ms: u64) -> (MessageObserver, CancellationToken) {
    let token = CancellationToken::new();
    let obs = MessageObserver::new(Duration::from_millis(grace_ms), 10_000, &token);
    (obs, token)
}

#[tokio::test]
async fn duplicate_creates_from_two_sessions_deliver_once() {
    let (obs, _token) = observer(20);
    let channel = Snowflake::from(7u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == channel);

    let msg = provider_message(snowflake_at(0), channel, "hello");
    // Same dispatch arrives over both the user and the bot session.
    obs.publisher().publish(GatewayEvent::MessageCreate(msg.clone()));
    obs.publisher().publish(GatewayEvent::MessageCreate(msg.clone()));

    let first = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("first delivery")
        .expect("observer alive");
    assert_eq!(first.message_id(), msg.id);

    let second = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await;
    assert!(second.is_err(), "duplicate was delivered");
}

#[tokio::test]
async fn creates_deliver_in_snowflake_order_within_grace() {
    let (obs, _token) = observer(60);
    let channel = Snowflake::from(7u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == channel);

    let earlier = provider_message(snowflake_at(-500), channel, "first");
    let later = provider_message(snowflake_at(0), channel, "second");

    // Arrive out of order; both within one grace window.
    obs.publisher().publish(GatewayEvent::MessageCreate(later.clone()));
    obs.publisher().publish(GatewayEvent::MessageCreate(earlier.clone()));

    let a = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("delivery")
        .expect("observer alive");
    let b = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("delivery")
        .expect("observer alive");
    assert_eq!(a.message_id(), earlier.id, "snowflake order violated");
    assert_eq!(b.message_id(), later.id);
}

#[tokio::test]
async fn updates_and_deletes_deliver_immediately() {
    let (obs, _token) = observer(40);
    let channel = Snowflake::from(7u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == channel);

    let id = snowflake_at(0);
    let update = provider_message(id, channel, "**x** (55%)");
    obs.publisher().publish(GatewayEvent::MessageUpdate(update));
    let event = tokio::time::timeout(Duration::from_millis(500), sub.recv())
        .await
        .expect("update delivered")
        .expect("observer alive");
    assert!(matches!(event, MessageEvent::Update(_)));

    obs.publisher().publish(GatewayEvent::MessageDelete(DeletedMessage {
        id,
        channel_id: channel,
    }));
    let event = tokio::time::timeout(Duration::from_millis(500), sub.recv())
        .await
        .expect("delete delivered")
        .expect("observer alive");
    assert!(matches!(event, MessageEvent::Delete(_)));
}

#[tokio::test]
async fn repeated_identical_update_is_deduplicated() {
    let (obs, _token) = observer(10);
    let channel = Snowflake::from(7u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == channel);

    let update = provider_message(snowflake_at(0), channel, "**x** (31%)");
    obs.publisher().publish(GatewayEvent::MessageUpdate(update.clone()));
    obs.publisher().publish(GatewayEvent::MessageUpdate(update.clone()));

    // A later edit with different content still arrives.
    let mut next = update.clone();
    next.content = "**x** (62%)".into();
    obs.publisher().publish(GatewayEvent::MessageUpdate(next));

    let first = tokio::time::timeout(Duration::from_millis(500), sub.recv())
        .await
        .expect("first update")
        .expect("observer alive");
    let second = tokio::time::timeout(Duration::from_millis(500), sub.recv())
        .await
        .expect("second distinct update")
        .expect("observer alive");
    match (&first, &second) {
        (MessageEvent::Update(a), MessageEvent::Update(b)) => {
            assert_eq!(a.content, "**x** (31%)");
            assert_eq!(b.content, "**x** (62%)");
        }
        other => panic!("unexpected events: {other:?}"),
    }
    let third = tokio::time::timeout(Duration::from_millis(150), sub.recv()).await;
    assert!(third.is_err(), "identical duplicate update delivered");
}

#[tokio::test]
async fn predicates_filter_by_channel() {
    let (obs, _token) = observer(10);
    let watched = Snowflake::from(7u64);
    let other = Snowflake::from(8u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == watched);

    obs.publisher().publish(GatewayEvent::MessageCreate(provider_message(
        snowflake_at(0),
        other,
        "elsewhere",
    )));
    let watched_msg = provider_message(snowflake_at(1), watched, "here");
    obs.publisher()
        .publish(GatewayEvent::MessageCreate(watched_msg.clone()));

    let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("delivery")
        .expect("observer alive");
    assert_eq!(event.message_id(), watched_msg.id);
}

#[tokio::test]
async fn dropping_a_subscription_unregisters_it() {
    let (obs, _token) = observer(10);
    let channel = Snowflake::from(7u64);
    let sub = obs.subscribe(move |e| e.channel_id() == channel);
    assert_eq!(obs.subscription_count(), 1);
    drop(sub);
    assert_eq!(obs.subscription_count(), 0);
}

#[tokio::test]
async fn cancellation_stops_the_dispatcher() {
    let (obs, token) = observer(10);
    let channel = Snowflake::from(7u64);
    let mut sub = obs.subscribe(move |e| e.channel_id() == channel);

    token.cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    obs.publisher().publish(GatewayEvent::MessageCreate(provider_message(
        snowflake_at(0),
        channel,
        "late",
    )));
    let delivery = tokio::time::timeout(Duration::from_millis(150), sub.recv()).await;
    // Either the channel closed or nothing arrives; both mean the
    // dispatcher stopped.
    match delivery {
        Ok(None) | Err(_) => {}
        Ok(Some(event)) => panic!("event delivered after cancellation: {event:?}"),
    }
}
