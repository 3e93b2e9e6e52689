//! Event-bus forwarding scenarios: helper subscriptions, host event
//! proxying, and helper-originated publishes.

mod common;

use common::attached_host;
use extbridge::{BusEvent, EVENT_CONTENT_FIELD};
use extbridge::proto::messages::{
    EventbusEvent, EventbusPublishEvent, EventbusRegisterListener, tag,
};
use prost::Message;

#[tokio::test]
async fn subscribed_events_are_forwarded_as_json() {
    let (host, mut helper) = attached_host();

    helper
        .send(
            tag::EVENTBUS_REGISTER,
            1,
            &EventbusRegisterListener {
                event: vec!["GPS_LOCATION".to_owned()],
            },
        )
        .await;

    let eventbus = host.eventbus.clone();
    common::wait_until("listener registered", move || {
        eventbus.listener_count() == 1
    })
    .await;

    let mut event = BusEvent::new("GPS_LOCATION");
    event
        .content
        .insert("lat".to_owned(), serde_json::json!(44.98));
    host.eventbus.emit(&event);

    let command = helper.recv().await;
    assert_eq!(command.command, tag::EVENT);
    let forwarded = EventbusEvent::decode(command.content.as_slice()).unwrap();

    let decoded: BusEvent = serde_json::from_str(&forwarded.event_json).unwrap();
    assert_eq!(decoded, event);
}

#[tokio::test]
async fn reregistration_replaces_the_listener() {
    let (host, mut helper) = attached_host();

    for seqno in 1..=2 {
        helper
            .send(
                tag::EVENTBUS_REGISTER,
                seqno,
                &EventbusRegisterListener {
                    event: vec!["PACKET_STATS".to_owned()],
                },
            )
            .await;
    }

    let eventbus = host.eventbus.clone();
    common::wait_until("listener replaced", move || {
        eventbus.removed_count() == 1
    })
    .await;
    assert_eq!(host.eventbus.listener_count(), 1);
}

#[tokio::test]
async fn helper_publish_lands_on_the_host_bus() {
    let (host, mut helper) = attached_host();

    helper
        .send(
            tag::EVENTBUS_PUBLISH,
            1,
            &EventbusPublishEvent {
                event_type: "HELPER_ALERT".to_owned(),
                event_content_json: r#"{"severity":"high"}"#.to_owned(),
            },
        )
        .await;

    let eventbus = host.eventbus.clone();
    common::wait_until("event published", move || {
        !eventbus.published().is_empty()
    })
    .await;

    let published = host.eventbus.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].event_type, "HELPER_ALERT");
    assert_eq!(
        published[0].content.get(EVENT_CONTENT_FIELD),
        Some(&serde_json::Value::String(
            r#"{"severity":"high"}"#.to_owned()
        ))
    );
}

#[tokio::test]
async fn teardown_removes_all_listeners() {
    let (host, mut helper) = attached_host();

    helper
        .send(
            tag::EVENTBUS_REGISTER,
            1,
            &EventbusRegisterListener {
                event: vec!["A".to_owned(), "B".to_owned()],
            },
        )
        .await;

    let eventbus = host.eventbus.clone();
    common::wait_until("listeners registered", move || {
        eventbus.listener_count() == 2
    })
    .await;

    host.bridge.close();
    assert_eq!(host.eventbus.listener_count(), 0);

    // Emitting after teardown reaches no listener and forwards nothing.
    host.eventbus.emit(&BusEvent::new("A"));
    assert!(helper.try_recv(std::time::Duration::from_millis(100)).await.is_none());
}
