//! Property tests for the wire protocol.
//!
//! Verifies that envelope frames round-trip through the codec, that inbound
//! demultiplexing never panics on arbitrary frames, and that unknown event
//! tags survive the passthrough variant verbatim.

use proptest::prelude::*;
use serde_json::{Value, json};
use wirechat_proto::codec::{decode, encode};
use wirechat_proto::envelope::Envelope;
use wirechat_proto::event::InboundEvent;
use wirechat_proto::message::{MessageKind, WireMessage};
use wirechat_proto::presence::{PresenceStatus, StatusUpdate};
use wirechat_proto::typing::TypingUpdate;
use wirechat_proto::user::UserId;

const KNOWN_TAGS: &[&str] = &[
    "newMessage",
    "messageSent",
    "messageSeen",
    "userStatusChanged",
    "userTyping",
    "groupMessage",
    "error",
];

fn arb_user_id() -> impl Strategy<Value = UserId> {
    (1i64..1_000_000).prop_map(UserId::new)
}

fn arb_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Text),
        Just(MessageKind::Image),
        Just(MessageKind::File),
    ]
}

fn arb_status() -> impl Strategy<Value = PresenceStatus> {
    prop_oneof![
        Just(PresenceStatus::Online),
        Just(PresenceStatus::Away),
        Just(PresenceStatus::Busy),
        Just(PresenceStatus::Invisible),
        Just(PresenceStatus::Offline),
    ]
}

fn arb_content() -> impl Strategy<Value = String> {
    "[^\x00]{0,512}"
}

fn arb_unknown_tag() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{0,24}"
        .prop_filter("must not collide with a known tag", |tag| {
            !KNOWN_TAGS.contains(&tag.as_str())
        })
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        arb_content().prop_map(Value::String),
    ]
}

fn arb_payload() -> impl Strategy<Value = Value> {
    prop_oneof![
        arb_leaf(),
        prop::collection::vec(arb_leaf(), 0..4).prop_map(Value::Array),
        prop::collection::btree_map("[a-z]{1,8}", arb_leaf(), 0..4)
            .prop_map(|map| json!(map)),
    ]
}

fn arb_wire_message() -> impl Strategy<Value = WireMessage> {
    (1i64..1_000_000, arb_user_id(), arb_content(), arb_kind(), any::<bool>()).prop_map(
        |(id, from_user_id, content, message_type, delivered)| WireMessage {
            id: id.to_string(),
            from_user_id,
            content,
            created_at: "2026-01-02T03:04:05Z".to_owned(),
            message_type,
            delivered,
        },
    )
}

proptest! {
    #[test]
    fn envelope_round_trips_through_codec(
        event in "[a-zA-Z][a-zA-Z0-9-]{0,32}",
        data in arb_payload(),
        timestamp in any::<u64>(),
    ) {
        let envelope = Envelope { event, data, timestamp };
        let frame = encode(&envelope).unwrap();
        let decoded = decode(&frame).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_never_panics(frame in "[^\x00]{0,256}") {
        let _ = decode(&frame);
    }

    #[test]
    fn demux_never_panics(event in "[^\x00]{0,64}", data in arb_payload()) {
        let envelope = Envelope { event, data, timestamp: 0 };
        let _ = InboundEvent::from_envelope(envelope);
    }

    #[test]
    fn unknown_tags_pass_through_verbatim(
        tag in arb_unknown_tag(),
        data in arb_payload(),
    ) {
        let envelope = Envelope {
            event: tag.clone(),
            data: data.clone(),
            timestamp: 0,
        };
        let event = InboundEvent::from_envelope(envelope).unwrap();
        prop_assert_eq!(event.local_name(), tag.as_str());
        prop_assert_eq!(event.to_payload(), data);
    }

    #[test]
    fn new_message_survives_the_wire(msg in arb_wire_message()) {
        let envelope = Envelope::new("newMessage", serde_json::to_value(&msg).unwrap());
        let frame = encode(&envelope).unwrap();
        let event = InboundEvent::from_envelope(decode(&frame).unwrap()).unwrap();
        let InboundEvent::NewMessage(decoded) = event else {
            panic!("expected NewMessage, got {event:?}");
        };
        prop_assert_eq!(decoded, msg);
    }

    #[test]
    fn status_update_survives_the_wire(
        user_id in arb_user_id(),
        is_online in any::<bool>(),
        status in arb_status(),
    ) {
        let update = StatusUpdate { user_id, is_online, status: Some(status) };
        let envelope = Envelope::new(
            "userStatusChanged",
            serde_json::to_value(update).unwrap(),
        );
        let event = InboundEvent::from_envelope(envelope).unwrap();
        let InboundEvent::StatusChanged(decoded) = event else {
            panic!("expected StatusChanged, got {event:?}");
        };
        prop_assert_eq!(decoded, update);
    }

    #[test]
    fn typing_expiry_survives_the_wire(
        user_id in arb_user_id(),
        is_typing in any::<bool>(),
        expires_in in prop::option::of(1u64..60_000),
    ) {
        let update = TypingUpdate { user_id, is_typing, expires_in };
        let envelope = Envelope::new("userTyping", serde_json::to_value(update).unwrap());
        let event = InboundEvent::from_envelope(envelope).unwrap();
        let InboundEvent::Typing(decoded) = event else {
            panic!("expected Typing, got {event:?}");
        };
        prop_assert_eq!(decoded, update);
    }
}
