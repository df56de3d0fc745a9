//! End-to-end client tests over the in-memory transport.
//!
//! These cover the login sequence, dispatch rules with side effects,
//! reconnect policy, receipts and the media handshake.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{capture, position, Harness, CONTACT, SELF_JID};
use whatsapi::events::{ClientReceived, Presence, Typing, TypingState};
use whatsapi::session::UserStatus;
use whatsapi::{
    AuthFailure, ContentMessage, Event, MediaStage, MediaType, Node, ReceiptPolicy, Response,
    SessionState, WaError,
};

fn text_message(id: &str, from: &str) -> Node {
    Node::new("message")
        .with_attr("from", from)
        .with_attr("id", id)
        .with_attr("type", "text")
        .with_attr("t", "1400000000")
        .with_attr("notify", "Alice")
        .with_child(Node::new("body").with_payload(b"hello".to_vec()))
}

fn result(id: &str) -> Node {
    Node::new("iq").with_attr("type", "result").with_attr("id", id)
}

/// Test the full challenge login with queued messages
#[test]
fn test_login_sequence_with_challenge() {
    let mut h = Harness::new();
    h.connect();
    assert_eq!(h.events(), vec![Event::Connected]);
    assert_eq!(h.client.state(), SessionState::Connected);

    // Messages sent before login wait in the queue
    let first = h.client.send_message(CONTACT, "one", None).unwrap();
    let second = h.client.send_message(CONTACT, "two", None).unwrap();
    assert_eq!(h.client.session().queued(), 2);
    assert!(h.sent().is_empty());

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    h.client
        .login(Some(Box::new(move |result| {
            *sink.lock().unwrap() = Some(result);
        })))
        .unwrap();
    assert_eq!(h.client.state(), SessionState::StreamOpened);

    // No stored token: the auth node carries no data
    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].tag(), "stream:features");
    assert_eq!(sent[1].tag(), "auth");
    assert_eq!(sent[1].attribute("user"), Some(common::MSISDN));
    assert!(sent[1].payload().unwrap_or_default().is_empty());

    h.inject(Node::new("challenge").with_payload(b"nonce".to_vec()));
    assert_eq!(h.client.state(), SessionState::ChallengeSent);

    // Reader key before the response, writer key after it
    let journal = h.journal();
    let reader = position(&journal, "reader key");
    let response = position(&journal, "send response");
    let writer = position(&journal, "writer key");
    assert!(reader < response);
    assert!(response < writer);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tag(), "response");
    assert!(!sent[0].payload().unwrap().is_empty());

    h.inject(Node::new("success").with_payload(b"token".to_vec()));
    assert_eq!(h.client.state(), SessionState::Authenticated);

    // Queue drained in order
    let sent = h.sent();
    let ids: Vec<_> = sent.iter().filter_map(Node::id).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    assert_eq!(sent[0].child("body").unwrap().payload_str(), "one");
    assert_eq!(h.client.session().queued(), 0);

    assert_eq!(h.events(), vec![Event::LoggedIn]);
    assert_eq!(*outcome.lock().unwrap(), Some(Ok(())));

    // Success payload stored for the next login
    let stored = std::fs::read(h.dir.path().join("challenge")).unwrap();
    assert_eq!(stored, b"token");
}

/// Test that a stored token produces a fast-login blob
#[test]
fn test_fast_login_uses_stored_token() {
    let mut h = Harness::new();
    std::fs::write(h.dir.path().join("challenge"), b"previous").unwrap();
    h.connect();
    h.client.login(None).unwrap();

    let sent = h.sent();
    let auth = sent.iter().find(|n| n.tag() == "auth").unwrap();
    assert!(auth.payload().unwrap().len() > whatsapi::codec::MAC_LENGTH + common::MSISDN.len());

    // Reader active immediately, writer held until success
    let journal = h.journal();
    assert!(journal.contains(&"reader key".to_string()));
    assert!(!journal.contains(&"writer key".to_string()));

    h.inject(Node::new("success").with_payload(b"fresh".to_vec()));
    assert!(h.client.session().is_authenticated());
    assert!(h.journal().contains(&"writer key".to_string()));
}

/// Test login rejection
#[test]
fn test_login_failure() {
    let mut h = Harness::new();
    h.connect();
    h.events();

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    h.client
        .login(Some(Box::new(move |result| {
            *sink.lock().unwrap() = Some(result);
        })))
        .unwrap();

    h.inject(Node::new("failure").with_child(Node::new("not-authorized")));

    assert!(!h.client.session().is_authenticated());
    assert_eq!(h.client.state(), SessionState::Disconnected);
    assert!(h.client.session().is_connected());

    let events = h.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Error(raw) => assert!(raw.contains("not-authorized")),
        other => panic!("unexpected event: {other:?}"),
    }
    match outcome.lock().unwrap().take() {
        Some(Err(AuthFailure::Rejected(raw))) => assert!(raw.contains("failure")),
        other => panic!("unexpected login outcome: {other:?}"),
    };
}

/// Test that login on an authenticated session writes nothing
#[test]
fn test_login_while_authenticated() {
    let mut h = Harness::new();
    h.login();

    let result = h.client.login(None);
    assert!(matches!(result, Err(WaError::AlreadyLoggedIn)));
    assert!(h.sent().is_empty());
}

fn receipts_for_policy(policy: ReceiptPolicy) -> Vec<Node> {
    let mut h = Harness::with_config(|c| c.features.send_receipts = policy);
    h.login();
    h.inject(text_message("m-1", CONTACT));
    h.sent().into_iter().filter(|n| n.tag() == "receipt").collect()
}

/// Test receipt policy levels
#[test]
fn test_receipt_policy() {
    assert!(receipts_for_policy(ReceiptPolicy::None).is_empty());

    let delivery = receipts_for_policy(ReceiptPolicy::Delivery);
    assert_eq!(delivery.len(), 1);
    assert_eq!(delivery[0].attribute("type"), None);
    assert_eq!(delivery[0].attribute("to"), Some(CONTACT));
    assert_eq!(delivery[0].id(), Some("m-1"));

    let read = receipts_for_policy(ReceiptPolicy::Read);
    assert_eq!(read.len(), 2);
    assert_eq!(read[0].attribute("type"), None);
    assert_eq!(read[1].attribute("type"), Some("read"));
}

/// Test that the receipt side effect does not stop content processing
#[test]
fn test_message_receipt_and_content() {
    let mut h = Harness::new();
    h.login();
    h.inject(text_message("m-2", CONTACT));

    assert!(h.sent().iter().any(|n| n.tag() == "receipt"));

    let events = h.events();
    assert_eq!(events.len(), 2);
    match &events[0] {
        Event::Typing(typing) => {
            assert_eq!(typing.state, TypingState::Paused);
            assert_eq!(typing.from, CONTACT);
        },
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        Event::Message(ContentMessage::Text { meta, body }) => {
            assert_eq!(meta.id, "m-2");
            assert_eq!(meta.notify, "Alice");
            assert_eq!(body, "hello");
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Test that our own echoed messages get no receipt
#[test]
fn test_no_receipt_for_self() {
    let mut h = Harness::new();
    h.login();
    h.inject(text_message("m-3", SELF_JID));
    assert!(h.sent().iter().all(|n| n.tag() != "receipt"));
}

/// Test delivery receipt scenario: read receipt for a sent message
#[test]
fn test_client_received_read() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h.client.send_message(CONTACT, "hi", Some(callback)).unwrap();
    h.sent();

    h.inject(
        Node::new("receipt")
            .with_attr("from", CONTACT)
            .with_attr("id", id.as_str())
            .with_attr("type", "read")
            .with_attr("t", "1400000100"),
    );

    // Low-level ack back to the server
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tag(), "ack");
    assert_eq!(sent[0].attribute("class"), Some("receipt"));
    assert_eq!(sent[0].attribute("type"), Some("read"));

    assert_eq!(
        h.events(),
        vec![Event::ClientReceived(ClientReceived {
            id: id.clone(),
            from: CONTACT.to_string(),
            kind: "read".to_string(),
            time: 1400000100,
        })]
    );

    // The send-ack entry is untouched until the server ack arrives
    assert!(seen.lock().unwrap().is_empty());
    assert!(h.client.session().registry().contains(&id));

    h.inject(Node::new("ack").with_attr("class", "message").with_attr("id", id.as_str()));
    assert_eq!(*seen.lock().unwrap(), vec![Ok(Response::Empty)]);
    assert!(h.client.session().registry().is_empty());
}

/// Test receipts listing several message ids
#[test]
fn test_receipt_with_list() {
    let mut h = Harness::new();
    h.login();
    h.inject(
        Node::new("receipt")
            .with_attr("from", CONTACT)
            .with_attr("id", "a")
            .with_attr("time", "1400000300")
            .with_child(
                Node::new("list")
                    .with_child(Node::new("item").with_attr("id", "b"))
                    .with_child(Node::new("item").with_attr("id", "c")),
            ),
    );

    let ids: Vec<_> = h
        .events()
        .into_iter()
        .map(|e| match e {
            Event::ClientReceived(r) => {
                assert_eq!(r.kind, "received");
                assert_eq!(r.time, 1400000300);
                r.id
            },
            other => panic!("unexpected event: {other:?}"),
        })
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

/// Test error responses reach the correlated callback
#[test]
fn test_error_resolves_callback() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h.client.request_last_seen("497654321", Some(callback)).unwrap();

    h.inject(
        Node::new("iq")
            .with_attr("type", "error")
            .with_attr("id", id.as_str())
            .with_child(
                Node::new("error")
                    .with_attr("code", "405")
                    .with_attr("text", "not-allowed")
                    .with_attr("backoff", "30"),
            ),
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let error = seen[0].as_ref().unwrap_err();
    assert_eq!(error.code, "405");
    assert_eq!(error.message, "not-allowed");
    assert_eq!(error.backoff, Some(30));
}

/// Test last seen is computed from the reported seconds
#[test]
fn test_last_seen_response() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h.client.request_last_seen("497654321", Some(callback)).unwrap();
    let query = h.sent().pop().unwrap();
    assert_eq!(query.attribute("to"), Some(CONTACT));

    h.inject(
        result(&id)
            .with_attr("from", CONTACT)
            .with_child(Node::new("query").with_attr("seconds", "120")),
    );

    match &seen.lock().unwrap()[0] {
        Ok(Response::LastSeen { from, date, seconds_ago }) => {
            assert_eq!(from, CONTACT);
            assert_eq!(*seconds_ago, 120);
            assert!(*date > 0);
        },
        other => panic!("unexpected response: {other:?}"),
    };
}

/// Test unmatched responses are dropped silently
#[test]
fn test_unmatched_response_dropped() {
    let mut h = Harness::new();
    h.login();
    h.inject(Node::new("ack").with_attr("id", "nobody-1-1"));
    h.inject(Node::new("unknown-tag"));
    assert!(h.events().is_empty());
    assert!(h.sent().is_empty());
}

/// Test ping and dirty handling
#[test]
fn test_ping_and_dirty() {
    let mut h = Harness::new();
    h.login();

    h.inject(
        Node::new("iq")
            .with_attr("type", "get")
            .with_attr("id", "ping-7")
            .with_attr("xmlns", "urn:xmpp:ping"),
    );
    let pong = h.sent().pop().unwrap();
    assert_eq!(pong.id(), Some("ping-7"));
    assert_eq!(pong.attribute("type"), Some("result"));

    h.inject(
        Node::new("ib")
            .with_child(Node::new("dirty").with_attr("type", "groups"))
            .with_child(Node::new("dirty").with_attr("type", "account")),
    );
    let clean = h.sent().pop().unwrap();
    assert!(clean.id().unwrap().starts_with("cleandirty-"));
    assert_eq!(clean.children().len(), 2);
    assert_eq!(clean.children()[1].attribute("type"), Some("account"));
}

/// Test offline count falls through to later rules
#[test]
fn test_offline_count() {
    let mut h = Harness::new();
    h.login();
    h.inject(Node::new("ib").with_child(Node::new("offline").with_attr("count", "4")));
    assert_eq!(h.events(), vec![Event::OfflineCount(4)]);
}

/// Test the offline count does not stop later rules on the same node
#[test]
fn test_offline_count_falls_through() {
    let mut h = Harness::new();
    h.login();
    h.inject(
        Node::new("ib")
            .with_child(Node::new("offline").with_attr("count", "2"))
            .with_child(Node::new("dirty").with_attr("type", "groups")),
    );
    assert_eq!(h.events(), vec![Event::OfflineCount(2)]);

    let clean = h.sent().pop().unwrap();
    assert!(clean.id().unwrap().starts_with("cleandirty-"));
    assert_eq!(clean.children()[0].attribute("type"), Some("groups"));
}

/// Test presence updates, hidden last seen and our own presence
#[test]
fn test_presence_events() {
    let mut h = Harness::new();
    h.login();

    h.inject(
        Node::new("presence")
            .with_attr("from", CONTACT)
            .with_attr("type", "unavailable")
            .with_attr("last", "1400000400"),
    );
    h.inject(Node::new("presence").with_attr("from", CONTACT).with_attr("last", "deny"));
    h.inject(Node::new("presence").with_attr("from", SELF_JID).with_attr("type", "unavailable"));

    assert_eq!(
        h.events(),
        vec![
            Event::Presence(Presence {
                from: CONTACT.to_string(),
                kind: "unavailable".to_string(),
                last_seen: Some(1400000400),
            }),
            Event::Presence(Presence {
                from: CONTACT.to_string(),
                kind: "available".to_string(),
                last_seen: None,
            }),
        ]
    );
    assert!(h.sent().is_empty());
}

/// Test chatstate nodes become typing events
#[test]
fn test_chatstate_typing() {
    let mut h = Harness::new();
    h.login();

    h.inject(
        Node::new("chatstate")
            .with_attr("from", "4912-1400@g.us")
            .with_attr("participant", CONTACT)
            .with_child(Node::new("composing")),
    );
    h.inject(Node::new("chatstate").with_attr("from", CONTACT).with_child(Node::new("paused")));
    h.inject(Node::new("chatstate").with_attr("from", CONTACT).with_child(Node::new("recording")));

    assert_eq!(
        h.events(),
        vec![
            Event::Typing(Typing {
                state: TypingState::Composing,
                from: "4912-1400@g.us".to_string(),
                author: CONTACT.to_string(),
            }),
            Event::Typing(Typing {
                state: TypingState::Paused,
                from: CONTACT.to_string(),
                author: String::new(),
            }),
        ]
    );
}

/// Test a profile picture response reaches its callback
#[test]
fn test_profile_picture_response() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h.client.request_profile_picture(CONTACT, true, Some(callback)).unwrap();
    let request = h.sent().pop().unwrap();
    assert_eq!(request.child("picture").unwrap().attribute("type"), Some("preview"));

    h.inject(
        result(&id).with_attr("from", CONTACT).with_child(
            Node::new("picture")
                .with_attr("type", "preview")
                .with_attr("id", "1400000500")
                .with_payload(b"jpeg".to_vec()),
        ),
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Ok(Response::ProfilePicture {
            from: CONTACT.to_string(),
            is_preview: true,
            data: b"jpeg".to_vec(),
            picture_id: "1400000500".to_string(),
        })]
    );
}

/// Test a status list response reaches its callback
#[test]
fn test_status_list_response() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h.client.request_statuses(&["497654321", "491111"], Some(callback)).unwrap();
    assert_eq!(h.sent().pop().unwrap().child("status").unwrap().children().len(), 2);

    h.inject(
        result(&id).with_child(
            Node::new("status")
                .with_child(
                    Node::new("user")
                        .with_attr("jid", CONTACT)
                        .with_attr("t", "1400000600")
                        .with_payload(b"Busy".to_vec()),
                )
                .with_child(Node::new("user").with_attr("jid", "491111@s.whatsapp.net")),
        ),
    );
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Ok(Response::Statuses(vec![
            UserStatus {
                jid: CONTACT.to_string(),
                status: "Busy".to_string(),
                time: 1400000600,
            },
            UserStatus {
                jid: "491111@s.whatsapp.net".to_string(),
                status: String::new(),
                time: 0,
            },
        ]))]
    );
}

/// Test server properties and pricing responses
#[test]
fn test_properties_and_pricing() {
    let mut h = Harness::new();
    h.login();

    let (callback, props) = capture();
    let id = h.client.request_server_properties(Some(callback)).unwrap();
    h.inject(
        result(&id).with_child(
            Node::new("props")
                .with_child(Node::new("prop").with_attr("name", "max_groups").with_attr("value", "50"))
                .with_child(Node::new("prop").with_attr("name", "max_subject").with_attr("value", "25")),
        ),
    );
    let expected: BTreeMap<String, String> = [("max_groups", "50"), ("max_subject", "25")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    assert_eq!(*props.lock().unwrap(), vec![Ok(Response::Properties(expected))]);

    let (callback, pricing) = capture();
    let id = h.client.request_service_pricing("de", "DE", Some(callback)).unwrap();
    h.inject(
        result(&id).with_child(
            Node::new("pricing")
                .with_attr("price", "0,89 €")
                .with_attr("cost", "0.89")
                .with_attr("currency", "EUR")
                .with_attr("expiration", "1500000000"),
        ),
    );
    assert_eq!(
        *pricing.lock().unwrap(),
        vec![Ok(Response::Pricing {
            price: "0,89 €".to_string(),
            cost: "0.89".to_string(),
            currency: "EUR".to_string(),
            expiration: 1500000000,
        })]
    );
    assert!(h.client.session().registry().is_empty());
}

/// Test nodes ahead of a corrupt frame are still dispatched
#[test]
fn test_corrupt_frame_after_valid_node() {
    let mut h = Harness::new();
    h.login();

    let mut bytes = h.frame(
        &Node::new("presence")
            .with_attr("from", CONTACT)
            .with_attr("type", "unavailable"),
    );
    // plain frame whose tree uses an unknown content kind
    bytes.extend_from_slice(&[0, 0, 4, 1, b'x', 0, 9]);
    h.inject_raw(bytes);

    let events = h.events();
    assert_eq!(events.len(), 2, "{events:?}");
    assert!(matches!(&events[0], Event::Presence(p) if p.kind == "unavailable"));
    assert!(matches!(&events[1], Event::Error(e) if e.contains("kind 9")));

    // the stream keeps working
    h.inject(Node::new("presence").with_attr("from", CONTACT));
    assert_eq!(h.events().len(), 1);
}

/// Test a failed write leaves no callback behind
#[test]
fn test_failed_send_registers_nothing() {
    let mut h = Harness::new();
    h.login();

    // The server dropped the link; the client has not handled the end yet
    assert!(h.peer.end());
    assert!(h.client.session().is_authenticated());

    let (callback, seen) = capture();
    let result = h.client.request_last_seen("497654321", Some(callback));
    assert!(matches!(result, Err(WaError::NotConnected)));

    let (callback, _) = capture();
    assert!(h.client.send_message(CONTACT, "lost", Some(callback)).is_err());

    assert!(h.client.session().registry().is_empty());
    assert!(seen.lock().unwrap().is_empty());
}

/// Test group notifications are acked and classified
#[test]
fn test_group_notifications() {
    let mut h = Harness::new();
    h.login();

    h.inject(
        Node::new("notification")
            .with_attr("type", "w:gp2")
            .with_attr("id", "n-1")
            .with_attr("from", "4912-1400@g.us")
            .with_attr("participant", CONTACT)
            .with_attr("t", "1400000200")
            .with_child(Node::new("subject").with_attr("subject", "Weekend")),
    );

    let ack = h.sent().pop().unwrap();
    assert_eq!(ack.tag(), "ack");
    assert_eq!(ack.attribute("class"), Some("notification"));
    assert_eq!(ack.id(), Some("n-1"));

    match h.events().pop().unwrap() {
        Event::GroupSubjectChanged { change, notification_id } => {
            assert_eq!(notification_id, "n-1");
            assert_eq!(change.group_id, "4912-1400");
            assert_eq!(change.by, CONTACT);
            assert_eq!(change.time, 1400000200);
            assert_eq!(change.subject, "Weekend");
        },
        other => panic!("unexpected event: {other:?}"),
    }

    h.inject(
        Node::new("notification")
            .with_attr("type", "w:gp2")
            .with_attr("id", "n-2")
            .with_attr("from", "4912-1400@g.us")
            .with_child(
                Node::new("remove")
                    .with_child(Node::new("participant").with_attr("jid", CONTACT)),
            ),
    );
    match h.events().pop().unwrap() {
        Event::GroupParticipantsChanged { change, .. } => {
            assert_eq!(change.action, "remove");
            assert_eq!(change.participants, vec![CONTACT.to_string()]);
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Test status and picture notifications
#[test]
fn test_status_and_picture_notifications() {
    let mut h = Harness::new();
    h.login();

    h.inject(
        Node::new("notification")
            .with_attr("type", "status")
            .with_attr("id", "n-3")
            .with_attr("from", CONTACT)
            .with_child(Node::new("set").with_payload(b"busy".to_vec())),
    );
    h.inject(
        Node::new("notification")
            .with_attr("type", "picture")
            .with_attr("id", "n-4")
            .with_attr("from", CONTACT)
            .with_child(Node::new("delete")),
    );

    assert_eq!(
        h.events(),
        vec![
            Event::StatusUpdated {
                from: CONTACT.to_string(),
                status: "busy".to_string(),
                notification_id: "n-3".to_string(),
            },
            Event::PictureUpdated {
                from: CONTACT.to_string(),
                action: "delete".to_string(),
                notification_id: "n-4".to_string(),
            },
        ]
    );
}

/// Test privacy and account events
#[test]
fn test_privacy_and_account_events() {
    let mut h = Harness::new();
    h.login();

    let id = h.client.request_privacy_settings().unwrap();
    h.inject(result(&id).with_child(
        Node::new("privacy")
            .with_child(Node::new("category").with_attr("name", "last").with_attr("value", "none")),
    ));

    let id = h.client.request_extend_account().unwrap();
    h.inject(result(&id).with_child(
        Node::new("extend").with_child(
            Node::new("account")
                .with_attr("kind", "paid")
                .with_attr("status", "active")
                .with_attr("creation", "1300000000")
                .with_attr("expiration", "1500000000"),
        ),
    ));

    let events = h.events();
    match &events[0] {
        Event::PrivacySettings(settings) => assert_eq!(settings["last"], "none"),
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[1] {
        Event::AccountExtended(info) => {
            assert_eq!(info.kind, "paid");
            assert_eq!(info.expiration, 1500000000);
        },
        other => panic!("unexpected event: {other:?}"),
    }
}

/// Test typed group and sync responses
#[test]
fn test_group_and_sync_responses() {
    let mut h = Harness::new();
    h.login();

    let (callback, groups) = capture();
    let id = h
        .client
        .request_groups(whatsapi::GroupListKind::Participating, Some(callback))
        .unwrap();
    h.inject(result(&id).with_child(
        Node::new("groups").with_child(
            Node::new("group")
                .with_attr("id", "4912-1400")
                .with_attr("subject", "Team")
                .with_child(Node::new("participant").with_attr("jid", CONTACT)),
        ),
    ));
    match &groups.lock().unwrap()[0] {
        Ok(Response::Groups(list)) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].subject, "Team");
            assert_eq!(list[0].participants.len(), 1);
        },
        other => panic!("unexpected response: {other:?}"),
    }

    let (callback, sync) = capture();
    let id = h
        .client
        .request_contacts_sync(&["497654321"], "full", "registration", Some(callback))
        .unwrap();
    let request = h.sent().pop().unwrap();
    let users = request.child("sync").unwrap().children();
    assert_eq!(users[0].payload_str(), "+497654321");

    h.inject(result(&id).with_child(
        Node::new("sync")
            .with_child(Node::new("in").with_child(Node::new("user").with_payload(b"+497654321".to_vec())))
            .with_child(Node::new("out")),
    ));
    match &sync.lock().unwrap()[0] {
        Ok(Response::ContactsSync { existing, non_existing, invalid }) => {
            assert_eq!(existing, &vec!["+497654321".to_string()]);
            assert!(non_existing.is_empty());
            assert!(invalid.is_empty());
        },
        other => panic!("unexpected response: {other:?}"),
    };
}

/// Test reconnect keeps pending requests
#[test]
fn test_reconnect_keeps_registry() {
    let mut h = Harness::new();
    h.login();

    let (callback, _) = capture();
    h.client.request_last_seen("497654321", Some(callback)).unwrap();
    assert_eq!(h.client.session().registry().len(), 1);

    assert!(h.peer.end());
    h.client.poll_transport();

    assert_eq!(h.events(), vec![Event::Reconnecting, Event::Connected]);
    assert_eq!(h.peer.connects().len(), 2);
    assert_eq!(h.client.session().registry().len(), 1);
    assert!(!h.client.session().is_authenticated());
}

/// Test end without reconnect
#[test]
fn test_end_without_reconnect() {
    let mut h = Harness::with_config(|c| c.server.reconnect = false);
    h.login();

    assert!(h.peer.end());
    h.client.poll_transport();

    assert_eq!(h.events(), vec![Event::Ended]);
    assert_eq!(h.peer.connects().len(), 1);
    assert!(h.client.is_closed());
    assert_eq!(h.client.state(), SessionState::Disconnected);
}

/// Test connect errors before and after the first connection
#[test]
fn test_connect_error_kinds() {
    let mut h = Harness::new();
    h.peer.refuse_connects(Some("refused"));

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    h.client.connect(Some(Box::new(move |result| {
        *sink.lock().unwrap() = Some(result);
    })));
    h.client.poll_transport();

    assert_eq!(h.events(), vec![Event::ConnectError("refused".to_string())]);
    assert_eq!(*outcome.lock().unwrap(), Some(Err("refused".to_string())));

    h.peer.refuse_connects(None);
    h.connect();
    h.events();
    assert!(h.peer.fail("reset by peer"));
    h.client.poll_transport();
    assert_eq!(h.events(), vec![Event::Error("reset by peer".to_string())]);
}

fn media_file(h: &Harness) -> std::path::PathBuf {
    let path = h.dir.path().join("photo.png");
    std::fs::write(&path, b"pngdata").unwrap();
    path
}

async fn pump_until_message(h: &mut Harness) -> Node {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            h.client.step().await;
            if let Some(message) = h.sent().into_iter().find(|n| n.tag() == "message") {
                return message;
            }
        }
    })
    .await
    .expect("media message was not sent")
}

/// Test duplicate media skips the upload
#[tokio::test]
async fn test_media_duplicate_skips_upload() {
    let mut h = Harness::new();
    h.login();

    let path = media_file(&h);
    let id = h
        .client
        .send_media(CONTACT, &path, MediaType::Image, Some("look"), None)
        .unwrap();

    let request = h.sent().pop().unwrap();
    assert_eq!(request.id(), Some(id.as_str()));
    let media = request.child("media").unwrap();
    assert_eq!(media.attribute("type"), Some("image"));
    assert_eq!(media.attribute("size"), Some("7"));
    assert_eq!(h.client.media().stage(&id), Some(MediaStage::Requested));

    h.inject(result(&id).with_child(
        Node::new("duplicate")
            .with_attr("url", "https://mms.test/d/abc/existing.png")
            .with_attr("type", "image")
            .with_attr("size", "7"),
    ));
    assert_eq!(h.client.media().stage(&id), Some(MediaStage::Skipped));

    let message = pump_until_message(&mut h).await;
    let content = message.child("media").unwrap();
    assert_eq!(content.attribute("url"), Some("https://mms.test/d/abc/existing.png"));
    assert_eq!(content.attribute("file"), Some("existing.png"));
    assert_eq!(content.attribute("caption"), Some("look"));
    assert_eq!(content.payload(), Some(&b"thumb"[..]));
    assert_eq!(message.attribute("to"), Some(CONTACT));

    assert_eq!(h.uploader.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Test fresh media is uploaded exactly once
#[tokio::test]
async fn test_media_upload_then_send() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let path = media_file(&h);
    let id = h
        .client
        .send_media(CONTACT, &path, MediaType::Image, None, Some(callback))
        .unwrap();
    h.sent();

    h.inject(result(&id).with_child(Node::new("media").with_attr("url", "https://mms.test/u/slot")));
    assert_eq!(h.client.media().stage(&id), Some(MediaStage::Uploading));

    let message = pump_until_message(&mut h).await;
    let content = message.child("media").unwrap();
    assert_eq!(content.attribute("url"), Some("https://mms.test/u/slot/uploaded.png"));
    assert_eq!(h.uploader.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // The message ack resolves the send_media callback
    h.inject(Node::new("ack").with_attr("id", message.id().unwrap()));
    assert_eq!(*seen.lock().unwrap(), vec![Ok(Response::Empty)]);
}

/// Test media rejected before any request is sent
#[test]
fn test_media_wrong_type_rejected() {
    let mut h = Harness::new();
    h.login();

    let path = media_file(&h);
    let result = h.client.send_media(CONTACT, &path, MediaType::Video, None, None);
    assert!(matches!(result, Err(WaError::Media(_))));
    assert!(h.sent().is_empty());
}

/// Test a media request answered with an error fails the job
#[test]
fn test_media_request_error() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let path = media_file(&h);
    let id = h
        .client
        .send_media(CONTACT, &path, MediaType::Image, None, Some(callback))
        .unwrap();

    h.inject(
        Node::new("iq")
            .with_attr("type", "error")
            .with_attr("id", id.as_str())
            .with_child(Node::new("error").with_attr("code", "413").with_attr("text", "too-large")),
    );

    assert_eq!(h.client.media().requested(), 0);
    assert_eq!(seen.lock().unwrap()[0].as_ref().unwrap_err().code, "413");
}

/// Wait until the client writes something and return the last node
async fn pump_until_sent(h: &mut Harness) -> Node {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            h.client.step().await;
            if let Some(node) = h.sent().pop() {
                return node;
            }
        }
    })
    .await
    .expect("nothing was sent")
}

/// Test media behind a redirecting URL is downloaded, checked and sent
#[tokio::test]
async fn test_media_from_url() {
    let base = common::serve_http(vec![
        (
            "/share/latest",
            "HTTP/1.1 302 Found\r\nLocation: /files/photo.png\r\n".to_string(),
            Vec::new(),
        ),
        (
            "/files/photo.png",
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n".to_string(),
            b"pngdata".to_vec(),
        ),
    ])
    .await;

    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let id = h
        .client
        .send_media_url(
            CONTACT,
            &format!("{base}/share/latest"),
            MediaType::Image,
            Some("remote"),
            Some(callback),
        )
        .unwrap();
    assert_eq!(h.client.media().stage(&id), Some(MediaStage::Downloading));
    assert!(h.sent().is_empty());

    // The slot request goes out once the copy passed the checks
    let request = pump_until_sent(&mut h).await;
    assert_eq!(request.id(), Some(id.as_str()));
    assert_eq!(request.child("media").unwrap().attribute("size"), Some("7"));
    assert_eq!(h.client.media().stage(&id), Some(MediaStage::Requested));

    h.inject(result(&id).with_child(Node::new("media").with_attr("url", "https://mms.test/u/slot")));
    let message = pump_until_message(&mut h).await;
    let content = message.child("media").unwrap();
    assert_eq!(content.attribute("caption"), Some("remote"));
    assert_eq!(content.payload(), Some(&b"thumb"[..]));
    assert_eq!(h.uploader.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    h.inject(Node::new("ack").with_attr("id", message.id().unwrap()));
    assert_eq!(*seen.lock().unwrap(), vec![Ok(Response::Empty)]);
}

/// Test an unreachable or unfit URL fails through the callback
#[tokio::test]
async fn test_media_from_url_rejected() {
    let base = common::serve_http(vec![(
        "/clip.mp4",
        "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\n".to_string(),
        b"mp4data".to_vec(),
    )])
    .await;

    let mut h = Harness::new();
    h.login();

    let local = h.client.send_media_url(CONTACT, "/tmp/photo.png", MediaType::Image, None, None);
    assert!(matches!(local, Err(WaError::Media(_))));

    for (path, expected) in [("/gone.png", "404"), ("/clip.mp4", "mime type")] {
        let (callback, seen) = capture();
        h.client
            .send_media_url(CONTACT, &format!("{base}{path}"), MediaType::Image, None, Some(callback))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().is_empty() {
                h.client.step().await;
            }
        })
        .await
        .expect("download outcome was not reported");

        let error = seen.lock().unwrap()[0].clone().unwrap_err();
        assert!(error.message.contains(expected), "{error}");
    }
    assert!(h.sent().is_empty());
    assert_eq!(h.client.media().downloading(), 0);
}

/// Test the profile picture preview is built off the event loop
#[tokio::test]
async fn test_set_profile_picture_in_background() {
    let mut h = Harness::new();
    h.login();

    let (callback, seen) = capture();
    let path = media_file(&h);
    let id = h.client.set_profile_picture(&path, Some(callback)).unwrap();

    // Nothing is written until the preview is ready
    assert!(h.sent().is_empty());
    assert_eq!(h.client.media().pictures(), 1);

    let update = pump_until_sent(&mut h).await;
    assert_eq!(update.id(), Some(id.as_str()));
    let pictures = update.children();
    assert_eq!(pictures[0].payload(), Some(&b"pngdata"[..]));
    assert_eq!(pictures[1].attribute("type"), Some("preview"));
    assert_eq!(pictures[1].payload(), Some(&b"thumb"[..]));

    h.inject(result(&id));
    assert_eq!(*seen.lock().unwrap(), vec![Ok(Response::Empty)]);

    let missing = h.client.set_profile_picture(&h.dir.path().join("gone.jpg"), None);
    assert!(matches!(missing, Err(WaError::Media(_))));
}

mod ids {
    use proptest::prelude::*;
    use whatsapi::CorrelationRegistry;

    proptest! {
        /// Minted ids never repeat within a session, whatever the prefix mix
        #[test]
        fn prop_next_id_unique(prefixes in proptest::collection::vec("[a-z]{1,8}", 1..64)) {
            let mut registry = CorrelationRegistry::new();
            let mut seen = std::collections::HashSet::new();
            for prefix in &prefixes {
                let id = registry.next_id(prefix);
                prop_assert!(id.starts_with(prefix.as_str()));
                prop_assert!(seen.insert(id));
            }
            prop_assert_eq!(registry.counter(), prefixes.len() as u64);
        }
    }
}
