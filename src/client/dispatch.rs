//! Inbound node dispatch.
//!
//! Rules are checked top to bottom and the first terminal match wins.
//! Two rules only have side effects and let evaluation continue: the
//! receipt for reply-worthy messages and the offline count. A node that
//! matches nothing is dropped.

use std::collections::BTreeMap;

use super::Client;
use crate::error::ResponseError;
use crate::events::{
    AccountInfo, ClientReceived, Event, ParticipantsChanged, Presence, SubjectChanged, Typing,
    TypingState,
};
use crate::protocol::{self, builders, ids, Node};
use crate::session::{Group, ParticipantOutcome, Response, ResponseResult, UserStatus};

impl Client {
    /// Run one decoded node through the dispatch rules
    pub fn process_node(&mut self, node: &Node) {
        tracing::debug!("rx <{}> id={}", node.tag(), node.id().unwrap_or("-"));

        if node.is_error() {
            self.on_error(node);
            return;
        }

        if node.should_be_replied() && !self.session.is_self(node.attribute("from").unwrap_or_default()) {
            self.send_receipts(node);
        }

        if node.is_notification() {
            self.reply(&builders::notification_ack(node));
            self.on_notification(node);
            return;
        }

        if node.is_receipt() {
            self.reply(&builders::receipt_ack(node));
            self.on_receipt(node);
            return;
        }

        if node.is_ack() || node.is_profile_picture_ack() || node.is_set_status_ack() {
            self.resolve(node, Ok(Response::Empty));
            return;
        }

        if node.is_challenge() {
            if let Err(e) = self.handle_challenge(node) {
                tracing::warn!("Failed to answer challenge: {}", e);
                self.emitter.emit(Event::Error(e.to_string()));
            }
            return;
        }

        if node.is_success() {
            self.handle_success(node);
            return;
        }

        if node.is_failure() {
            self.handle_failure(node);
            return;
        }

        if node.is_offline_count() {
            let count = node
                .child("offline")
                .and_then(|c| c.attribute("count"))
                .and_then(|c| c.parse().ok())
                .unwrap_or(0);
            self.emitter.emit(Event::OfflineCount(count));
        }

        if node.is_presence() && !self.session.is_self(node.attribute("from").unwrap_or_default()) {
            self.emitter.emit(Event::Presence(presence(node)));
            return;
        }

        if node.is_dirty() {
            let id = self.next_id(ids::CLEAN_DIRTY);
            let clean = builders::clean_dirty(node, &id, &self.config.server.domain);
            self.reply(&clean);
            return;
        }

        if node.is_last_seen() {
            let seconds_ago = node
                .child("query")
                .and_then(|q| q.attribute_i64("seconds"))
                .unwrap_or(0);
            let response = Response::LastSeen {
                from: attr(node, "from"),
                date: protocol::unix_timestamp() - seconds_ago,
                seconds_ago,
            };
            self.resolve(node, Ok(response));
            return;
        }

        if node.is_ping() {
            let pong = builders::pong(node.id().unwrap_or_default(), &self.config.server.domain);
            self.reply(&pong);
            return;
        }

        if node.is_groups_list() {
            let groups = node
                .child("groups")
                .map(|g| {
                    g.children()
                        .iter()
                        .filter(|c| c.tag() == "group")
                        .map(Group::from_node)
                        .collect()
                })
                .unwrap_or_default();
            self.resolve(node, Ok(Response::Groups(groups)));
            return;
        }

        if node.is_group_info() || node.is_group_created() {
            let group = node.child("group").map(Group::from_node).unwrap_or_default();
            self.resolve(node, Ok(Response::Group(group)));
            return;
        }

        if node.is_change_group_participants() {
            self.resolve(node, Ok(participants_changed(node)));
            return;
        }

        if node.is_leave_group() || node.is_group_subject_changed() {
            self.resolve(node, Ok(Response::Empty));
            return;
        }

        if node.is_media_ready() {
            let outcome = self.media.on_media_ready(node);
            self.apply_media_outcome(outcome);
            return;
        }

        if node.is_profile_picture() {
            if let Some(picture) = node.child("picture") {
                let response = Response::ProfilePicture {
                    from: attr(node, "from"),
                    is_preview: picture.attribute("type") == Some("preview"),
                    data: picture.payload().unwrap_or_default().to_vec(),
                    picture_id: attr(picture, "id"),
                };
                self.resolve(node, Ok(response));
            }
            return;
        }

        if node.is_get_status() {
            let statuses = node
                .child("status")
                .map(|s| {
                    s.children()
                        .iter()
                        .map(|user| UserStatus {
                            jid: attr(user, "jid"),
                            status: user.payload_str(),
                            time: user.attribute_i64("t").unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default();
            self.resolve(node, Ok(Response::Statuses(statuses)));
            return;
        }

        if node.is_message() {
            if node.attribute("type") == Some("text") {
                self.emitter.emit(Event::Typing(Typing {
                    state: TypingState::Paused,
                    from: attr(node, "from"),
                    author: attr(node, "participant"),
                }));
            }
            for message in self.content.process(node) {
                self.emitter.emit(Event::Message(message));
            }
            return;
        }

        if node.is_typing() {
            if let Some(state) = node.child_at(0).and_then(|c| TypingState::from_tag(c.tag())) {
                self.emitter.emit(Event::Typing(Typing {
                    state,
                    from: attr(node, "from"),
                    author: attr(node, "participant"),
                }));
            }
            return;
        }

        if node.is_sync() {
            let sync = node.child("sync");
            let list = |tag: &str| -> Vec<String> {
                sync.and_then(|s| s.child(tag))
                    .map(|l| l.children().iter().map(Node::payload_str).collect())
                    .unwrap_or_default()
            };
            let response = Response::ContactsSync {
                existing: list("in"),
                non_existing: list("out"),
                invalid: list("invalid"),
            };
            self.resolve(node, Ok(response));
            return;
        }

        if node.is_properties() {
            let props = node.child("props").map(name_value_map).unwrap_or_default();
            self.resolve(node, Ok(Response::Properties(props)));
            return;
        }

        if node.is_service_pricing() {
            if let Some(pricing) = node.child("pricing") {
                let response = Response::Pricing {
                    price: attr(pricing, "price"),
                    cost: attr(pricing, "cost"),
                    currency: attr(pricing, "currency"),
                    expiration: pricing.attribute_i64("expiration").unwrap_or(0),
                };
                self.resolve(node, Ok(response));
            }
            return;
        }

        if node.is_get_privacy_settings() {
            let settings = node.child("privacy").map(name_value_map).unwrap_or_default();
            self.emitter.emit(Event::PrivacySettings(settings));
            return;
        }

        if node.is_send_privacy_settings() {
            let settings = node.child("privacy").map(name_value_map).unwrap_or_default();
            self.emitter.emit(Event::PrivacySettingsUpdated(settings));
            return;
        }

        if node.is_account_extended() {
            if let Some(account) = node.child("extend").and_then(|e| e.child("account")) {
                self.emitter.emit(Event::AccountExtended(AccountInfo {
                    kind: attr(account, "kind"),
                    status: attr(account, "status"),
                    creation: account.attribute_i64("creation").unwrap_or(0),
                    expiration: account.attribute_i64("expiration").unwrap_or(0),
                }));
            }
            return;
        }

        tracing::trace!("Unhandled <{}>", node.tag());
    }

    fn resolve(&mut self, node: &Node, outcome: ResponseResult) {
        let id = node.id().unwrap_or_default();
        self.session.registry_mut().resolve(id, outcome);
    }

    fn on_error(&mut self, node: &Node) {
        let error = node.child("error");
        let response = ResponseError {
            code: error.map(|e| attr(e, "code")).unwrap_or_default(),
            message: error.map(|e| attr(e, "text")).unwrap_or_default(),
            backoff: error
                .and_then(|e| e.attribute("backoff"))
                .and_then(|b| b.parse().ok()),
        };
        let id = node.id().unwrap_or_default();
        tracing::debug!("Request {} failed: {}", id, response);

        if let Some(job) = self.media.abort(id) {
            if let Some(callback) = job.callback {
                callback(Err(response.clone()), id);
            }
        }
        self.session.registry_mut().resolve(id, Err(response));
    }

    fn send_receipts(&mut self, node: &Node) {
        let policy = self.config.features.send_receipts;
        let now = protocol::unix_timestamp();
        if policy.sends_delivery() {
            self.reply(&builders::receipt(node, None, now));
        }
        if policy.sends_read() {
            self.reply(&builders::receipt(node, Some("read"), now));
        }
    }

    fn on_receipt(&mut self, node: &Node) {
        let from = attr(node, "from");
        let kind = node.attribute("type").unwrap_or("received").to_string();
        // receipts carry `t`; some servers send `time` instead
        let time = node
            .attribute_i64("t")
            .or_else(|| node.attribute_i64("time"))
            .unwrap_or(0);

        let listed = node
            .child("list")
            .map(|list| {
                list.children()
                    .iter()
                    .filter_map(|item| item.id().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        for id in node.id().map(str::to_string).into_iter().chain(listed) {
            self.emitter.emit(Event::ClientReceived(ClientReceived {
                id,
                from: from.clone(),
                kind: kind.clone(),
                time,
            }));
        }
    }

    fn on_notification(&mut self, node: &Node) {
        let notification_id = attr(node, "id");
        let from = attr(node, "from");

        match node.attribute("type") {
            Some("w:gp2") => self.on_group_notification(node, notification_id),
            Some("status") => {
                let status = node.child_at(0).map(Node::payload_str).unwrap_or_default();
                self.emitter.emit(Event::StatusUpdated {
                    from,
                    status,
                    notification_id,
                });
            },
            Some("picture") => {
                if let Some(action) = node.child_at(0) {
                    self.emitter.emit(Event::PictureUpdated {
                        from,
                        action: action.tag().to_string(),
                        notification_id,
                    });
                }
            },
            other => tracing::trace!("Unhandled notification type {:?}", other),
        }
    }

    fn on_group_notification(&mut self, node: &Node, notification_id: String) {
        let Some(change) = node.child_at(0) else {
            return;
        };
        let group_id = protocol::jid_to_id(node.attribute("from").unwrap_or_default()).to_string();
        let by = attr(node, "participant");
        let time = node.attribute_i64("t").unwrap_or(0);

        match change.tag() {
            "create" => {
                if let Some(group) = change.child_at(0) {
                    self.emitter.emit(Event::GroupCreated {
                        group: Group::from_node(group),
                        notification_id,
                    });
                }
            },
            action if protocol::PARTICIPANT_ACTIONS.contains(&action) => {
                let participants = change
                    .children()
                    .iter()
                    .filter_map(|p| p.attribute("jid").map(str::to_string))
                    .collect();
                self.emitter.emit(Event::GroupParticipantsChanged {
                    change: ParticipantsChanged {
                        group_id,
                        action: action.to_string(),
                        by,
                        time,
                        participants,
                    },
                    notification_id,
                });
            },
            "subject" => {
                self.emitter.emit(Event::GroupSubjectChanged {
                    change: SubjectChanged {
                        group_id,
                        by,
                        time,
                        subject: attr(change, "subject"),
                    },
                    notification_id,
                });
            },
            other => tracing::trace!("Unhandled group notification <{}>", other),
        }
    }
}

fn attr(node: &Node, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn presence(node: &Node) -> Presence {
    let last_seen = match node.attribute("last") {
        Some("deny") | None => None,
        Some(last) => last.parse().ok(),
    };
    Presence {
        from: attr(node, "from"),
        kind: node.attribute("type").unwrap_or("available").to_string(),
        last_seen,
    }
}

fn participants_changed(node: &Node) -> Response {
    let change = node.child_at(0);
    let outcomes = change
        .map(|c| {
            c.children()
                .iter()
                .map(|p| ParticipantOutcome {
                    jid: attr(p, "jid"),
                    error: p.attribute("error").map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Response::ParticipantsChanged {
        action: change.map(|c| c.tag().to_string()).unwrap_or_default(),
        outcomes,
        group_id: protocol::jid_to_id(node.attribute("from").unwrap_or_default()).to_string(),
    }
}

fn name_value_map(node: &Node) -> BTreeMap<String, String> {
    node.children()
        .iter()
        .filter_map(|c| Some((c.attribute("name")?.to_string(), c.attribute("value")?.to_string())))
        .collect()
}
