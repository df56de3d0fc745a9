//! Outbound request API.
//!
//! Every request mints an id with `prefix-<unix seconds>-<counter>`,
//! writes the node, and registers the optional callback under the id once
//! the write succeeded. Responses are only dispatched from the client's own
//! loop, so none can arrive in between. Methods return the minted id.

use std::path::Path;

use super::Client;
use crate::error::{Result, WaError};
use crate::media::{self, MediaJob, MediaType, PictureJob, RemoteMedia};
use crate::protocol::{self, builders, ids, Node};
use crate::session::{QueuedMessage, ResponseCallback};

/// Groups listing selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupListKind {
    /// Groups we are a member of
    Participating,
    /// Groups we own
    Owning,
}

impl GroupListKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Participating => "participating",
            Self::Owning => "owning",
        }
    }
}

/// Seconds added to unix time before scaling to 100ns ticks for a sync id
const FILETIME_EPOCH_OFFSET: i64 = 11_644_477_200;

impl Client {
    fn request(
        &mut self,
        prefix: &str,
        callback: Option<ResponseCallback>,
        build: impl FnOnce(&str) -> Node,
    ) -> Result<String> {
        let id = self.next_id(prefix);
        let node = build(&id);
        self.send_node(&node)?;
        if let Some(callback) = callback {
            self.register(&id, callback);
        }
        Ok(id)
    }

    fn jids(&self, numbers: &[&str]) -> Vec<String> {
        numbers
            .iter()
            .map(|id| protocol::jid(id, &self.config.server))
            .collect()
    }

    /// Wrap `content` in a message envelope and send it, or queue it until
    /// login completes. `callback` fires on the server ack.
    pub(crate) fn send_content(
        &mut self,
        to: &str,
        content: Node,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let to = protocol::jid(to, &self.config.server);
        let id = self.next_id(ids::MESSAGE);
        let node = builders::message(&to, &id, content, protocol::unix_timestamp());

        if !self.session.is_authenticated() {
            tracing::debug!("Queueing message {} until login", id);
            self.session.enqueue(QueuedMessage { to, node, callback });
            return Ok(id);
        }

        self.send_node(&node)?;
        if let Some(callback) = callback {
            self.register(&id, callback);
        }
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────

    /// Send a text message
    pub fn send_message(
        &mut self,
        to: &str,
        text: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.send_content(to, builders::text_body(text), callback)
    }

    /// Send a location
    pub fn send_location(
        &mut self,
        to: &str,
        latitude: f64,
        longitude: f64,
        name: Option<&str>,
        url: Option<&str>,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.send_content(to, builders::location(latitude, longitude, name, url), callback)
    }

    /// Send a contact card
    pub fn send_vcard(
        &mut self,
        to: &str,
        name: &str,
        data: &[u8],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.send_content(to, builders::vcard(name, data.to_vec()), callback)
    }

    /// Send a media file.
    ///
    /// Checks the file against the media table, then requests an upload
    /// slot; the message itself goes out once the upload and thumbnail are
    /// done. `callback` receives either the message ack or the media error.
    pub fn send_media(
        &mut self,
        to: &str,
        path: &Path,
        kind: MediaType,
        caption: Option<&str>,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let file = media::inspect(path, kind)?;
        let id = self.next_id(ids::UPLOAD);
        let to = protocol::jid(to, &self.config.server);
        let job = MediaJob::new(id.clone(), file, kind, to, self.config.account.msisdn.clone())
            .with_caption(caption.map(str::to_string))
            .with_callback(callback);

        if let Err(e) = self.request_media_slot(job) {
            self.media.abort(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Send a media file hosted behind an http(s) URL.
    ///
    /// The file is downloaded (following redirects) into a temporary copy
    /// that lives until the job ends; the copy then goes through the same
    /// checks and handshake as [`Client::send_media`]. Download and check
    /// errors reach `callback`.
    pub fn send_media_url(
        &mut self,
        to: &str,
        url: &str,
        kind: MediaType,
        caption: Option<&str>,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        if !media::is_remote(url) {
            return Err(WaError::Media(format!("Not an http(s) URL: {url}")));
        }
        let id = self.next_id(ids::UPLOAD);
        let remote = RemoteMedia {
            url: url.trim().to_string(),
            kind,
            to: protocol::jid(to, &self.config.server),
            from: self.config.account.msisdn.clone(),
            caption: caption.map(str::to_string),
            callback,
        };
        self.media.fetch(id.clone(), remote);
        Ok(id)
    }

    /// Track `job` and ask the server for an upload slot
    pub(crate) fn request_media_slot(&mut self, job: MediaJob) -> Result<()> {
        let node = builders::media_upload_request(
            &job.id,
            &job.file.hash,
            job.kind.as_str(),
            job.file.size,
            &self.config.server.domain,
        );
        self.media.start(job);
        self.send_node(&node)
    }

    /// Acknowledge a received message (delivery, or read when `read`)
    pub fn send_message_receipt(
        &mut self,
        message_id: &str,
        from: &str,
        author: Option<&str>,
        read: bool,
    ) -> Result<()> {
        let kind = read.then_some("read");
        let node = builders::message_receipt(
            from,
            message_id,
            author,
            kind,
            protocol::unix_timestamp(),
        );
        self.send_node(&node)
    }

    /// Announce availability
    pub fn send_presence(&mut self, available: bool) -> Result<()> {
        self.send_node(&builders::presence(available, None))
    }

    /// Send a typing indicator
    pub fn send_typing(&mut self, to: &str, composing: bool) -> Result<()> {
        let to = protocol::jid(to, &self.config.server);
        self.send_node(&builders::chatstate(&to, composing))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Contacts and profile
    // ─────────────────────────────────────────────────────────────────────

    /// Ask when a contact was last online
    pub fn request_last_seen(&mut self, who: &str, callback: Option<ResponseCallback>) -> Result<String> {
        let to = protocol::jid(who, &self.config.server);
        self.request(ids::LAST_SEEN, callback, |id| builders::last_seen(id, &to))
    }

    /// Fetch status texts of several contacts
    pub fn request_statuses(
        &mut self,
        numbers: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let jids = self.jids(numbers);
        let server = self.config.server.domain.clone();
        self.request(ids::GET_STATUS, callback, |id| builders::get_statuses(id, &jids, &server))
    }

    /// Change our status text
    pub fn set_status(&mut self, status: &str, callback: Option<ResponseCallback>) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::SET_STATUS, callback, |id| builders::set_status(id, status, &server))
    }

    /// Fetch a profile picture (the preview thumbnail when `preview`)
    pub fn request_profile_picture(
        &mut self,
        target: &str,
        preview: bool,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let to = protocol::jid(target, &self.config.server);
        self.request(ids::GET_PICTURE, callback, |id| {
            builders::get_profile_picture(id, &to, preview)
        })
    }

    /// Replace our profile picture with an image file.
    ///
    /// The file is read and previewed on a blocking task; the update goes
    /// out from the event loop once that finishes, and read or preview
    /// errors reach `callback`.
    pub fn set_profile_picture(
        &mut self,
        path: &Path,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        if !path.is_file() {
            return Err(WaError::Media(format!("Not an existing file: {}", path.display())));
        }
        let id = self.next_id(ids::SET_PICTURE);
        self.media.start_picture(PictureJob {
            id: id.clone(),
            to: self.session.self_jid().to_string(),
            path: path.to_path_buf(),
            callback,
        });
        Ok(id)
    }

    /// Check which numbers are registered.
    ///
    /// `mode` is `full` or `delta`, `context` is `registration`,
    /// `interactive` or `background`.
    pub fn request_contacts_sync(
        &mut self,
        numbers: &[&str],
        mode: &str,
        context: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let numbers: Vec<String> = numbers
            .iter()
            .map(|n| {
                if n.starts_with('+') {
                    (*n).to_string()
                } else {
                    format!("+{n}")
                }
            })
            .collect();
        let sid = ((protocol::unix_timestamp() + FILETIME_EPOCH_OFFSET) * 10_000_000).to_string();
        self.request(ids::SYNC, callback, |id| {
            builders::contacts_sync(id, &numbers, mode, context, &sid)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────

    /// List groups
    pub fn request_groups(
        &mut self,
        kind: GroupListKind,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let server = self.config.server.group_domain.clone();
        self.request(ids::GET_GROUPS, callback, |id| {
            builders::get_groups(id, kind.as_str(), &server)
        })
    }

    /// Fetch one group's details
    pub fn request_group_info(
        &mut self,
        group_id: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let group = protocol::jid(group_id, &self.config.server);
        self.request(ids::GROUP_INFO, callback, |id| builders::get_group_info(id, &group))
    }

    /// Create a group
    pub fn create_group(
        &mut self,
        subject: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let participants = self.jids(participants);
        let server = self.config.server.group_domain.clone();
        self.request(ids::CREATE_GROUP, callback, |id| {
            builders::create_group(id, subject, &participants, &server)
        })
    }

    fn change_participants(
        &mut self,
        action: &str,
        group_id: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let group = protocol::jid(group_id, &self.config.server);
        let participants = self.jids(participants);
        self.request(ids::PARTICIPANTS, callback, |id| {
            builders::group_participants(id, &group, action, &participants)
        })
    }

    /// Add members to a group
    pub fn add_participants(
        &mut self,
        group_id: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.change_participants("add", group_id, participants, callback)
    }

    /// Remove members from a group
    pub fn remove_participants(
        &mut self,
        group_id: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.change_participants("remove", group_id, participants, callback)
    }

    /// Make members admins
    pub fn promote_participants(
        &mut self,
        group_id: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.change_participants("promote", group_id, participants, callback)
    }

    /// Revoke admin rights
    pub fn demote_participants(
        &mut self,
        group_id: &str,
        participants: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        self.change_participants("demote", group_id, participants, callback)
    }

    /// Leave one or more groups
    pub fn leave_groups(
        &mut self,
        group_ids: &[&str],
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let groups = self.jids(group_ids);
        let server = self.config.server.group_domain.clone();
        self.request(ids::LEAVE_GROUPS, callback, |id| {
            builders::leave_groups(id, &groups, &server)
        })
    }

    /// Change a group's subject
    pub fn set_group_subject(
        &mut self,
        group_id: &str,
        subject: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let group = protocol::jid(group_id, &self.config.server);
        self.request(ids::SET_GROUP_SUBJECT, callback, |id| {
            builders::set_group_subject(id, &group, subject)
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Account
    // ─────────────────────────────────────────────────────────────────────

    /// Fetch server properties
    pub fn request_server_properties(&mut self, callback: Option<ResponseCallback>) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::PROPERTIES, callback, |id| builders::server_properties(id, &server))
    }

    /// Fetch the service price for a language and country
    pub fn request_service_pricing(
        &mut self,
        language: &str,
        country: &str,
        callback: Option<ResponseCallback>,
    ) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::PRICING, callback, |id| {
            builders::service_pricing(id, language, country, &server)
        })
    }

    /// Fetch privacy settings; the result arrives as a `PrivacySettings` event
    pub fn request_privacy_settings(&mut self) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::GET_PRIVACY, None, |id| builders::get_privacy_settings(id, &server))
    }

    /// Change one privacy setting (`last`, `status`, `profile` to `all`,
    /// `contacts` or `none`); confirmed by a `PrivacySettingsUpdated` event
    pub fn set_privacy_settings(&mut self, name: &str, value: &str) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::SET_PRIVACY, None, |id| {
            builders::set_privacy_settings(id, name, value, &server)
        })
    }

    /// Ask to extend the account; confirmed by an `AccountExtended` event
    pub fn request_extend_account(&mut self) -> Result<String> {
        let server = self.config.server.domain.clone();
        self.request(ids::EXTEND_ACCOUNT, None, |id| builders::extend_account(id, &server))
    }
}
