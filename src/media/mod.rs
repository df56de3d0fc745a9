//! Media attachments: type table, local file checks, and the two-phase
//! upload handshake.
//!
//! # Job Stages
//!
//! ```text
//! Downloading ──fetched──► Requested        (remote sources only)
//!     │
//!     └──error──► Failed
//!
//!            media-ready (duplicate)
//! Requested ─────────────────────────► Skipped ──thumbnail──► Done
//!     │                                   │
//!     │ media-ready (upload url)          └──error──► Failed
//!     ▼
//! Uploading ──uploaded──► Finalizing ──thumbnail──► Done
//!     │                        │
//!     └──error──► Failed ◄─────┘
//! ```
//!
//! Each arrow out of `Downloading`, `Uploading`, `Skipped` and
//! `Finalizing` is one [`MediaCompletion`] delivered by a background task;
//! the client feeds them back through [`MediaCoordinator::complete`] on its
//! own loop. Profile pictures take the same route for their thumbnail.

mod thumbnail;
mod upload;

pub use thumbnail::{ImageThumbnailer, Thumbnailer, THUMBNAIL_QUALITY, THUMBNAIL_SIZE};
pub use upload::{
    download_to_temp, upload_file_name, DownloadFuture, HttpUploader, UploadFuture, UploadRequest,
    Uploader,
};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use sha2::{Digest, Sha256};
use tempfile::TempPath;
use tokio::sync::mpsc;

use crate::error::{Result, WaError};
use crate::protocol::builders::{self, HostedMedia};
use crate::protocol::Node;
use crate::session::ResponseCallback;

const MB: u64 = 1024 * 1024;

/// Kinds of media the service accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Photos
    Image,
    /// Video clips
    Video,
    /// Audio clips and voice notes
    Audio,
    /// Contact cards
    Vcard,
}

impl MediaType {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Vcard => "vcard",
        }
    }

    /// Largest accepted file size in bytes
    pub fn max_size(self) -> u64 {
        match self {
            Self::Image => 5 * MB,
            Self::Video => 20 * MB,
            Self::Audio | Self::Vcard => 10 * MB,
        }
    }

    /// Accepted MIME types
    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            Self::Image => &["image/png", "image/jpeg", "image/jpg"],
            Self::Video => &["video/mp4", "video/quicktime", "video/x-msvideo"],
            Self::Audio => &[
                "video/3gpp",
                "audio/x-caf",
                "audio/x-wav",
                "audio/wav",
                "audio/mpeg",
                "audio/x-ms-wma",
                "video/ogg",
                "audio/x-aiff",
                "audio/aiff",
                "audio/x-aac",
                "audio/aac",
            ],
            Self::Vcard => &[
                "text/x-vcard",
                "text/vcard",
                "text/directory;profile=vCard",
                "text/directory",
            ],
        }
    }

    /// Whether a file of this MIME type may be sent as this media type
    pub fn accepts(self, mime: &str) -> bool {
        self.mime_types().contains(&mime)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = WaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "vcard" => Ok(Self::Vcard),
            other => Err(WaError::Media(format!("Invalid file type: {other}"))),
        }
    }
}

/// A local file checked against the media table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    /// Path on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Detected MIME type
    pub mime: String,
    /// Base64 SHA-256 of the contents
    pub hash: String,
}

/// Whether `source` names an http(s) resource rather than a local path
pub fn is_remote(source: &str) -> bool {
    let lower = source.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Check a local file against the limits of `kind` and hash it
pub fn inspect(path: &Path, kind: MediaType) -> Result<MediaFile> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| WaError::Media(format!("Not an existing file: {}", path.display())))?;
    if !metadata.is_file() {
        return Err(WaError::Media(format!("Not a regular file: {}", path.display())));
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mime = mime.essence_str().to_string();
    if !kind.accepts(&mime) {
        return Err(WaError::Media(format!("Invalid file mime type: {mime}")));
    }

    let size = metadata.len();
    if size > kind.max_size() {
        return Err(WaError::Media(format!(
            "Media file too big (max size is {}; file size is {size})",
            kind.max_size()
        )));
    }

    let data = std::fs::read(path)?;
    let hash = base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&data));

    Ok(MediaFile {
        path: path.to_path_buf(),
        size,
        mime,
        hash,
    })
}

/// Progress of one attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaStage {
    /// Fetching a remote source into a temporary file
    Downloading,
    /// Upload slot requested, waiting for media-ready
    Requested,
    /// Uploading to the granted slot
    Uploading,
    /// Server already hosts the file; generating the thumbnail
    Skipped,
    /// Uploaded; generating the thumbnail
    Finalizing,
    /// Content node handed to the message path
    Done,
    /// Aborted; the callback got the error
    Failed,
}

/// One in-flight attachment
pub struct MediaJob {
    /// Request id of the upload-slot request
    pub id: String,
    /// Checked local file
    pub file: MediaFile,
    /// Declared media type
    pub kind: MediaType,
    /// Recipient address
    pub to: String,
    /// Own account number
    pub from: String,
    /// Optional caption
    pub caption: Option<String>,
    /// Delivery-ack callback supplied by the caller
    pub callback: Option<ResponseCallback>,
    stage: MediaStage,
    hosted: Option<HostedMedia>,
    temp: Option<TempPath>,
}

impl MediaJob {
    /// Create a job in the `Requested` stage
    pub fn new(
        id: impl Into<String>,
        file: MediaFile,
        kind: MediaType,
        to: impl Into<String>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            file,
            kind,
            to: to.into(),
            from: from.into(),
            caption: None,
            callback: None,
            stage: MediaStage::Requested,
            hosted: None,
            temp: None,
        }
    }

    /// Attach a caption
    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption.filter(|c| !c.is_empty());
        self
    }

    /// Attach the delivery-ack callback
    pub fn with_callback(mut self, callback: Option<ResponseCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Keep a downloaded copy alive until the job is dropped
    pub fn with_temp_file(mut self, temp: TempPath) -> Self {
        self.temp = Some(temp);
        self
    }

    /// Temporary copy of a downloaded source, removed with the job
    pub fn temp_file(&self) -> Option<&Path> {
        self.temp.as_deref()
    }

    /// Current stage
    pub fn stage(&self) -> MediaStage {
        self.stage
    }
}

/// An attachment behind an http(s) URL, waiting for its download
pub struct RemoteMedia {
    /// Source URL
    pub url: String,
    /// Declared media type
    pub kind: MediaType,
    /// Recipient address
    pub to: String,
    /// Own account number
    pub from: String,
    /// Optional caption
    pub caption: Option<String>,
    /// Delivery-ack callback supplied by the caller
    pub callback: Option<ResponseCallback>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("url", &self.url)
            .field("kind", &self.kind)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// A profile picture change waiting for its preview
pub struct PictureJob {
    /// Request id of the picture update
    pub id: String,
    /// Own address
    pub to: String,
    /// Image on disk
    pub path: PathBuf,
    /// Callback for the server ack
    pub callback: Option<ResponseCallback>,
}

impl fmt::Debug for PictureJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PictureJob")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Full image and preview of a profile picture
pub type PictureData = (Vec<u8>, Vec<u8>);

impl fmt::Debug for MediaJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaJob")
            .field("id", &self.id)
            .field("path", &self.file.path)
            .field("kind", &self.kind)
            .field("to", &self.to)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

/// Result of a background step, fed back into the coordinator
#[derive(Debug)]
pub enum MediaCompletion {
    /// Remote source fetched
    Downloaded {
        /// Job id
        id: String,
        /// Temporary copy or error text
        result: std::result::Result<TempPath, String>,
    },
    /// Profile picture read and previewed
    PictureReady {
        /// Request id
        id: String,
        /// Image and preview bytes or error text
        result: std::result::Result<PictureData, String>,
    },
    /// Upload finished
    Uploaded {
        /// Job id
        id: String,
        /// Hosted location or error text
        result: std::result::Result<HostedMedia, String>,
    },
    /// Thumbnail generation finished
    ThumbnailReady {
        /// Job id
        id: String,
        /// JPEG bytes (empty for types without preview) or error text
        result: std::result::Result<Vec<u8>, String>,
    },
}

/// What the client has to do after a coordinator transition
#[derive(Debug)]
pub enum MediaOutcome {
    /// Nothing yet; a background step is running
    Pending,
    /// No job for this id (late or duplicate response)
    Unknown,
    /// Send `content` to `job.to` with the job's callback
    Ready {
        /// Finished job
        job: MediaJob,
        /// Final media content node
        content: Node,
    },
    /// Report `error` to the job's callback
    Failed {
        /// Failed job
        job: MediaJob,
        /// Error text
        error: String,
    },
    /// Download finished and the copy passed the media checks; request
    /// an upload slot for `job`
    Fetched {
        /// Job in the `Requested` stage
        job: MediaJob,
    },
    /// Download or media checks failed; report `error` to the callback
    Rejected {
        /// Job id
        id: String,
        /// The remote attachment
        remote: RemoteMedia,
        /// Error text
        error: String,
    },
    /// Send the picture update, or report the error to the callback
    Picture {
        /// Pending picture change
        job: PictureJob,
        /// Image and preview bytes or error text
        result: std::result::Result<PictureData, String>,
    },
}

/// Tracks media jobs and runs their upload and thumbnail steps
pub struct MediaCoordinator {
    downloading: HashMap<String, RemoteMedia>,
    pictures: HashMap<String, PictureJob>,
    requested: HashMap<String, MediaJob>,
    in_flight: HashMap<String, MediaJob>,
    uploader: Arc<dyn Uploader>,
    thumbnailer: Arc<dyn Thumbnailer>,
    tx: mpsc::UnboundedSender<MediaCompletion>,
    rx: mpsc::UnboundedReceiver<MediaCompletion>,
}

impl fmt::Debug for MediaCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaCoordinator")
            .field("downloading", &self.downloading.len())
            .field("requested", &self.requested.len())
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl MediaCoordinator {
    /// Create a coordinator with the given collaborators
    pub fn new(uploader: Arc<dyn Uploader>, thumbnailer: Arc<dyn Thumbnailer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            downloading: HashMap::new(),
            pictures: HashMap::new(),
            requested: HashMap::new(),
            in_flight: HashMap::new(),
            uploader,
            thumbnailer,
            tx,
            rx,
        }
    }

    /// Replace the uploader
    pub fn set_uploader(&mut self, uploader: Arc<dyn Uploader>) {
        self.uploader = uploader;
    }

    /// Replace the thumbnailer
    pub fn set_thumbnailer(&mut self, thumbnailer: Arc<dyn Thumbnailer>) {
        self.thumbnailer = thumbnailer;
    }

    /// Record a job whose slot request is about to be sent
    pub fn start(&mut self, job: MediaJob) {
        self.requested.insert(job.id.clone(), job);
    }

    /// Fetch a remote attachment; its job starts once the copy passes
    /// [`inspect`]
    pub fn fetch(&mut self, id: impl Into<String>, remote: RemoteMedia) {
        let id = id.into();
        let download = self.uploader.download(remote.url.clone(), remote.kind.max_size());
        let tx = self.tx.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            let result = download.await.map_err(|e| e.to_string());
            let _ = tx.send(MediaCompletion::Downloaded { id: task_id, result });
        });
        self.downloading.insert(id, remote);
    }

    /// Read a profile picture and build its preview off the caller's loop
    pub fn start_picture(&mut self, job: PictureJob) {
        let path = job.path.clone();
        let thumbnailer = Arc::clone(&self.thumbnailer);
        let tx = self.tx.clone();
        let id = job.id.clone();

        tokio::spawn(async move {
            let work = move || -> Result<PictureData> {
                let picture = std::fs::read(&path)?;
                let preview = thumbnailer.image_thumbnail(&path)?;
                Ok((picture, preview))
            };
            let result = match tokio::task::spawn_blocking(work).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("Picture task failed: {e}")),
            };
            let _ = tx.send(MediaCompletion::PictureReady { id, result });
        });
        self.pictures.insert(job.id.clone(), job);
    }

    /// Remote sources still downloading
    pub fn downloading(&self) -> usize {
        self.downloading.len()
    }

    /// Picture changes waiting for their preview
    pub fn pictures(&self) -> usize {
        self.pictures.len()
    }

    /// Jobs waiting for their media-ready response
    pub fn requested(&self) -> usize {
        self.requested.len()
    }

    /// Jobs uploading or generating thumbnails
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stage of a job still tracked
    pub fn stage(&self, id: &str) -> Option<MediaStage> {
        if self.downloading.contains_key(id) {
            return Some(MediaStage::Downloading);
        }
        self.requested
            .get(id)
            .or_else(|| self.in_flight.get(id))
            .map(MediaJob::stage)
    }

    /// Remove a job still waiting for media-ready (server answered with an error)
    pub fn abort(&mut self, id: &str) -> Option<MediaJob> {
        self.requested.remove(id).map(|mut job| {
            job.stage = MediaStage::Failed;
            job
        })
    }

    /// Handle a media-ready response: skip or start the upload
    pub fn on_media_ready(&mut self, node: &Node) -> MediaOutcome {
        let Some(id) = node.id() else {
            return MediaOutcome::Unknown;
        };
        let Some(mut job) = self.requested.remove(id) else {
            tracing::warn!("Media ready for unknown job {}", id);
            return MediaOutcome::Unknown;
        };

        if let Some(duplicate) = node.child("duplicate") {
            let url = duplicate.attribute("url").unwrap_or_default();
            let hosted = HostedMedia {
                url: url.to_string(),
                kind: duplicate
                    .attribute("type")
                    .unwrap_or(job.kind.as_str())
                    .to_string(),
                size: duplicate
                    .attribute("size")
                    .map_or_else(|| job.file.size.to_string(), str::to_string),
                file: url.rsplit('/').next().unwrap_or_default().to_string(),
            };
            tracing::debug!("Media {} already hosted at {}", job.id, hosted.url);

            job.stage = MediaStage::Skipped;
            self.spawn_thumbnail(&job, &hosted);
            job.hosted = Some(hosted);
            self.in_flight.insert(job.id.clone(), job);
            return MediaOutcome::Pending;
        }

        let Some(url) = node.child("media").and_then(|m| m.attribute("url")) else {
            job.stage = MediaStage::Failed;
            return MediaOutcome::Failed {
                job,
                error: "Media ready response without upload url".to_string(),
            };
        };

        let request = UploadRequest {
            url: url.to_string(),
            path: job.file.path.clone(),
            mime: job.file.mime.clone(),
            to: job.to.clone(),
            from: job.from.clone(),
        };
        let upload = self.uploader.upload(request);
        let tx = self.tx.clone();
        let id = job.id.clone();
        tokio::spawn(async move {
            let result = upload.await.map_err(|e| e.to_string());
            let _ = tx.send(MediaCompletion::Uploaded { id, result });
        });

        job.stage = MediaStage::Uploading;
        self.in_flight.insert(job.id.clone(), job);
        MediaOutcome::Pending
    }

    /// Wait for the next background step to finish
    pub async fn next_completion(&mut self) -> Option<MediaCompletion> {
        self.rx.recv().await
    }

    /// Apply a finished background step
    pub fn complete(&mut self, completion: MediaCompletion) -> MediaOutcome {
        match completion {
            MediaCompletion::Downloaded { id, result } => {
                let Some(remote) = self.downloading.remove(&id) else {
                    return MediaOutcome::Unknown;
                };
                let checked = result.and_then(|temp| {
                    inspect(&temp, remote.kind)
                        .map(|file| (temp, file))
                        .map_err(|e| e.to_string())
                });
                match checked {
                    Ok((temp, file)) => {
                        tracing::debug!("Fetched {} into {}", remote.url, file.path.display());
                        let job = MediaJob::new(id, file, remote.kind, remote.to, remote.from)
                            .with_caption(remote.caption)
                            .with_callback(remote.callback)
                            .with_temp_file(temp);
                        MediaOutcome::Fetched { job }
                    },
                    Err(error) => MediaOutcome::Rejected { id, remote, error },
                }
            },
            MediaCompletion::PictureReady { id, result } => match self.pictures.remove(&id) {
                Some(job) => MediaOutcome::Picture { job, result },
                None => MediaOutcome::Unknown,
            },
            MediaCompletion::Uploaded { id, result } => {
                let Some(mut job) = self.in_flight.remove(&id) else {
                    return MediaOutcome::Unknown;
                };
                match result {
                    Ok(hosted) => {
                        job.stage = MediaStage::Finalizing;
                        self.spawn_thumbnail(&job, &hosted);
                        job.hosted = Some(hosted);
                        self.in_flight.insert(id, job);
                        MediaOutcome::Pending
                    },
                    Err(error) => {
                        job.stage = MediaStage::Failed;
                        MediaOutcome::Failed { job, error }
                    },
                }
            },
            MediaCompletion::ThumbnailReady { id, result } => {
                let Some(mut job) = self.in_flight.remove(&id) else {
                    return MediaOutcome::Unknown;
                };
                match (result, job.hosted.take()) {
                    (Ok(thumbnail), Some(hosted)) => {
                        job.stage = MediaStage::Done;
                        let content =
                            builders::media_content(&hosted, job.caption.as_deref(), thumbnail);
                        MediaOutcome::Ready { job, content }
                    },
                    (Err(error), _) => {
                        job.stage = MediaStage::Failed;
                        MediaOutcome::Failed { job, error }
                    },
                    (Ok(_), None) => {
                        job.stage = MediaStage::Failed;
                        MediaOutcome::Failed {
                            job,
                            error: "Thumbnail finished before upload".to_string(),
                        }
                    },
                }
            },
        }
    }

    fn spawn_thumbnail(&self, job: &MediaJob, hosted: &HostedMedia) {
        let kind = hosted.kind.parse().unwrap_or(job.kind);
        let path = job.file.path.clone();
        let thumbnailer = Arc::clone(&self.thumbnailer);
        let tx = self.tx.clone();
        let id = job.id.clone();

        tokio::spawn(async move {
            let result =
                match tokio::task::spawn_blocking(move || thumbnailer.thumbnail(&path, kind)).await
                {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("Thumbnail task failed: {e}")),
                };
            let _ = tx.send(MediaCompletion::ThumbnailReady { id, result });
        });
    }
}
