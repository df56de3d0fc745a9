//! Multipart upload of media files to the slot granted by the server,
//! and download of remote sources into temporary files.

use std::path::PathBuf;

use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tempfile::TempPath;

use crate::error::{Result, WaError};
use crate::protocol::builders::HostedMedia;

/// Everything needed to upload one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// Upload URL from the media-ready response
    pub url: String,
    /// Local file
    pub path: PathBuf,
    /// MIME type of the file
    pub mime: String,
    /// Recipient address
    pub to: String,
    /// Own account number
    pub from: String,
}

/// Future returned by [`Uploader::upload`]
pub type UploadFuture = BoxFuture<'static, Result<HostedMedia>>;

/// Future returned by [`Uploader::download`]
pub type DownloadFuture = BoxFuture<'static, Result<TempPath>>;

/// Raw byte transfer to and from the media host
pub trait Uploader: Send + Sync {
    /// Upload a file and report where it is hosted
    fn upload(&self, request: UploadRequest) -> UploadFuture;

    /// Fetch `url` into a temporary file removed when the path is dropped.
    /// Bodies larger than `max_size` are refused.
    fn download(&self, url: String, max_size: u64) -> DownloadFuture {
        Box::pin(download_to_temp(reqwest::Client::new(), url, max_size))
    }
}

/// GET `url` (following redirects) and store the body in a temporary file.
///
/// The file keeps the extension of the final URL, or one matching the
/// response content type, so MIME detection works on the copy.
pub async fn download_to_temp(client: reqwest::Client, url: String, max_size: u64) -> Result<TempPath> {
    tracing::debug!("Downloading {}", url);
    let response = client.get(&url).send().await?.error_for_status()?;

    let too_big = |size: u64| {
        WaError::Media(format!(
            "Media file too big (max size is {max_size}; file size is {size})"
        ))
    };
    if let Some(length) = response.content_length().filter(|&l| l > max_size) {
        return Err(too_big(length));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let suffix = download_extension(response.url(), content_type.as_deref())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let data = response.bytes().await?;
    if data.len() as u64 > max_size {
        return Err(too_big(data.len() as u64));
    }

    let path = tempfile::Builder::new()
        .prefix("whatsapi-")
        .suffix(&suffix)
        .tempfile()?
        .into_temp_path();
    tokio::fs::write(&path, &data).await?;
    tracing::debug!("Stored {} bytes from {} in {}", data.len(), url, path.display());
    Ok(path)
}

/// Extension for a downloaded file: the URL's when known, else the
/// content type's
fn download_extension(url: &reqwest::Url, content_type: Option<&str>) -> Option<String> {
    let from_url = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| mime_guess::from_ext(ext).first().is_some());

    from_url.or_else(|| {
        let essence = content_type?.split(';').next()?.trim();
        mime_guess::get_mime_extensions_str(essence)
            .and_then(|exts| exts.first())
            .map(|ext| (*ext).to_string())
    })
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
    #[serde(rename = "type")]
    kind: String,
    size: serde_json::Value,
    name: String,
}

impl From<UploadResponse> for HostedMedia {
    fn from(response: UploadResponse) -> Self {
        let size = match response.size {
            serde_json::Value::String(size) => size,
            other => other.to_string(),
        };
        Self {
            url: response.url,
            kind: response.kind,
            size,
            file: response.name,
        }
    }
}

/// reqwest-based multipart uploader
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
}

impl HttpUploader {
    /// Create an uploader sending `user_agent` on every request
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| WaError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Upload file name: hex SHA-256 of the local path plus the MIME extension
pub fn upload_file_name(request: &UploadRequest) -> String {
    let digest = Sha256::digest(request.path.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

    let ext = mime_guess::get_mime_extensions_str(&request.mime)
        .and_then(|exts| exts.first().copied())
        .or_else(|| request.path.extension().and_then(|e| e.to_str()));

    match ext {
        Some(ext) => format!("{hex}.{ext}"),
        None => hex,
    }
}

impl Uploader for HttpUploader {
    fn download(&self, url: String, max_size: u64) -> DownloadFuture {
        Box::pin(download_to_temp(self.client.clone(), url, max_size))
    }

    fn upload(&self, request: UploadRequest) -> UploadFuture {
        let client = self.client.clone();

        Box::pin(async move {
            let data = tokio::fs::read(&request.path).await?;
            let file_name = upload_file_name(&request);

            tracing::debug!(
                "Uploading {} ({} bytes) to {}",
                request.path.display(),
                data.len(),
                request.url
            );

            let part = reqwest::multipart::Part::bytes(data)
                .file_name(file_name)
                .mime_str(&request.mime)?;
            let form = reqwest::multipart::Form::new()
                .text("to", request.to)
                .text("from", request.from)
                .part("file", part);

            let response: UploadResponse = client
                .post(&request.url)
                .multipart(form)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .map_err(|e| WaError::Upload(format!("Unexpected upload response: {e}")))?;

            Ok(response.into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP/1.1 responder: one response per connection
    async fn serve(routes: Vec<(&'static str, String, Vec<u8>)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let line = String::from_utf8_lossy(&request).lines().next().unwrap_or_default().to_string();
                let path = line.split(' ').nth(1).unwrap_or_default().to_string();

                let (head, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, head, body)| (head.clone(), body.clone()))
                    .unwrap_or_else(|| ("HTTP/1.1 404 Not Found\r\n".to_string(), Vec::new()));
                let response = format!(
                    "{head}Content-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.write_all(&body).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        base
    }

    #[tokio::test]
    async fn test_download_follows_redirect() {
        let base = serve(vec![
            (
                "/latest",
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

        let path = download_to_temp(reqwest::Client::new(), format!("{base}/latest"), 1024)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"pngdata");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));

        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }

    #[tokio::test]
    async fn test_download_errors() {
        let base = serve(vec![(
            "/big",
            "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\n".to_string(),
            vec![0u8; 64],
        )])
        .await;

        let missing = download_to_temp(reqwest::Client::new(), format!("{base}/gone.png"), 1024).await;
        assert!(matches!(missing, Err(WaError::Upload(_))));

        let big = download_to_temp(reqwest::Client::new(), format!("{base}/big"), 16).await;
        assert!(matches!(big, Err(WaError::Media(ref m)) if m.contains("too big")));
    }

    #[test]
    fn test_download_extension() {
        let url = reqwest::Url::parse("https://cdn.example/a/clip.MP4?sig=1").unwrap();
        assert_eq!(download_extension(&url, Some("application/octet-stream")).as_deref(), Some("mp4"));

        let bare = reqwest::Url::parse("https://cdn.example/latest").unwrap();
        assert_eq!(download_extension(&bare, Some("image/png; charset=binary")).as_deref(), Some("png"));
        assert_eq!(download_extension(&bare, None), None);
    }

    fn request(path: &str, mime: &str) -> UploadRequest {
        UploadRequest {
            url: "https://mms.example/u/abc".to_string(),
            path: PathBuf::from(path),
            mime: mime.to_string(),
            to: "491234@s.whatsapp.net".to_string(),
            from: "495678".to_string(),
        }
    }

    #[test]
    fn test_upload_file_name() {
        let name = upload_file_name(&request("/tmp/photo.jpeg", "image/jpeg"));
        let (hash, ext) = name.split_once('.').unwrap();
        assert_eq!(hash.len(), 64);
        assert!(!ext.is_empty());

        // same path, same name
        assert_eq!(name, upload_file_name(&request("/tmp/photo.jpeg", "image/jpeg")));
    }

    #[test]
    fn test_upload_file_name_falls_back_to_path_extension() {
        let name = upload_file_name(&request("/tmp/clip.xyz", "application/x-unknown-type"));
        assert!(name.ends_with(".xyz"));
    }

    #[test]
    fn test_upload_response_size_forms() {
        let numeric: UploadResponse = serde_json::from_str(
            r#"{"url":"https://mms.example/f/a.jpg","type":"image","size":1024,"name":"a.jpg"}"#,
        )
        .unwrap();
        let hosted: HostedMedia = numeric.into();
        assert_eq!(hosted.size, "1024");
        assert_eq!(hosted.file, "a.jpg");

        let text: UploadResponse = serde_json::from_str(
            r#"{"url":"u","type":"audio","size":"77","name":"b.mp3"}"#,
        )
        .unwrap();
        assert_eq!(HostedMedia::from(text).size, "77");
    }
}
