use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;

use crate::error::{DownloadError, SnapError};
use crate::retry::retry_once_if;
use crate::store::PART_TEMP_PREFIX;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MediaResponse {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

pub trait MediaSource: Send + Sync {
    fn open(&self, url: &str) -> Result<MediaResponse, DownloadError>;
}

#[derive(Clone)]
pub struct MediaHttpClient {
    client: Client,
}

impl MediaHttpClient {
    pub fn new() -> Result<Self, SnapError> {
        // No overall timeout: bodies stream for as long as the transfer takes.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|err| SnapError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

impl MediaSource for MediaHttpClient {
    fn open(&self, url: &str) -> Result<MediaResponse, DownloadError> {
        let response = retry_once_if(
            || self.client.get(url).send().map_err(media_error),
            |err| matches!(err, DownloadError::Timeout),
        )?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status().as_u16()));
        }
        Ok(MediaResponse {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

/// Only a timed-out connect counts as a timeout; refused or reset connections fail at once.
fn media_error(err: reqwest::Error) -> DownloadError {
    if err.is_connect() && err.is_timeout() {
        DownloadError::Timeout
    } else {
        DownloadError::Http(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadOutcome {
    Downloaded,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    pub sleep_interval: Duration,
    pub skip_size_check: bool,
}

/// Idempotent single-file fetcher shared by every worker of a pool.
pub struct AssetDownloader<M: MediaSource> {
    source: Arc<M>,
    settings: DownloadSettings,
}

impl<M: MediaSource> Clone for AssetDownloader<M> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            settings: self.settings,
        }
    }
}

impl<M: MediaSource> AssetDownloader<M> {
    pub fn new(source: Arc<M>, settings: DownloadSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> DownloadSettings {
        self.settings
    }

    /// Same downloader without the rate-limit pause (avatars).
    pub fn without_sleep(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            settings: DownloadSettings {
                sleep_interval: Duration::ZERO,
                ..self.settings
            },
        }
    }

    pub fn download(&self, url: &str, path: &Path) -> Result<DownloadOutcome, DownloadError> {
        if self.settings.skip_size_check && path.is_file() {
            return Ok(DownloadOutcome::Skipped);
        }

        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|err| io_error(dir, err))?;
        }

        let mut response = self.source.open(url)?;

        if let Ok(existing) = fs::metadata(path) {
            if existing.is_file() && response.content_length == Some(existing.len()) {
                return Ok(DownloadOutcome::Skipped);
            }
        }

        tracing::info!("downloading new snap {}", display_name(path));
        let temp_dir = parent.unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(PART_TEMP_PREFIX)
            .tempfile_in(temp_dir)
            .map_err(|err| io_error(path, err))?;
        io::copy(&mut response.body, temp.as_file_mut()).map_err(|err| io_error(path, err))?;
        if path.exists() {
            fs::remove_file(path).map_err(|err| io_error(path, err))?;
        }
        temp.persist(path).map_err(|err| io_error(path, err.error))?;

        if !self.settings.sleep_interval.is_zero() {
            thread::sleep(self.settings.sleep_interval);
        }
        Ok(DownloadOutcome::Downloaded)
    }
}

fn io_error(path: &Path, err: io::Error) -> DownloadError {
    DownloadError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;

    #[derive(Default)]
    struct FakeMedia {
        body: Vec<u8>,
        declared: Option<u64>,
        status: Option<u16>,
        opened: Mutex<usize>,
    }

    impl MediaSource for FakeMedia {
        fn open(&self, _url: &str) -> Result<MediaResponse, DownloadError> {
            *self.opened.lock().unwrap() += 1;
            if let Some(status) = self.status {
                return Err(DownloadError::HttpStatus(status));
            }
            Ok(MediaResponse {
                content_length: self.declared,
                body: Box::new(Cursor::new(self.body.clone())),
            })
        }
    }

    fn downloader(media: FakeMedia, skip_size_check: bool) -> AssetDownloader<FakeMedia> {
        AssetDownloader::new(
            Arc::new(media),
            DownloadSettings {
                sleep_interval: Duration::ZERO,
                skip_size_check,
            },
        )
    }

    fn media(body: &[u8]) -> FakeMedia {
        FakeMedia {
            body: body.to_vec(),
            declared: Some(body.len() as u64),
            ..FakeMedia::default()
        }
    }

    #[test]
    fn fresh_download_creates_parent_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("a").join("b").join("snap.mp4");
        let outcome = downloader(media(b"video"), false)
            .download("https://cdn.test/x", &path)
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(fs::read(&path).unwrap(), b"video");
    }

    #[test]
    fn matching_size_is_skipped_and_untouched() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("snap.mp4");
        fs::write(&path, b"12345").unwrap();
        let outcome = downloader(media(b"abcde"), false)
            .download("https://cdn.test/x", &path)
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert_eq!(fs::read(&path).unwrap(), b"12345");
    }

    #[test]
    fn mismatched_size_is_replaced() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("snap.mp4");
        fs::write(&path, b"12").unwrap();
        let outcome = downloader(media(b"abcdef"), false)
            .download("https://cdn.test/x", &path)
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(fs::metadata(&path).unwrap().len(), 6);
    }

    #[test]
    fn fast_mode_skips_without_network() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("snap.mp4");
        fs::write(&path, b"old").unwrap();
        let fetcher = downloader(media(b"newer body"), true);
        let outcome = fetcher.download("https://cdn.test/x", &path).unwrap();
        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert_eq!(*fetcher.source.opened.lock().unwrap(), 0);
        assert_eq!(fs::read(&path).unwrap(), b"old");
    }

    #[test]
    fn http_error_leaves_file_alone() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("snap.mp4");
        fs::write(&path, b"keep").unwrap();
        let failing = FakeMedia {
            status: Some(404),
            ..FakeMedia::default()
        };
        let err = downloader(failing, false)
            .download("https://cdn.test/x", &path)
            .unwrap_err();
        assert_matches!(err, DownloadError::HttpStatus(404));
        assert_eq!(fs::read(&path).unwrap(), b"keep");
    }

    #[test]
    fn missing_length_always_replaces() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("snap.jpg");
        fs::write(&path, b"same").unwrap();
        let undeclared = FakeMedia {
            body: b"same".to_vec(),
            declared: None,
            ..FakeMedia::default()
        };
        let outcome = downloader(undeclared, false)
            .download("https://cdn.test/x", &path)
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
    }
}
