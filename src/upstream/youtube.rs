//! YouTube operations: captions, video metadata, playlist listings
//!
//! Each request goes through a client bound to a single proxy. Captions come
//! from the timedtext endpoint in json3 form, metadata from oEmbed, listings
//! from the playlist page.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::http::{client_for, failure_from_error, outcome_for_status, DEFAULT_USER_AGENT};
use super::{OperationKind, UpstreamOperation};
use crate::error::{Result, RotaError};
use crate::models::{EmptyReason, FailureCause, Proxy, RetryOutcome};

pub const DEFAULT_BASE_URL: &str = "https://www.youtube.com";

static VIDEO_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("valid regex"));
static OG_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<meta property="og:title" content="([^"]*)""#).expect("valid regex")
});
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

const BLOCK_PAGE_MARKERS: &[&str] = &[
    "our systems have detected unusual traffic",
    "www.google.com/sorry/",
];

const MISSING_PLAYLIST_MARKERS: &[&str] = &[
    "this playlist does not exist",
    "the playlist does not exist",
    "this playlist is private",
];

/// Title, channel and id of one video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel: String,
}

impl VideoMetadata {
    /// Stand-in used when the upstream has no metadata for the video
    pub fn placeholder(video_id: &str) -> Self {
        Self {
            id: video_id.to_string(),
            title: format!("video_{}", video_id),
            channel: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistListing {
    pub id: String,
    pub title: String,
    pub videos: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct Json3Transcript {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
struct Json3Event {
    #[serde(default)]
    segs: Vec<Json3Segment>,
}

#[derive(Debug, Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
}

/// Endpoint configuration shared by the YouTube operations
#[derive(Debug, Clone)]
pub struct YoutubeApi {
    base_url: Url,
    language: String,
    timeout: Duration,
}

impl YoutubeApi {
    pub fn new(base_url: &str, language: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| RotaError::InvalidConfig(format!("invalid upstream base URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            language: language.into(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        // `path` is a fixed relative segment; joining onto a base ending in '/' cannot fail
        self.base_url
            .join(path)
            .unwrap_or_else(|_| self.base_url.clone())
    }

    pub fn watch_url(&self, video_id: &str) -> Url {
        let mut url = self.endpoint("watch");
        url.query_pairs_mut().append_pair("v", video_id);
        url
    }

    pub fn transcript_url(&self, video_id: &str) -> Url {
        let mut url = self.endpoint("api/timedtext");
        url.query_pairs_mut()
            .append_pair("v", video_id)
            .append_pair("lang", &self.language)
            .append_pair("fmt", "json3");
        url
    }

    pub fn metadata_url(&self, video_id: &str) -> Url {
        let watch = self.watch_url(video_id);
        let mut url = self.endpoint("oembed");
        url.query_pairs_mut()
            .append_pair("url", watch.as_str())
            .append_pair("format", "json");
        url
    }

    pub fn listing_url(&self, playlist_id: &str) -> Url {
        let mut url = self.endpoint("playlist");
        url.query_pairs_mut().append_pair("list", playlist_id);
        url
    }

    pub fn homepage_url(&self) -> Url {
        self.base_url.clone()
    }

    /// GET `url` through `proxy`, returning the body of a successful response
    async fn fetch_body<T>(&self, proxy: &Proxy, url: Url) -> std::result::Result<String, RetryOutcome<T>> {
        let client = client_for(proxy, self.timeout, DEFAULT_USER_AGENT)
            .map_err(RetryOutcome::TransientFailure)?;

        debug!("GET {} via {}", url, proxy);
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| RetryOutcome::TransientFailure(failure_from_error(&e)))?;

        if let Some(outcome) = outcome_for_status(response.status()) {
            return Err(outcome);
        }

        let body = response
            .text()
            .await
            .map_err(|e| RetryOutcome::TransientFailure(failure_from_error(&e)))?;

        if is_block_page(&body) {
            return Err(RetryOutcome::TransientFailure(FailureCause::rate_limited(
                "upstream served a block page",
            )));
        }

        Ok(body)
    }
}

fn is_block_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    BLOCK_PAGE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Flatten a json3 caption document to a single line of text
pub fn parse_json3_transcript(body: &str) -> std::result::Result<String, serde_json::Error> {
    let doc: Json3Transcript = serde_json::from_str(body)?;

    let parts: Vec<&str> = doc
        .events
        .iter()
        .flat_map(|event| event.segs.iter())
        .filter_map(|seg| seg.utf8.as_deref())
        .collect();

    let joined = parts.join(" ").replace(['\n', '\r'], " ");
    Ok(WHITESPACE_RE.replace_all(&joined, " ").trim().to_string())
}

pub fn parse_oembed(body: &str, video_id: &str) -> std::result::Result<VideoMetadata, serde_json::Error> {
    let doc: OEmbed = serde_json::from_str(body)?;
    Ok(VideoMetadata {
        id: video_id.to_string(),
        title: doc.title.unwrap_or_else(|| "Unknown".to_string()),
        channel: doc.author_name.unwrap_or_else(|| "Unknown".to_string()),
    })
}

/// Extract the playlist's videos in page order, without duplicates
pub fn parse_playlist_page(
    api: &YoutubeApi,
    html: &str,
    playlist_id: &str,
) -> RetryOutcome<PlaylistListing> {
    let mut videos: Vec<PlaylistEntry> = Vec::new();
    for caps in VIDEO_ID_RE.captures_iter(html) {
        let id = &caps[1];
        if !videos.iter().any(|entry| entry.id == id) {
            videos.push(PlaylistEntry {
                id: id.to_string(),
                url: api.watch_url(id).to_string(),
            });
        }
    }

    if videos.is_empty() {
        let lower = html.to_lowercase();
        let reason = if MISSING_PLAYLIST_MARKERS.iter().any(|m| lower.contains(m)) {
            EmptyReason::TargetUnavailable
        } else {
            EmptyReason::NoData
        };
        return RetryOutcome::EmptyResult(reason);
    }

    let title = OG_TITLE_RE
        .captures(html)
        .map(|caps| html_escape::decode_html_entities(&caps[1]).into_owned())
        .unwrap_or_else(|| "Playlist".to_string());

    RetryOutcome::Success(PlaylistListing {
        id: playlist_id.to_string(),
        title,
        videos,
    })
}

/// Downloads the caption text of a video
pub struct TranscriptOperation {
    api: Arc<YoutubeApi>,
}

impl TranscriptOperation {
    pub fn new(api: Arc<YoutubeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UpstreamOperation for TranscriptOperation {
    type Output = String;

    fn kind(&self) -> OperationKind {
        OperationKind::Transcript
    }

    async fn attempt(&self, video_id: &str, proxy: &Proxy) -> RetryOutcome<String> {
        let body = match self.api.fetch_body(proxy, self.api.transcript_url(video_id)).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        if body.trim().is_empty() {
            return RetryOutcome::EmptyResult(EmptyReason::NoData);
        }

        match parse_json3_transcript(&body) {
            Ok(text) if text.is_empty() => RetryOutcome::EmptyResult(EmptyReason::NoData),
            Ok(text) => RetryOutcome::Success(text),
            // A proxy that rewrites responses is as good as broken
            Err(e) => RetryOutcome::TransientFailure(FailureCause::network(format!(
                "malformed caption document: {}",
                e
            ))),
        }
    }
}

/// Looks up title and channel of a video
pub struct MetadataOperation {
    api: Arc<YoutubeApi>,
}

impl MetadataOperation {
    pub fn new(api: Arc<YoutubeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UpstreamOperation for MetadataOperation {
    type Output = VideoMetadata;

    fn kind(&self) -> OperationKind {
        OperationKind::Metadata
    }

    async fn attempt(&self, video_id: &str, proxy: &Proxy) -> RetryOutcome<VideoMetadata> {
        let body = match self.api.fetch_body(proxy, self.api.metadata_url(video_id)).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        match parse_oembed(&body, video_id) {
            Ok(metadata) => RetryOutcome::Success(metadata),
            Err(e) => RetryOutcome::TransientFailure(FailureCause::network(format!(
                "malformed oEmbed document: {}",
                e
            ))),
        }
    }
}

/// Lists the videos of a playlist
pub struct ListingOperation {
    api: Arc<YoutubeApi>,
}

impl ListingOperation {
    pub fn new(api: Arc<YoutubeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UpstreamOperation for ListingOperation {
    type Output = PlaylistListing;

    fn kind(&self) -> OperationKind {
        OperationKind::Listing
    }

    async fn attempt(&self, playlist_id: &str, proxy: &Proxy) -> RetryOutcome<PlaylistListing> {
        match self.api.fetch_body(proxy, self.api.listing_url(playlist_id)).await {
            Ok(html) => parse_playlist_page(&self.api, &html, playlist_id),
            Err(outcome) => outcome,
        }
    }
}

/// Health probe: caption endpoint first, homepage as fallback.
///
/// A proxy that reaches the homepage but gets refused on captions is
/// reported as rate-limited rather than dead.
pub struct ProbeOperation {
    api: Arc<YoutubeApi>,
}

impl ProbeOperation {
    pub fn new(api: Arc<YoutubeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl UpstreamOperation for ProbeOperation {
    type Output = ();

    fn kind(&self) -> OperationKind {
        OperationKind::Probe
    }

    async fn attempt(&self, video_id: &str, proxy: &Proxy) -> RetryOutcome<()> {
        let cause = match self
            .api
            .fetch_body::<()>(proxy, self.api.transcript_url(video_id))
            .await
        {
            Ok(_) => return RetryOutcome::Success(()),
            Err(RetryOutcome::TransientFailure(cause)) => cause,
            Err(other) => return other,
        };

        match self.api.fetch_body::<()>(proxy, self.api.homepage_url()).await {
            Ok(_) => RetryOutcome::TransientFailure(FailureCause::rate_limited(format!(
                "homepage reachable but captions refused ({})",
                cause.message
            ))),
            Err(_) => RetryOutcome::TransientFailure(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> YoutubeApi {
        YoutubeApi::new(DEFAULT_BASE_URL, "en", Duration::from_secs(15)).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let api = api();
        assert_eq!(
            api.transcript_url("dQw4w9WgXcQ").as_str(),
            "https://www.youtube.com/api/timedtext?v=dQw4w9WgXcQ&lang=en&fmt=json3"
        );
        assert_eq!(
            api.listing_url("PL123").as_str(),
            "https://www.youtube.com/playlist?list=PL123"
        );
        let metadata = api.metadata_url("dQw4w9WgXcQ");
        assert_eq!(metadata.path(), "/oembed");
        assert!(metadata
            .query_pairs()
            .any(|(k, v)| k == "url" && v == "https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn test_base_url_with_path_prefix() {
        let api = YoutubeApi::new("http://127.0.0.1:9000/yt", "de", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.transcript_url("abc").as_str(),
            "http://127.0.0.1:9000/yt/api/timedtext?v=abc&lang=de&fmt=json3"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = YoutubeApi::new("not a url", "en", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_json3_transcript() {
        let body = r#"{
            "events": [
                {"tStartMs": 0},
                {"segs": [{"utf8": "Hello"}, {"utf8": "  world\n"}]},
                {"segs": [{"utf8": "again"}, {"tOffsetMs": 5}]}
            ]
        }"#;
        assert_eq!(parse_json3_transcript(body).unwrap(), "Hello world again");
        assert_eq!(parse_json3_transcript(r#"{"events": []}"#).unwrap(), "");
        assert!(parse_json3_transcript("<html>").is_err());
    }

    #[test]
    fn test_parse_oembed() {
        let body = r#"{"title": "A talk", "author_name": "Some Channel", "type": "video"}"#;
        let metadata = parse_oembed(body, "abc").unwrap();
        assert_eq!(metadata.title, "A talk");
        assert_eq!(metadata.channel, "Some Channel");
        assert_eq!(metadata.id, "abc");

        let sparse = parse_oembed("{}", "abc").unwrap();
        assert_eq!(sparse.title, "Unknown");
    }

    #[test]
    fn test_parse_playlist_page() {
        let api = api();
        let html = r#"<meta property="og:title" content="Talks &amp; Lectures">
            {"videoId":"aaaaaaaaaaa"} {"videoId":"bbbbbbbbbbb"} {"videoId":"aaaaaaaaaaa"}"#;

        match parse_playlist_page(&api, html, "PL1") {
            RetryOutcome::Success(listing) => {
                assert_eq!(listing.title, "Talks & Lectures");
                let ids: Vec<&str> = listing.videos.iter().map(|v| v.id.as_str()).collect();
                assert_eq!(ids, vec!["aaaaaaaaaaa", "bbbbbbbbbbb"]);
                assert_eq!(
                    listing.videos[1].url,
                    "https://www.youtube.com/watch?v=bbbbbbbbbbb"
                );
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_playlist_page_empty() {
        let api = api();
        assert_eq!(
            parse_playlist_page(&api, "<html>This playlist does not exist.</html>", "PL1"),
            RetryOutcome::EmptyResult(EmptyReason::TargetUnavailable)
        );
        assert_eq!(
            parse_playlist_page(&api, "<html></html>", "PL1"),
            RetryOutcome::EmptyResult(EmptyReason::NoData)
        );
    }

    #[test]
    fn test_block_page_detection() {
        assert!(is_block_page(
            "<p>Our systems have detected unusual traffic from your computer network.</p>"
        ));
        assert!(!is_block_page(r#"{"events": []}"#));
    }

    #[test]
    fn test_placeholder_metadata() {
        let metadata = VideoMetadata::placeholder("xyz");
        assert_eq!(metadata.title, "video_xyz");
        assert_eq!(metadata.channel, "Unknown");
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_network_failure() {
        // Nothing listens on port 1 of localhost
        let api = Arc::new(
            YoutubeApi::new("http://127.0.0.1:9/", "en", Duration::from_secs(2)).unwrap(),
        );
        let op = TranscriptOperation::new(api);
        match op.attempt("abc", &Proxy::new("127.0.0.1", 1)).await {
            RetryOutcome::TransientFailure(cause) => assert!(!cause.is_rate_limit()),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
