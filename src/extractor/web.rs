use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header;
use serde::Deserialize;
use tracing::debug;

use crate::{
  config::Credentials, format::RawFormat, video_id::watch_url, Error, Result,
};

use super::{
  http_client, thumbnail_url, Extractor, VideoInfo, WEB_USER_AGENT,
};

const UNKNOWN_TITLE: &str = "Unknown title";

// scrape ytInitialPlayerResponse out of the watch page.
// formats that need signature deciphering come without url and are
// dropped later by the classifier.
pub struct Web {
  credentials: Credentials,
}

impl Web {
  pub fn new(credentials: Credentials) -> Self {
    Self { credentials }
  }
}

#[async_trait]
impl Extractor for Web {
  async fn video_info(
    &self,
    video_id: &str,
    proxy: Option<String>,
  ) -> Result<VideoInfo> {
    let url = watch_url(video_id);
    let mut req = http_client(proxy.as_deref())?
      .get(&url)
      .header(header::USER_AGENT, WEB_USER_AGENT)
      .header(
        header::ACCEPT,
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
      )
      .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9");

    if let Some(cookie) = self.credentials.cookie_header() {
      req = req.header(header::COOKIE, cookie);
    }
    if let Some(visitor_data) = &self.credentials.visitor_data {
      req = req.header("X-Goog-Visitor-Id", visitor_data.as_str());
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
      return Err(Error::UpstreamStatus { status, url });
    }

    let html = resp.text().await?;
    debug!(video_id, bytes = html.len(), "fetched watch page");

    extract_player_response(&html)?.into_video_info(video_id)
  }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
  playability_status: Option<PlayabilityStatus>,
  video_details: Option<VideoDetails>,
  streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
  status: String,
  reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
  title: Option<String>,
  short_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
  #[serde(default)]
  formats: Vec<RawFormat>,
  #[serde(default)]
  adaptive_formats: Vec<RawFormat>,
}

impl PlayerResponse {
  fn into_video_info(self, video_id: &str) -> Result<VideoInfo> {
    let details = self
      .video_details
      .ok_or(Error::MissingField("videoDetails"))?;

    let Some(streaming) = self.streaming_data else {
      return Err(match self.playability_status {
        Some(p) if p.status != "OK" => Error::Extraction(format!(
          "video not playable: {} ({})",
          p.status,
          p.reason.unwrap_or_default()
        )),
        _ => Error::MissingField("streamingData"),
      });
    };

    let formats = streaming
      .formats
      .into_iter()
      .chain(streaming.adaptive_formats)
      .collect();

    Ok(VideoInfo {
      title: details
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
      thumbnail: thumbnail_url(video_id),
      description: details.short_description.unwrap_or_default(),
      formats,
    })
  }
}

fn extract_player_response(html: &str) -> Result<PlayerResponse> {
  let dom = tl::parse(html, tl::ParserOptions::default())?;
  let parser = dom.parser();

  let scripts = dom
    .query_selector("script")
    .expect("selector is hard-coded, thus must be valid");

  let mut failure = None;
  for handle in scripts {
    let Some(node) = handle.get(parser) else {
      continue;
    };
    let text = node.inner_text(parser);
    match player_response_in(&text) {
      Some(Ok(found)) => return Ok(found),
      Some(Err(err)) => {
        failure.get_or_insert(err);
      }
      None => {}
    }
  }

  // tl may not expose the raw script body, search the page itself
  match player_response_in(html) {
    Some(Ok(found)) => Ok(found),
    Some(Err(err)) => Err(failure.unwrap_or(err)),
    None => Err(
      failure.unwrap_or(Error::MissingField("ytInitialPlayerResponse")),
    ),
  }
}

fn player_response_in(text: &str) -> Option<Result<PlayerResponse>> {
  static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"ytInitialPlayerResponse\s*=\s*\{").unwrap()
  });

  let start = ASSIGNMENT.find(text)?.end() - 1;

  // an object is self-delimiting, whatever follows it is ignored
  let parsed = serde_json::Deserializer::from_str(&text[start..])
    .into_iter::<PlayerResponse>()
    .next()?
    .map_err(|e| Error::MalformedPayload(e.to_string()));

  Some(parsed)
}
