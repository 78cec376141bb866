use axum::{
  body::{self, StreamBody},
  http::Response,
  response::Response as AxumResponse,
};
use reqwest::{header, StatusCode};
use tracing::info;

use crate::{
  extractor::{http_client, VideoInfo, WEB_USER_AGENT},
  format::RawFormat,
  Error, Result,
};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Proxy the media of one format back to the client as an attachment.
pub async fn stream_format(
  info: &VideoInfo,
  format: &RawFormat,
  proxy: Option<String>,
) -> Result<AxumResponse> {
  let url = format
    .usable_url()
    .ok_or_else(|| Error::FormatUnavailable(format.id.clone()))?;

  let upstream = http_client(proxy.as_deref())?
    .get(url)
    .header(header::USER_AGENT, WEB_USER_AGENT)
    .send()
    .await?;

  let status = upstream.status();
  if !status.is_success() {
    return Err(Error::UpstreamStatus {
      status,
      url: url.to_string(),
    });
  }

  let content_type = content_type(format);
  let filename = attachment_name(&info.title, &format.id, content_type);
  info!(itag = %format.id, %filename, "streaming format");

  let mut builder = Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, content_type)
    .header(
      header::CONTENT_DISPOSITION,
      format!("attachment; filename=\"{filename}\""),
    );
  if let Some(len) = upstream.content_length() {
    builder = builder.header(header::CONTENT_LENGTH, len);
  }

  let body = StreamBody::new(upstream.bytes_stream());
  Ok(builder.body(body::boxed(body))?)
}

fn content_type(format: &RawFormat) -> &str {
  format
    .mime_type
    .as_deref()
    .and_then(|mime| mime.split(';').next())
    .map(str::trim)
    .filter(|mime| !mime.is_empty())
    .unwrap_or(FALLBACK_CONTENT_TYPE)
}

fn extension(content_type: &str) -> &'static str {
  match content_type {
    "video/mp4" => "mp4",
    "audio/mp4" => "m4a",
    "video/webm" | "audio/webm" => "webm",
    "audio/mpeg" => "mp3",
    "video/3gpp" => "3gp",
    _ => "bin",
  }
}

/// Header-safe file name built from the video title.
pub fn attachment_name(title: &str, itag: &str, content_type: &str) -> String {
  let mut stem = String::with_capacity(title.len());
  for c in title.chars() {
    match c {
      c if c.is_ascii_alphanumeric() => stem.push(c),
      ' ' | '-' | '_' | '.' | '(' | ')' => stem.push(c),
      _ if !stem.ends_with('_') => stem.push('_'),
      _ => {}
    }
  }

  let stem = stem.trim_matches(|c: char| c == '_' || c == '.' || c == ' ');
  let stem = if stem.is_empty() {
    format!("video-{itag}")
  } else {
    stem.to_string()
  };

  format!("{stem}.{}", extension(content_type))
}
