use http_types::Url;

use crate::{Error, Result};

const WATCH_MARKER: &str = "youtube.com/watch?v=";
const SHORT_LINK_MARKER: &str = "youtu.be/";
const SHORTS_MARKER: &str = "youtube.com/shorts/";

/// Extract the video id from a watch, youtu.be or shorts URL.
pub fn extract_video_id(url: &str) -> Result<String> {
  let url = url.trim();

  let id = if url.contains(WATCH_MARKER) {
    let parsed: Url = url
      .parse()
      .map_err(|_| Error::MalformedUrl(url.into(), "unparseable url"))?;
    parsed
      .query_pairs()
      .find_map(|(k, v)| (k == "v").then(|| v.into_owned()))
      .ok_or_else(|| Error::MalformedUrl(url.into(), "v parameter not found"))?
  } else if let Some(rest) = after_marker(url, SHORT_LINK_MARKER) {
    path_segment(rest)
  } else if url.contains(SHORTS_MARKER) {
    let rest = after_marker(url, "shorts/").unwrap_or_default();
    path_segment(rest)
  } else {
    return Err(Error::UnsupportedUrl(url.into()));
  };

  if id.is_empty() {
    return Err(Error::MalformedUrl(url.into(), "empty video id"));
  }

  Ok(id)
}

fn after_marker<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
  url.split_once(marker).map(|(_, rest)| rest)
}

fn path_segment(rest: &str) -> String {
  rest
    .split(['?', '&', '#', '/'])
    .next()
    .unwrap_or_default()
    .to_string()
}

pub fn watch_url(video_id: &str) -> String {
  format!("https://www.youtube.com/watch?v={video_id}")
}
