use std::{cmp::Reverse, str::FromStr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::Error;

const AUDIO_CODECS: &[&str] = &["mp4a", "opus", "vorbis", "ac-3", "ec-3", "flac"];

/// One stream variant as reported by an extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFormat {
  #[serde(alias = "itag", deserialize_with = "string_or_number")]
  pub id: String,
  #[serde(default)]
  pub mime_type: Option<String>,
  #[serde(default)]
  pub quality_label: Option<String>,
  #[serde(default)]
  pub has_audio: Option<bool>,
  #[serde(default)]
  pub has_video: Option<bool>,
  #[serde(default)]
  pub video_codec: Option<String>,
  #[serde(default)]
  pub audio_codec: Option<String>,
  #[serde(default, deserialize_with = "lenient_length")]
  pub content_length: Option<u64>,
  #[serde(default)]
  pub url: Option<String>,
}

impl RawFormat {
  pub fn usable_url(&self) -> Option<&str> {
    self.url.as_deref().filter(|url| !url.is_empty())
  }

  pub fn has_video(&self) -> bool {
    if let Some(flag) = self.has_video {
      return flag;
    }
    if let Some(codec) = present_codec(&self.video_codec) {
      return !codec.is_empty();
    }
    self.mime().starts_with("video/")
  }

  pub fn has_audio(&self) -> bool {
    if let Some(flag) = self.has_audio {
      return flag;
    }
    if let Some(codec) = present_codec(&self.audio_codec) {
      return !codec.is_empty();
    }

    let mime = self.mime();
    if mime.starts_with("audio/") {
      return true;
    }
    mime.starts_with("video/") && mime_codecs(mime).any(is_audio_codec)
  }

  /// Leading number of the quality label, e.g. 1080 for "1080p60".
  pub fn quality(&self) -> u32 {
    self.quality_label.as_deref().map_or(0, parse_quality)
  }

  pub fn size(&self) -> u64 {
    self.content_length.unwrap_or(0)
  }

  fn mime(&self) -> &str {
    self.mime_type.as_deref().unwrap_or_default()
  }
}

// "none" is how yt-dlp spells a missing codec
fn present_codec(codec: &Option<String>) -> Option<&str> {
  match codec.as_deref() {
    None => None,
    Some("none") => Some(""),
    Some(codec) => Some(codec),
  }
}

fn mime_codecs(mime: &str) -> impl Iterator<Item = &str> {
  mime
    .split_once("codecs=")
    .map(|(_, codecs)| codecs)
    .unwrap_or_default()
    .trim_matches(|c| c == '"' || c == ' ')
    .split(',')
    .map(|codec| codec.trim_matches(|c| c == '"' || c == ' '))
    .filter(|codec| !codec.is_empty())
}

fn is_audio_codec(codec: &str) -> bool {
  AUDIO_CODECS.iter().any(|prefix| codec.starts_with(prefix))
}

pub fn parse_quality(label: &str) -> u32 {
  static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

  DIGITS
    .find(label)
    .and_then(|m| m.as_str().parse().ok())
    .unwrap_or(0)
}

/// Which containers survive classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerFilter {
  Any,
  /// Keep MP4 video and M4A audio only, for player compatibility.
  #[default]
  Mp4,
}

impl ContainerFilter {
  fn accepts(&self, format: &RawFormat) -> bool {
    match self {
      ContainerFilter::Any => true,
      ContainerFilter::Mp4 => {
        let mime = format.mime();
        mime.contains("mp4") || mime.contains("m4a")
      }
    }
  }
}

impl FromStr for ContainerFilter {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "any" | "all" => Ok(ContainerFilter::Any),
      "mp4" => Ok(ContainerFilter::Mp4),
      other => Err(Error::Config(format!("unknown container filter: {other}"))),
    }
  }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClassifiedFormats {
  pub video: Vec<RawFormat>,
  pub audio: Vec<RawFormat>,
}

pub fn classify(
  formats: &[RawFormat],
  filter: ContainerFilter,
) -> ClassifiedFormats {
  let usable: Vec<&RawFormat> = formats
    .iter()
    .filter(|f| f.usable_url().is_some())
    .filter(|f| filter.accepts(f))
    .collect();

  let mut video: Vec<RawFormat> = usable
    .iter()
    .filter(|f| f.has_video())
    .map(|f| (*f).clone())
    .collect();
  let mut audio: Vec<RawFormat> = usable
    .iter()
    .filter(|f| f.has_audio() && !f.has_video())
    .map(|f| (*f).clone())
    .collect();

  // both sorts are stable, ties keep input order
  video.sort_by_key(|f| Reverse(f.quality()));
  audio.sort_by_key(|f| Reverse(f.size()));

  ClassifiedFormats { video, audio }
}

/// Display-ready entry of the analyze response.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormatEntry {
  pub itag: String,
  pub quality: String,
  pub mime_type: String,
  pub size: u64,
  pub url: String,
}

impl FormatEntry {
  pub fn video(format: &RawFormat) -> Self {
    Self::build(format, format.quality_label.clone().unwrap_or_default())
  }

  pub fn audio(format: &RawFormat) -> Self {
    let quality = format
      .quality_label
      .clone()
      .filter(|q| !q.is_empty())
      .unwrap_or_else(|| "Audio".to_string());
    Self::build(format, quality)
  }

  fn build(format: &RawFormat, quality: String) -> Self {
    Self {
      itag: format.id.clone(),
      quality,
      mime_type: format.mime_type.clone().unwrap_or_default(),
      size: format.size(),
      url: format.usable_url().unwrap_or_default().to_string(),
    }
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
  String(String),
  Number(i64),
}

impl From<StringOrNumber> for String {
  fn from(value: StringOrNumber) -> Self {
    match value {
      StringOrNumber::String(s) => s,
      StringOrNumber::Number(n) => n.to_string(),
    }
  }
}

pub(crate) fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  StringOrNumber::deserialize(de).map(String::from)
}

pub(crate) fn opt_string_or_number<'de, D>(
  de: D,
) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Option::<StringOrNumber>::deserialize(de).map(|v| v.map(String::from))
}

// content lengths come as strings from the player response and as numbers
// from everything else. Garbage and negative sentinels become None.
pub(crate) fn lenient_length<'de, D>(de: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<StringOrNumber>::deserialize(de).ok().flatten() {
    Some(StringOrNumber::Number(n)) => u64::try_from(n).ok(),
    Some(StringOrNumber::String(s)) => s.trim().parse().ok(),
    None => None,
  })
}
