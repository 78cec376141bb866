use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info};

use crate::{
  config::Credentials,
  format::{lenient_length, RawFormat},
  proxy::redact,
  video_id::watch_url,
  Error, Result,
};

use super::{thumbnail_url, Extractor, VideoInfo};

// run yt-dlp command line to list formats and their direct urls.
// requires yt-dlp executable to be in PATH.
pub struct Ytdlp {
  credentials: Credentials,
  // bounds how many yt-dlp processes run at a time
  permits: Semaphore,
}

impl Ytdlp {
  pub fn new(credentials: Credentials, concurrency: usize) -> Self {
    Self {
      credentials,
      permits: Semaphore::new(concurrency.max(1)),
    }
  }

  fn command(&self, video_id: &str, proxy: Option<&str>) -> Command {
    let mut cmd = Command::new("yt-dlp");
    // a dropped request must release its permit and its process together
    cmd.kill_on_drop(true);
    cmd.arg("-j").arg("--no-warnings").arg("--no-playlist");

    if let Some(proxy) = proxy {
      info!("using proxy: {}", redact(proxy));
      cmd.arg("--proxy").arg(proxy);
    }
    if let Some(cookie) = self.credentials.cookie_header() {
      cmd.arg("--add-header").arg(format!("Cookie:{cookie}"));
    }
    if let Some(visitor_data) = &self.credentials.visitor_data {
      cmd
        .arg("--extractor-args")
        .arg(format!("youtube:visitor_data={visitor_data}"));
    }

    cmd.arg(watch_url(video_id));
    cmd
  }
}

#[derive(Deserialize, Debug)]
struct YtdlpOutput {
  title: Option<String>,
  description: Option<String>,
  thumbnail: Option<String>,
  #[serde(default)]
  formats: Vec<Format>,
}

#[derive(Deserialize, Debug)]
struct Format {
  format_id: String,
  ext: Option<String>,
  format_note: Option<String>,
  height: Option<u32>,
  abr: Option<f64>,
  vcodec: Option<String>,
  acodec: Option<String>,
  #[serde(default, deserialize_with = "lenient_length")]
  filesize: Option<u64>,
  #[serde(default, deserialize_with = "lenient_length")]
  filesize_approx: Option<u64>,
  url: Option<String>,
}

impl From<Format> for RawFormat {
  fn from(f: Format) -> Self {
    let video_codec = f.vcodec.filter(|c| !c.is_empty());
    let audio_codec = f.acodec.filter(|c| !c.is_empty());
    let is_video = video_codec.as_deref().is_some_and(|c| c != "none");

    let quality_label = if is_video {
      f.height.map(|h| format!("{h}p")).or(f.format_note)
    } else {
      f.abr.map(|abr| format!("{abr:.0}kbps")).or(f.format_note)
    };

    RawFormat {
      id: f.format_id,
      mime_type: f.ext.as_deref().and_then(|ext| mime_for(ext, is_video)),
      quality_label,
      has_audio: None,
      has_video: None,
      video_codec,
      audio_codec,
      content_length: f.filesize.or(f.filesize_approx),
      url: f.url,
    }
  }
}

fn mime_for(ext: &str, is_video: bool) -> Option<String> {
  let mime = match (ext, is_video) {
    ("mp4", true) => "video/mp4",
    ("mp4" | "m4a", false) => "audio/mp4",
    ("webm", true) => "video/webm",
    ("webm" | "weba", false) => "audio/webm",
    ("mp3", false) => "audio/mpeg",
    ("3gp", _) => "video/3gpp",
    _ => return None,
  };
  Some(mime.to_string())
}

fn detect_error(stderr: &[u8]) -> Result<()> {
  let s = String::from_utf8_lossy(stderr);
  match s.lines().find(|line| line.contains("ERROR:")) {
    Some(line) => Err(Error::Extraction(line.trim().to_string())),
    None => Ok(()),
  }
}

#[async_trait]
impl Extractor for Ytdlp {
  async fn video_info(
    &self,
    video_id: &str,
    proxy: Option<String>,
  ) -> Result<VideoInfo> {
    let mut cmd = self.command(video_id, proxy.as_deref());

    let output = {
      let _permit = self
        .permits
        .acquire()
        .await
        .map_err(|e| Error::Extraction(e.to_string()))?;
      cmd.output().await?
    };

    detect_error(&output.stderr)?;
    if !output.status.success() {
      return Err(Error::Extraction(format!(
        "yt-dlp exited with {}",
        output.status
      )));
    }

    let output: YtdlpOutput = serde_json::from_slice(&output.stdout)
      .map_err(|e| Error::MalformedPayload(e.to_string()))?;
    debug!(video_id, formats = output.formats.len(), "yt-dlp output parsed");

    Ok(VideoInfo {
      title: output.title.unwrap_or_default(),
      thumbnail: output
        .thumbnail
        .unwrap_or_else(|| thumbnail_url(video_id)),
      description: output.description.unwrap_or_default(),
      formats: output.formats.into_iter().map(Into::into).collect(),
    })
  }
}
