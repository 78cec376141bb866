use async_trait::async_trait;
use serde::Deserialize;

use crate::{
  format::{lenient_length, string_or_number, RawFormat},
  piped::PipedInstance,
  Error, Result,
};

use super::{http_client, Extractor, VideoInfo};

pub struct Piped(pub PipedInstance);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipedStream {
  #[serde(deserialize_with = "string_or_number")]
  itag: String,
  url: Option<String>,
  mime_type: Option<String>,
  quality: Option<String>,
  codec: Option<String>,
  #[serde(default)]
  video_only: bool,
  #[serde(default, deserialize_with = "lenient_length")]
  content_length: Option<u64>,
}

impl PipedStream {
  fn into_video(self) -> RawFormat {
    RawFormat {
      id: self.itag,
      mime_type: self.mime_type,
      quality_label: self.quality,
      has_audio: Some(!self.video_only),
      has_video: Some(true),
      video_codec: self.codec,
      audio_codec: None,
      content_length: self.content_length,
      url: self.url,
    }
  }

  fn into_audio(self) -> RawFormat {
    RawFormat {
      id: self.itag,
      mime_type: self.mime_type,
      quality_label: self.quality,
      has_audio: Some(true),
      has_video: Some(false),
      video_codec: None,
      audio_codec: self.codec,
      content_length: self.content_length,
      url: self.url,
    }
  }
}

#[async_trait]
impl Extractor for Piped {
  async fn video_info(
    &self,
    video_id: &str,
    proxy: Option<String>,
  ) -> Result<VideoInfo> {
    use serde_query::{DeserializeQuery, Query};

    #[derive(DeserializeQuery)]
    struct PipedStreamsResp {
      #[query(".title")]
      title: String,
      #[query(".description")]
      description: Option<String>,
      #[query(".thumbnailUrl")]
      thumbnail: String,
      #[query(".videoStreams")]
      video_streams: Vec<PipedStream>,
      #[query(".audioStreams")]
      audio_streams: Vec<PipedStream>,
    }

    let piped_url = self.0.stream_url(video_id);
    let resp = http_client(proxy.as_deref())?
      .get(&piped_url)
      .header("User-Agent", "Mozilla/5.0")
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      return Err(Error::UpstreamStatus {
        status,
        url: piped_url,
      });
    }

    let body = resp.bytes().await?;
    let resp: PipedStreamsResp = serde_json::from_slice::<
      Query<PipedStreamsResp>,
    >(&body)
    .map_err(|e| Error::MalformedPayload(e.to_string()))?
    .into();

    let formats = resp
      .video_streams
      .into_iter()
      .map(PipedStream::into_video)
      .chain(resp.audio_streams.into_iter().map(PipedStream::into_audio))
      .collect();

    Ok(VideoInfo {
      title: resp.title,
      thumbnail: resp.thumbnail,
      description: resp.description.unwrap_or_default(),
      formats,
    })
  }
}
