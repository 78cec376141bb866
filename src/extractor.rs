mod piped;
mod web;
mod ytdlp;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::{
  config::{Config, ExtractorKind},
  format::RawFormat,
  piped::PipedInstance,
  Result,
};

pub use self::web::Web;
pub use piped::Piped;
pub use ytdlp::Ytdlp;

pub const WEB_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
  AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Everything an extractor knows about one video.
#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
  pub title: String,
  pub thumbnail: String,
  pub description: String,
  pub formats: Vec<RawFormat>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
  async fn video_info(
    &self,
    video_id: &str,
    proxy: Option<String>,
  ) -> Result<VideoInfo>;
}

pub fn from_config(config: &Config) -> Arc<dyn Extractor> {
  match config.extractor {
    ExtractorKind::Web => Arc::new(Web::new(config.credentials.clone())),
    ExtractorKind::Piped => {
      Arc::new(Piped(PipedInstance::new(config.piped_instance.clone())))
    }
    ExtractorKind::Ytdlp => Arc::new(Ytdlp::new(
      config.credentials.clone(),
      config.ytdlp_concurrency,
    )),
  }
}

pub fn http_client(proxy: Option<&str>) -> Result<Client> {
  let mut builder = Client::builder();
  if let Some(proxy) = proxy {
    builder = builder.proxy(reqwest::Proxy::all(proxy)?);
  }
  Ok(builder.build()?)
}

pub fn thumbnail_url(video_id: &str) -> String {
  format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")
}
