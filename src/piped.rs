use crate::config::DEFAULT_PIPED_INSTANCE;

#[derive(Clone, Debug)]
pub struct PipedInstance {
  domain: String,
}

impl PipedInstance {
  pub fn new(domain: String) -> Self {
    let domain = domain
      .trim()
      .trim_start_matches("https://")
      .trim_start_matches("http://")
      .trim_end_matches('/')
      .to_string();
    Self { domain }
  }

  pub fn stream_url(&self, video_id: &str) -> String {
    format!("https://{}/streams/{}", self.domain, video_id)
  }
}

impl Default for PipedInstance {
  fn default() -> Self {
    Self::new(DEFAULT_PIPED_INSTANCE.to_string())
  }
}
