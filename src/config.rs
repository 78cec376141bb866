use std::{net::SocketAddr, str::FromStr, time::Duration};

use itertools::Itertools;
use tracing::warn;

use crate::{
  format::ContainerFilter,
  proxy::{ProxyRotation, ProxyStrategy},
  retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS},
  Error, Result,
};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_PIPED_INSTANCE: &str = "pipedapi.kavin.rocks";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractorKind {
  #[default]
  Web,
  Piped,
  Ytdlp,
}

impl FromStr for ExtractorKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "web" => Ok(ExtractorKind::Web),
      "piped" => Ok(ExtractorKind::Piped),
      "ytdlp" | "yt-dlp" => Ok(ExtractorKind::Ytdlp),
      other => Err(Error::Config(format!("unknown extractor: {other}"))),
    }
  }
}

/// Session credentials forwarded to YouTube.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
  pub cookies: Vec<(String, String)>,
  pub visitor_data: Option<String>,
}

impl Credentials {
  pub fn cookie_header(&self) -> Option<String> {
    if self.cookies.is_empty() {
      return None;
    }

    let header = self
      .cookies
      .iter()
      .map(|(name, value)| format!("{name}={value}"))
      .join("; ");
    Some(header)
  }
}

/// Parse `name=value; name2=value2`, skipping malformed pairs.
pub fn parse_cookies(raw: &str) -> Vec<(String, String)> {
  raw
    .split(';')
    .map(str::trim)
    .filter(|pair| !pair.is_empty())
    .filter_map(|pair| match pair.split_once('=') {
      Some((name, value)) if !name.trim().is_empty() => {
        Some((name.trim().to_string(), value.trim().to_string()))
      }
      _ => {
        warn!("ignoring malformed cookie pair: {pair}");
        None
      }
    })
    .collect()
}

#[derive(Debug, Clone)]
pub struct Config {
  pub addr: SocketAddr,
  pub extractor: ExtractorKind,
  pub piped_instance: String,
  pub ytdlp_concurrency: usize,
  pub proxy_url: Option<String>,
  pub proxy_list: Vec<String>,
  pub proxy_strategy: ProxyStrategy,
  pub credentials: Credentials,
  pub containers: ContainerFilter,
  pub max_attempts: u32,
  pub base_delay: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
      extractor: ExtractorKind::default(),
      piped_instance: DEFAULT_PIPED_INSTANCE.to_string(),
      ytdlp_concurrency: 1,
      proxy_url: None,
      proxy_list: vec![],
      proxy_strategy: ProxyStrategy::default(),
      credentials: Credentials::default(),
      containers: ContainerFilter::default(),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      base_delay: DEFAULT_BASE_DELAY,
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    let parsed = |key: &'static str| -> Result<Option<u64>> {
      var(key)
        .map(|v| {
          v.trim()
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("{key}={v}: {e}")))
        })
        .transpose()
    };

    let mut config = Config::default();

    let host = var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = match parsed("PORT")? {
      Some(port) => u16::try_from(port)
        .map_err(|_| Error::Config(format!("PORT={port} out of range")))?,
      None => DEFAULT_PORT,
    };
    config.addr = format!("{host}:{port}")
      .parse()
      .map_err(|e| Error::Config(format!("BIND_ADDR={host}: {e}")))?;

    if let Some(kind) = var("EXTRACTOR") {
      config.extractor = kind.parse()?;
    }
    if let Some(instance) = var("PIPED_INSTANCE") {
      config.piped_instance = instance;
    }
    if let Some(n) = parsed("YTDLP_CONCURRENCY")? {
      config.ytdlp_concurrency = (n as usize).max(1);
    }

    config.proxy_url = var("PROXY_URL");
    config.proxy_list = var("PROXY_LIST")
      .map(|list| {
        list
          .split(',')
          .map(str::trim)
          .filter(|p| !p.is_empty())
          .map(String::from)
          .collect()
      })
      .unwrap_or_default();
    if let Some(strategy) = var("PROXY_STRATEGY") {
      config.proxy_strategy = strategy.parse()?;
    }

    config.credentials = Credentials {
      cookies: var("YOUTUBE_COOKIE")
        .map(|raw| parse_cookies(&raw))
        .unwrap_or_default(),
      visitor_data: var("VISITOR_DATA"),
    };

    if let Some(containers) = var("FORMAT_CONTAINERS") {
      config.containers = containers.parse()?;
    }
    if let Some(n) = parsed("RETRY_MAX_ATTEMPTS")? {
      config.max_attempts = n.clamp(1, u32::MAX as u64) as u32;
    }
    if let Some(ms) = parsed("RETRY_BASE_DELAY_MS")? {
      config.base_delay = Duration::from_millis(ms);
    }

    Ok(config)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy::new(self.max_attempts, self.base_delay)
  }

  pub fn proxy_rotation(&self) -> ProxyRotation {
    ProxyRotation::new(
      self.proxy_url.clone(),
      self.proxy_list.clone(),
      self.proxy_strategy,
    )
  }
}
