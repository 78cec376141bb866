use std::{
  str::FromStr,
  sync::atomic::{AtomicUsize, Ordering},
};

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use regex::Regex;

use crate::Error;

/// Picks the outbound proxy for one extraction attempt.
#[derive(Debug, Default)]
pub enum ProxyRotation {
  #[default]
  Direct,
  Fixed(String),
  RoundRobin {
    proxies: Vec<String>,
    cursor: AtomicUsize,
  },
  Random(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyStrategy {
  #[default]
  RoundRobin,
  Random,
}

impl FromStr for ProxyStrategy {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "round-robin" | "roundrobin" | "rr" => Ok(ProxyStrategy::RoundRobin),
      "random" => Ok(ProxyStrategy::Random),
      other => Err(Error::Config(format!("unknown proxy strategy: {other}"))),
    }
  }
}

impl ProxyRotation {
  /// A fixed proxy wins over any list.
  pub fn new(
    fixed: Option<String>,
    proxies: Vec<String>,
    strategy: ProxyStrategy,
  ) -> Self {
    if let Some(proxy) = fixed.filter(|p| !p.is_empty()) {
      return ProxyRotation::Fixed(proxy);
    }

    if proxies.is_empty() {
      return ProxyRotation::Direct;
    }

    match strategy {
      ProxyStrategy::RoundRobin => ProxyRotation::RoundRobin {
        proxies,
        cursor: AtomicUsize::new(0),
      },
      ProxyStrategy::Random => ProxyRotation::Random(proxies),
    }
  }

  pub fn select(&self) -> Option<String> {
    match self {
      ProxyRotation::Direct => None,
      ProxyRotation::Fixed(proxy) => Some(proxy.clone()),
      ProxyRotation::RoundRobin { proxies, cursor } => {
        let i = cursor.fetch_add(1, Ordering::Relaxed) % proxies.len();
        proxies.get(i).cloned()
      }
      ProxyRotation::Random(proxies) => {
        proxies.choose(&mut rand::thread_rng()).cloned()
      }
    }
  }
}

/// Strip credentials from a proxy url before it is logged.
pub fn redact(proxy: &str) -> String {
  static AUTH_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"//[^:@/]+(:[^@]+)?@").unwrap());
  AUTH_REGEX.replace(proxy, "//<REDACTED>@").into_owned()
}
