use axum::{
  extract::rejection::QueryRejection,
  response::{IntoResponse, Response},
  Json,
};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, error};

#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("unsupported URL format: {0}")]
  UnsupportedUrl(String),

  #[error("malformed URL {0}: {1}")]
  MalformedUrl(String, &'static str),

  #[error("missing parameter: {0}")]
  MissingParameter(&'static str),

  #[error("no valid action specified")]
  InvalidAction,

  #[error("{0}")]
  InvalidQuery(String),

  #[error("format {0} not found")]
  FormatNotFound(String),

  #[error("format {0} has no direct url")]
  FormatUnavailable(String),

  #[error("upstream returned {status} for {url}")]
  UpstreamStatus { status: StatusCode, url: String },

  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("missing field in extractor response: {0}")]
  MissingField(&'static str),

  #[error("malformed extractor payload: {0}")]
  MalformedPayload(String),

  #[error("extraction failed: {0}")]
  Extraction(String),

  #[error("invalid html: {0}")]
  InvalidHtml(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("failed to build response: {0}")]
  Response(#[from] http::Error),

  #[error("server error: {0}")]
  Server(String),

  #[error("IO error: {0}")]
  IO(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn status(&self) -> StatusCode {
    match self {
      Error::UnsupportedUrl(_)
      | Error::MalformedUrl(..)
      | Error::MissingParameter(_)
      | Error::InvalidAction
      | Error::InvalidQuery(_) => StatusCode::BAD_REQUEST,
      Error::FormatNotFound(_) | Error::FormatUnavailable(_) => {
        StatusCode::NOT_FOUND
      }
      Error::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<tl::ParseError> for Error {
  fn from(err: tl::ParseError) -> Self {
    Error::InvalidHtml(format!("{err:?}"))
  }
}

impl From<QueryRejection> for Error {
  fn from(err: QueryRejection) -> Self {
    Error::InvalidQuery(err.body_text())
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(%status, "request failed: {}", self);
    } else {
      debug!(%status, "request rejected: {}", self);
    }

    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
