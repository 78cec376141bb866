use std::sync::Arc;

use axum::{
  extract::{rejection::QueryRejection, Query, State},
  http::{header, Method},
  response::{IntoResponse, Response},
  routing::get,
  Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};
use tracing::info;

use crate::{
  config::Config,
  download,
  extractor::{self, Extractor, VideoInfo},
  format::{classify, opt_string_or_number, ContainerFilter, FormatEntry},
  proxy::ProxyRotation,
  retry::RetryPolicy,
  video_id::extract_video_id,
  Error, Result,
};

#[derive(Clone)]
pub struct AppState {
  pub extractor: Arc<dyn Extractor>,
  pub proxies: Arc<ProxyRotation>,
  pub retry: RetryPolicy,
  pub containers: ContainerFilter,
}

impl AppState {
  pub fn from_config(config: &Config) -> Self {
    Self {
      extractor: extractor::from_config(config),
      proxies: Arc::new(config.proxy_rotation()),
      retry: config.retry_policy(),
      containers: config.containers,
    }
  }

  // every call hits the extractor again, nothing is cached between
  // analyze and download. Returns the proxy of the successful attempt,
  // format urls only resolve from the address that extracted them.
  async fn fetch_info(
    &self,
    video_id: &str,
  ) -> Result<(VideoInfo, Option<String>)> {
    let extractor = self.extractor.as_ref();
    let proxies = self.proxies.as_ref();

    self
      .retry
      .run(move || async move {
        let proxy = proxies.select();
        let info = extractor.video_info(video_id, proxy.clone()).await?;
        Ok::<_, Error>((info, proxy))
      })
      .await
  }
}

pub fn router(state: AppState) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

  Router::new()
    .route("/health", get(health))
    .route("/analyze", get(analyze).post(analyze))
    .route("/api/download", get(download_api).post(download_api))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn health() -> impl IntoResponse {
  "ok".to_owned()
}

/// Parameters accepted from the query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct ApiParams {
  url: Option<String>,
  action: Option<String>,
  #[serde(default, deserialize_with = "opt_string_or_number")]
  itag: Option<String>,
  stream: Option<bool>,
}

impl ApiParams {
  // query wins, the body fills the gaps
  fn merge(self, body: Option<Json<ApiParams>>) -> Self {
    let Some(Json(body)) = body else {
      return self;
    };
    Self {
      url: self.url.or(body.url),
      action: self.action.or(body.action),
      itag: self.itag.or(body.itag),
      stream: self.stream.or(body.stream),
    }
  }

  fn video_id(&self) -> Result<String> {
    let url = self
      .url
      .as_deref()
      .filter(|url| !url.trim().is_empty())
      .ok_or(Error::MissingParameter("url"))?;
    extract_video_id(url)
  }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
  pub title: String,
  pub thumbnail: String,
  pub description: String,
  pub formats: FormatGroups,
}

#[derive(Debug, Serialize)]
pub struct FormatGroups {
  pub video: Vec<FormatEntry>,
  pub audio: Vec<FormatEntry>,
}

#[axum::debug_handler]
async fn analyze(
  State(state): State<AppState>,
  query: Result<Query<ApiParams>, QueryRejection>,
  body: Option<Json<ApiParams>>,
) -> Result<Json<AnalyzeResponse>> {
  let Query(query) = query?;
  let params = query.merge(body);
  let video_id = params.video_id()?;
  Ok(Json(analyze_video(&state, &video_id).await?))
}

#[axum::debug_handler]
async fn download_api(
  State(state): State<AppState>,
  query: Result<Query<ApiParams>, QueryRejection>,
  body: Option<Json<ApiParams>>,
) -> Result<Response> {
  let Query(query) = query?;
  let params = query.merge(body);
  let video_id = params.video_id()?;

  match params.action.as_deref() {
    Some("analyze") => {
      Ok(Json(analyze_video(&state, &video_id).await?).into_response())
    }
    Some("download") => {
      let itag = params
        .itag
        .as_deref()
        .filter(|itag| !itag.is_empty())
        .ok_or(Error::MissingParameter("itag"))?;
      download_format(&state, &video_id, itag, params.stream.unwrap_or(false))
        .await
    }
    _ => Err(Error::InvalidAction),
  }
}

async fn analyze_video(
  state: &AppState,
  video_id: &str,
) -> Result<AnalyzeResponse> {
  info!(video_id, "analyzing video");
  let (info, _) = state.fetch_info(video_id).await?;
  let classified = classify(&info.formats, state.containers);
  info!(
    video_id,
    video = classified.video.len(),
    audio = classified.audio.len(),
    "formats classified"
  );

  Ok(AnalyzeResponse {
    title: info.title,
    thumbnail: info.thumbnail,
    description: info.description,
    formats: FormatGroups {
      video: classified.video.iter().map(FormatEntry::video).collect(),
      audio: classified.audio.iter().map(FormatEntry::audio).collect(),
    },
  })
}

async fn download_format(
  state: &AppState,
  video_id: &str,
  itag: &str,
  stream: bool,
) -> Result<Response> {
  info!(video_id, itag, stream, "resolving format");
  let (info, proxy) = state.fetch_info(video_id).await?;

  let format = info
    .formats
    .iter()
    .find(|f| f.id == itag)
    .ok_or_else(|| Error::FormatNotFound(itag.to_string()))?;

  if stream {
    return download::stream_format(&info, format, proxy).await;
  }

  let url = format
    .usable_url()
    .ok_or_else(|| Error::FormatUnavailable(itag.to_string()))?;
  Ok(Json(json!({ "url": url })).into_response())
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicU32, Ordering},
      Mutex,
    },
    time::Duration,
  };

  use async_trait::async_trait;
  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use serde_json::Value;
  use tower::ServiceExt;

  use super::*;
  use crate::{format::RawFormat, proxy::ProxyStrategy};

  struct StubExtractor {
    calls: AtomicU32,
    failures: u32,
    media_base: String,
    proxies_seen: Mutex<Vec<Option<String>>>,
  }

  impl StubExtractor {
    fn new(failures: u32) -> Arc<Self> {
      Self::serving(failures, "https://cdn.example")
    }

    fn serving(failures: u32, media_base: &str) -> Arc<Self> {
      Arc::new(Self {
        calls: AtomicU32::new(0),
        failures,
        media_base: media_base.to_string(),
        proxies_seen: Mutex::new(Vec::new()),
      })
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }

    fn proxies_seen(&self) -> Vec<Option<String>> {
      self.proxies_seen.lock().unwrap().clone()
    }

    fn format(&self, id: &str, mime: &str, label: Option<&str>) -> RawFormat {
      RawFormat {
        id: id.into(),
        mime_type: Some(mime.into()),
        quality_label: label.map(Into::into),
        content_length: Some(1024),
        url: Some(format!("{}/{id}", self.media_base)),
        ..Default::default()
      }
    }
  }

  #[async_trait]
  impl Extractor for StubExtractor {
    async fn video_info(
      &self,
      video_id: &str,
      proxy: Option<String>,
    ) -> Result<VideoInfo> {
      self.proxies_seen.lock().unwrap().push(proxy);
      let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      if n <= self.failures {
        return Err(Error::Extraction(format!("upstream hiccup #{n}")));
      }

      let mut no_url = self.format("22", "video/mp4", Some("720p"));
      no_url.url = None;

      Ok(VideoInfo {
        title: format!("Video {video_id}"),
        thumbnail: extractor::thumbnail_url(video_id),
        description: "stub".into(),
        formats: vec![
          self.format("136", "video/mp4", Some("720p")),
          self.format("140", "audio/mp4", Some("128kbps")),
          self.format("137", "video/mp4", Some("1080p")),
          no_url,
        ],
      })
    }
  }

  fn state(stub: Arc<StubExtractor>, max_attempts: u32) -> AppState {
    AppState {
      extractor: stub,
      proxies: Arc::new(ProxyRotation::default()),
      retry: RetryPolicy::new(max_attempts, Duration::from_millis(1)),
      containers: ContainerFilter::Mp4,
    }
  }

  fn app(stub: Arc<StubExtractor>, max_attempts: u32) -> Router {
    router(state(stub, max_attempts))
  }

  // serves `app` on an ephemeral local port, returns its base url
  fn serve(app: Router) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
      .unwrap()
      .serve(app.into_make_service());
    tokio::spawn(server);
    format!("http://{addr}")
  }

  fn media_server(body: &'static str) -> String {
    serve(
      Router::new()
        .route("/media/140", axum::routing::get(move || async move { body }))
        .route(
          "/gone/140",
          axum::routing::get(|| async { StatusCode::FORBIDDEN }),
        ),
    )
  }

  async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
  }

  fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
  }

  fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  #[tokio::test]
  async fn test_analyze_classifies_formats() {
    let stub = StubExtractor::new(0);
    let (status, body) = send(
      app(stub.clone(), 3),
      post_json(
        "/analyze",
        json!({"url": "https://www.youtube.com/watch?v=X"}),
      ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Video X");
    assert_eq!(
      body["thumbnail"],
      "https://img.youtube.com/vi/X/maxresdefault.jpg"
    );

    let video = body["formats"]["video"].as_array().unwrap();
    assert_eq!(video.len(), 2);
    assert_eq!(video[0]["quality"], "1080p");
    assert_eq!(video[1]["quality"], "720p");
    assert_eq!(video[0]["itag"], "137");
    assert_eq!(video[0]["mimeType"], "video/mp4");
    assert_eq!(video[0]["size"], 1024);

    let audio = body["formats"]["audio"].as_array().unwrap();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0]["url"], "https://cdn.example/140");
    assert_eq!(stub.calls(), 1);
  }

  #[tokio::test]
  async fn test_analyze_via_query_action() {
    let (status, body) = send(
      app(StubExtractor::new(0), 3),
      get("/api/download?action=analyze&url=https%3A%2F%2Fyoutu.be%2FX%3Ft%3D5"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Video X");
    assert_eq!(body["formats"]["video"].as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_action_from_body() {
    let (status, body) = send(
      app(StubExtractor::new(0), 3),
      post_json(
        "/api/download",
        json!({
          "action": "analyze",
          "url": "https://www.youtube.com/shorts/X"
        }),
      ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["formats"]["audio"].as_array().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_client_errors() {
    let stub = StubExtractor::new(0);

    let (status, body) =
      send(app(stub.clone(), 3), post_json("/analyze", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("url"));

    let (status, _) = send(
      app(stub.clone(), 3),
      post_json("/analyze", json!({"url": "https://example.com/x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
      app(stub.clone(), 3),
      get("/api/download?url=https%3A%2F%2Fyoutu.be%2FX"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
      app(stub.clone(), 3),
      get("/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("itag"));

    // client errors never reach the extractor
    assert_eq!(stub.calls(), 0);
  }

  #[tokio::test]
  async fn test_download_resolves_url() {
    let stub = StubExtractor::new(0);
    let (status, body) = send(
      app(stub.clone(), 3),
      get("/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=140"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"url": "https://cdn.example/140"}));
    assert_eq!(stub.calls(), 1);
  }

  #[tokio::test]
  async fn test_download_not_found() {
    let (status, _) = send(
      app(StubExtractor::new(0), 3),
      get("/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=999"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
      app(StubExtractor::new(0), 3),
      get("/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=22"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn test_download_streams_media() {
    let upstream = media_server("media-bytes");
    let stub = StubExtractor::serving(0, &format!("{upstream}/media"));

    let resp = app(stub, 3)
      .oneshot(get(
        "/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=140&stream=true",
      ))
      .await
      .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mp4");
    assert_eq!(
      headers[header::CONTENT_DISPOSITION],
      "attachment; filename=\"Video X.m4a\""
    );
    assert_eq!(headers[header::CONTENT_LENGTH], "11");

    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"media-bytes");
  }

  #[tokio::test]
  async fn test_download_stream_upstream_failure() {
    let upstream = media_server("media-bytes");
    let stub = StubExtractor::serving(0, &format!("{upstream}/gone"));

    let (status, body) = send(
      app(stub, 3),
      get("/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=140&stream=true"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("403"));
  }

  #[tokio::test]
  async fn test_stream_uses_extraction_proxy() {
    // each "proxy" answers the forwarded request with its own name
    let first = media_server("first");
    let second = media_server("second");
    let stub = StubExtractor::serving(0, "http://media.test/media");

    let mut state = state(stub.clone(), 3);
    state.proxies = Arc::new(ProxyRotation::new(
      None,
      vec![first.clone(), second],
      ProxyStrategy::RoundRobin,
    ));

    let resp = router(state)
      .oneshot(get(
        "/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=140&stream=true",
      ))
      .await
      .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    assert_eq!(&bytes[..], b"first");
    assert_eq!(stub.proxies_seen(), vec![Some(first)]);
  }

  #[tokio::test]
  async fn test_malformed_query_is_json_error() {
    let resp = app(StubExtractor::new(0), 3)
      .oneshot(get(
        "/api/download?action=download&url=https%3A%2F%2Fyoutu.be%2FX&itag=140&stream=yes",
      ))
      .await
      .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"]
      .as_str()
      .unwrap()
      .starts_with("Failed to deserialize query string"));
  }

  #[tokio::test]
  async fn test_analyze_then_download_refetches() {
    let stub = StubExtractor::new(0);
    let url = "https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3DX";

    send(
      app(stub.clone(), 3),
      get(&format!("/api/download?action=analyze&url={url}")),
    )
    .await;
    send(
      app(stub.clone(), 3),
      get(&format!("/api/download?action=download&url={url}&itag=137")),
    )
    .await;

    assert_eq!(stub.calls(), 2);
  }

  #[tokio::test]
  async fn test_retries_then_succeeds() {
    let stub = StubExtractor::new(2);
    let (status, _) = send(
      app(stub.clone(), 3),
      post_json("/analyze", json!({"url": "https://youtu.be/X"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(stub.calls(), 3);
  }

  #[tokio::test]
  async fn test_exhausted_retries_surface_last_error() {
    let stub = StubExtractor::new(u32::MAX);
    let (status, body) = send(
      app(stub.clone(), 3),
      post_json("/analyze", json!({"url": "https://youtu.be/X"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "extraction failed: upstream hiccup #3");
    assert_eq!(stub.calls(), 3);
  }

  #[tokio::test]
  async fn test_preflight() {
    let req = Request::builder()
      .method(Method::OPTIONS)
      .uri("/api/download")
      .header(header::ORIGIN, "http://localhost:3000")
      .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
      .body(Body::empty())
      .unwrap();
    let resp = app(StubExtractor::new(0), 3).oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
      .to_str()
      .unwrap();
    for method in ["GET", "POST", "OPTIONS"] {
      assert!(methods.contains(method));
    }
  }

  #[tokio::test]
  async fn test_health() {
    let resp = app(StubExtractor::new(0), 3)
      .oneshot(get("/health"))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
  }
}
