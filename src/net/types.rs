use reqwest::Method;
use url::Url;

/// Header list in wire order. Names compare case-insensitively.
pub type Headers = Vec<(String, String)>;

pub const DATA_UNAVAILABLE: &str = "Offline - data not available";
pub const NETWORK_UNAVAILABLE: &str = "Network unavailable";
pub const QUEUED_FOR_RETRY: &str = "Offline - queued for retry";
pub const INVALID_REQUEST: &str = "Invalid request";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>My Quran Journey - Offline</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
      body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; text-align: center; padding: 2rem; }
      .container { max-width: 400px; margin: 0 auto; }
    </style>
  </head>
  <body>
    <div class="container">
      <h1>My Quran Journey</h1>
      <p>You're currently offline, but you can still access cached content.</p>
      <button onclick="window.location.reload()">Try Again</button>
    </div>
  </body>
</html>
"#;

/// How the host issued the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Data or subresource fetch
  #[default]
  Fetch,
  /// Full page load
  Navigate,
}

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
  pub mode: RequestMode,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
      mode: RequestMode::Fetch,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// A page navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }
}

/// A response snapshot, either from the origin, the cache, or synthesized here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// 2xx and 3xx count as success for caching purposes.
  pub fn is_ok(&self) -> bool {
    (200..400).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    find_header(&self.headers, name)
  }

  /// `503` with body `{"error":"<message>"}`.
  pub fn json_error(message: &str) -> Self {
    Self::json_status(503, message)
  }

  pub fn json_status(status: u16, message: &str) -> Self {
    let body = serde_json::json!({ "error": message }).to_string();
    Self::new(
      status,
      vec![("Content-Type".to_string(), "application/json".to_string())],
      body,
    )
  }

  /// Minimal page shown for navigations when neither network nor cache can answer.
  pub fn offline_page() -> Self {
    Self::new(
      200,
      vec![("Content-Type".to_string(), "text/html".to_string())],
      OFFLINE_PAGE,
    )
  }
}

fn find_header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
  headers
    .iter()
    .find(|(n, _)| n.eq_ignore_ascii_case(name))
    .map(|(_, v)| v.as_str())
}
