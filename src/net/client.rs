use reqwest::header::HeaderMap;
use reqwest::Client;

use super::{Headers, Network, Request, Response};
use crate::error::Result;

/// [`Network`] backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = Client::builder()
      .user_agent(concat!("offline-sync/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await?;

    let status = response.status().as_u16();
    let headers = snapshot_headers(response.headers());
    let body = response.bytes().await?;

    Ok(Response::new(status, headers, body.to_vec()))
  }
}

/// Every origin header, in wire order. Non-UTF-8 values are kept lossily.
fn snapshot_headers(headers: &HeaderMap) -> Headers {
  headers
    .iter()
    .map(|(name, value)| {
      (
        name.as_str().to_string(),
        String::from_utf8_lossy(value.as_bytes()).into_owned(),
      )
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderName, HeaderValue};

  #[test]
  fn test_opaque_header_values_are_kept() {
    let mut headers = HeaderMap::new();
    headers.insert(
      HeaderName::from_static("content-type"),
      HeaderValue::from_static("audio/mpeg"),
    );
    headers.insert(
      HeaderName::from_static("content-disposition"),
      HeaderValue::from_bytes(b"inline; filename=\"f\xe2tiha.mp3\"").unwrap(),
    );

    let snapshot = snapshot_headers(&headers);

    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.contains(&("content-type".to_string(), "audio/mpeg".to_string())));
    let (_, disposition) = snapshot
      .iter()
      .find(|(name, _)| name == "content-disposition")
      .unwrap();
    assert!(disposition.starts_with("inline; filename="));
    assert!(disposition.contains('\u{FFFD}'));
  }
}
