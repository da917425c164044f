//! HTTP GET queries, used by the CLI to persist remote resources.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::query::QueryKey;

/// Query key for HTTP resources.
#[derive(Clone, Debug)]
pub enum HttpQueryKey {
  /// GET a URL
  Get { url: Url },
}

impl HttpQueryKey {
  /// Parse and normalize a URL into a GET query key.
  pub fn get(raw: &str) -> Result<Self> {
    let url = Url::parse(raw).map_err(|e| eyre!("Invalid URL {}: {}", raw, e))?;
    Ok(Self::Get {
      url: normalize_url(url),
    })
  }

  pub fn url(&self) -> &Url {
    match self {
      Self::Get { url } => url,
    }
  }
}

impl QueryKey for HttpQueryKey {
  fn identity(&self) -> Result<Value> {
    match self {
      Self::Get { url } => Ok(json!(["http", {"method": "GET", "url": url.as_str()}])),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Get { url } => format!("GET {}", url),
    }
  }
}

/// Sort query pairs and drop the fragment so equivalent URLs hash alike.
fn normalize_url(mut url: Url) -> Url {
  url.set_fragment(None);

  let mut pairs: Vec<(String, String)> = url
    .query_pairs()
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();

  if pairs.is_empty() {
    url.set_query(None);
  } else {
    pairs.sort();
    url.query_pairs_mut().clear().extend_pairs(pairs);
  }

  url
}

/// A fetched HTTP response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: String,
}

/// Thin reqwest wrapper producing persistable responses.
#[derive(Clone)]
pub struct HttpClient {
  client: reqwest::Client,
}

impl HttpClient {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("qpersist/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }

  /// GET `url`. Non-success statuses are errors and are never persisted.
  pub async fn get(&self, url: Url) -> Result<HttpResponse> {
    let response = self
      .client
      .get(url.clone())
      .send()
      .await
      .map_err(|e| eyre!("Failed to GET {}: {}", url, e))?
      .error_for_status()
      .map_err(|e| eyre!("GET {} failed: {}", url, e))?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?;

    Ok(HttpResponse {
      status,
      content_type,
      body,
    })
  }
}
