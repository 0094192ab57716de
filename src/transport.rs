// ===============================
// src/transport.rs
// ===============================
//
// The HTTP seam. `RestClient` only sees `HttpTransport`, so tests can swap
// in a scripted transport and production uses reqwest.
//
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::{ClientError, ClientResult};

pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outgoing request. `params` is the already-encoded (and, for signed
/// calls, already-signed) parameter string: it goes in the query string for
/// GET/DELETE and in a form body for POST.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub params: String,
    pub api_key: Option<String>,
}

impl HttpRequest {
    /// URL with the query string attached (GET/DELETE) or bare (POST).
    pub fn full_url(&self) -> String {
        if self.params.is_empty() || self.method == Method::Post {
            self.url.clone()
        } else {
            format!("{}?{}", self.url, self.params)
        }
    }

    pub fn path(&self) -> &str {
        match self.url.find("://") {
            Some(i) => {
                let rest = &self.url[i + 3..];
                rest.find('/').map(|j| &rest[j..]).unwrap_or("/")
            }
            None => &self.url,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, req: HttpRequest) -> ClientResult<HttpResponse>;
}

/// reqwest-backed transport (rustls).
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, req: HttpRequest) -> ClientResult<HttpResponse> {
        let mut headers = HeaderMap::new();
        if let Some(key) = req.api_key.as_deref() {
            let v = HeaderValue::from_str(key)
                .map_err(|_| ClientError::Validation("api key is not a valid header value".into()))?;
            headers.insert(API_KEY_HEADER, v);
        }

        let builder = match req.method {
            Method::Get => self.http.get(req.full_url()),
            Method::Delete => self.http.delete(req.full_url()),
            Method::Post => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
                self.http.post(req.full_url()).body(req.params.clone())
            }
        };

        let resp = builder.headers(headers).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpResponse { status, body })
    }
}
