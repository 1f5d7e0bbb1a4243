use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{ContentstackError, Result};

/// One logical request against the Management API.
///
/// The transport borrows the request for every attempt, so retries replay the
/// same method, path, headers and body bytes.
#[derive(Clone, Debug)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the client's base URL, e.g. `v3/locales`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serializes `body` as the JSON request payload.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        let bytes = serde_json::to_vec(body)
            .map_err(|err| ContentstackError::Decode(format!("invalid request body: {err}")))?;
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }
}

/// Raw response from a single exchange.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Delay requested by the server via `Retry-After: <seconds>`.
    ///
    /// HTTP-date values are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(header::RETRY_AFTER)?.to_str().ok()?;
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decodes a success body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|err| {
            ContentstackError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                self.text()
            ))
        })
    }

    /// Converts a non-success response into the matching error variant.
    pub fn into_error(self) -> ContentstackError {
        let status = self.status.as_u16();
        match RemoteError::from_body(&self.body) {
            Some(error) => ContentstackError::Remote { status, error },
            None => ContentstackError::Http {
                status,
                body: self.text(),
            },
        }
    }
}

/// Error payload returned by the Management API.
///
/// ```json
/// { "error_message": "...", "error_code": 119, "errors": { "title": ["is not unique."] } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub errors: BTreeMap<String, Vec<String>>,
}

impl RemoteError {
    pub(crate) fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Self>(body)
            .ok()
            .filter(|error| !error.error_message.is_empty())
    }
}
