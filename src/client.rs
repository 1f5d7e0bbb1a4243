use std::fmt;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    transport::{HttpSend, ReqwestSender, ResilientTransport},
    ApiRequest, ApiResponse, ClientOptions, ContentstackError, RateLimiter, Result,
};

/// Rate-limited, retrying transport shared by a client and its clones.
type SharedTransport = Arc<ResilientTransport<Box<dyn HttpSend>>>;

#[derive(Clone)]
/// HTTP client for the Contentstack Content Management API.
///
/// Cheap to clone; clones share the rate-limit budget. Construct one per
/// provider lifecycle and hand it to each resource operation.
pub struct ContentstackClient {
    transport: SharedTransport,
    options: Arc<ClientOptions>,
    stack_headers: HeaderMap,
    cancel: CancellationToken,
}

impl fmt::Debug for ContentstackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentstackClient")
            .field("options", &self.options)
            .field("policy", self.transport.policy())
            .finish()
    }
}

impl ContentstackClient {
    /// Creates a client sending requests with `reqwest`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use contentstack_http::{ClientOptions, ContentstackClient};
    ///
    /// let client = ContentstackClient::new(
    ///     ClientOptions::default().with_stack("blt0123456789", "cs-management-token"),
    /// )
    /// .expect("valid options");
    /// ```
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let http = reqwest::Client::builder().build()?;
        let sender = ReqwestSender::with_client(http, options.base_url.clone(), options.timeout);
        Self::with_sender(options, sender)
    }

    /// Creates a client from `CONTENTSTACK_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`] for the variables read.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env()?)
    }

    /// Creates a client on top of a custom sender.
    ///
    /// The sender receives paths relative to the base URL and is wrapped in
    /// the same rate limiting and retry handling as the default one.
    pub fn with_sender<S>(options: ClientOptions, sender: S) -> Result<Self>
    where
        S: HttpSend + 'static,
    {
        options.validate()?;
        let stack_headers = build_stack_headers(&options)?;
        let sender: Box<dyn HttpSend> = Box::new(sender);
        let transport = Arc::new(ResilientTransport::from_options(sender, &options));

        #[cfg(feature = "tracing")]
        tracing::debug!(
            base_url = %options.base_url,
            rate_limit = options.rate_limit,
            rate_burst = options.rate_burst,
            max_retries = options.max_retries,
            "contentstack client configured"
        );

        Ok(Self {
            transport,
            options: Arc::new(options),
            stack_headers,
            cancel: CancellationToken::new(),
        })
    }

    /// Returns a client whose requests are aborted when `cancel` fires.
    ///
    /// The returned client shares this client's rate-limit budget.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        self.transport.limiter()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends a request with stack headers attached and returns the raw
    /// response, whatever its status.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        for (name, value) in &self.stack_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        self.transport.send(&request, &self.cancel).await
    }

    /// Sends a request and decodes a success body into `T`.
    ///
    /// Non-success responses become [`ContentstackError::Remote`] or
    /// [`ContentstackError::Http`].
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        response.json()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(ApiRequest::get(path)).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let request = query
            .iter()
            .fold(ApiRequest::get(path), |request, (key, value)| {
                request.with_query(*key, *value)
            });
        self.execute(request).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::post(path).with_json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(ApiRequest::put(path).with_json(body)?).await
    }

    /// Deletes a resource. The success body (usually a notice) is discarded.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(ApiRequest::delete(path)).await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        Ok(())
    }
}

fn build_stack_headers(options: &ClientOptions) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let entries = [
        ("api_key", &options.api_key, false),
        ("authorization", &options.management_token, true),
        ("authtoken", &options.auth_token, true),
        ("branch", &options.branch, false),
    ];

    for (name, value, sensitive) in entries {
        let Some(value) = value else {
            continue;
        };
        let mut value = HeaderValue::from_str(value.trim()).map_err(|_| {
            ContentstackError::Config(format!("{name} contains characters not allowed in a header"))
        })?;
        value.set_sensitive(sensitive);
        headers.insert(HeaderName::from_static(name), value);
    }

    Ok(headers)
}
