use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    retry::{RetryDecision, RetryPolicy, RetryState},
    ApiRequest, ApiResponse, ClientOptions, ContentstackError, RateLimiter, Result,
};

/// Performs one HTTP exchange.
///
/// Any received response is `Ok`, whatever its status. `Err` is reserved for
/// exchanges that produced no response ([`ContentstackError::Transport`]) and
/// for cancellation.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse>;
}

#[async_trait]
impl<S: HttpSend + ?Sized> HttpSend for Box<S> {
    async fn send(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse> {
        (**self).send(request, cancel).await
    }
}

#[async_trait]
impl<S: HttpSend + ?Sized> HttpSend for Arc<S> {
    async fn send(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse> {
        (**self).send(request, cancel).await
    }
}

/// Joins a base URL and a relative API path with exactly one slash.
///
/// Example: `("https://api.contentstack.io/", "/v3/locales")` →
/// `"https://api.contentstack.io/v3/locales"`
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Sends requests with `reqwest`, resolving paths against a base URL.
#[derive(Clone, Debug)]
pub struct ReqwestSender {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ReqwestSender {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn send(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), join_url(&self.base_url, &request.path))
            .headers(request.headers.clone())
            .timeout(self.timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok::<_, ContentstackError>(ApiResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ContentstackError::Cancelled),
            outcome = exchange => outcome,
        }
    }
}

/// Wraps an [`HttpSend`] with rate limiting and retries.
///
/// Every attempt, retries included, first takes a token from the shared
/// [`RateLimiter`]. Retryable outcomes (see [`RetryPolicy::classify`]) are
/// re-sent after a backoff until `max_retries` is reached; the last outcome
/// is then returned as is.
#[derive(Debug)]
pub struct ResilientTransport<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl<S: HttpSend> ResilientTransport<S> {
    pub fn new(inner: S, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
        }
    }

    /// Builds the limiter and retry policy from client options.
    pub fn from_options(inner: S, options: &ClientOptions) -> Self {
        Self::new(
            inner,
            Arc::new(RateLimiter::new(options.rate_limit, options.rate_burst)),
            RetryPolicy::from_options(options),
        )
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<S: HttpSend> HttpSend for ResilientTransport<S> {
    async fn send(&self, request: &ApiRequest, cancel: &CancellationToken) -> Result<ApiResponse> {
        let mut state = RetryState::new();

        loop {
            if cancel.is_cancelled() {
                return Err(ContentstackError::Cancelled);
            }
            self.limiter.acquire(cancel).await?;
            let outcome = self.inner.send(request, cancel).await;

            #[cfg(feature = "tracing")]
            match &outcome {
                Ok(response) => tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    attempt = state.attempt() + 1,
                    status = response.status.as_u16(),
                    "attempt completed"
                ),
                Err(err) => tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    attempt = state.attempt() + 1,
                    error = %err,
                    "attempt failed"
                ),
            }

            if self.policy.classify(&outcome) == RetryDecision::Done {
                return outcome;
            }

            if state.is_exhausted(&self.policy) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    attempts = state.attempt() + 1,
                    "giving up after retries"
                );
                return outcome;
            }

            let wait = state.next_wait(&self.policy, &outcome);

            #[cfg(feature = "tracing")]
            match &outcome {
                Ok(response) => tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    attempt = state.attempt(),
                    status = response.status.as_u16(),
                    wait_ms = wait.as_millis() as u64,
                    "retrying throttled request"
                ),
                Err(err) => tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    attempt = state.attempt(),
                    error = %err,
                    wait_ms = wait.as_millis() as u64,
                    "retrying after transport error"
                ),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ContentstackError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{
        header::{self, HeaderValue},
        StatusCode,
    };
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use super::{join_url, HttpSend, ReqwestSender, ResilientTransport};
    use crate::{ApiRequest, ApiResponse, ContentstackError, RateLimiter, Result, RetryPolicy};

    #[derive(Clone, Copy, Debug)]
    enum Step {
        Status(u16),
        RetryAfter(u64),
        ConnectionReset,
    }

    /// Replays a fixed sequence of outcomes, repeating the last one.
    struct Scripted {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into_iter().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpSend for Scripted {
        async fn send(
            &self,
            _request: &ApiRequest,
            _cancel: &CancellationToken,
        ) -> Result<ApiResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock().expect("script mutex must not be poisoned");
                if steps.len() > 1 {
                    steps.pop_front()
                } else {
                    steps.front().copied()
                }
            };
            match step.expect("script must not be empty") {
                Step::Status(code) => Ok(ApiResponse::new(
                    StatusCode::from_u16(code).expect("valid status"),
                    "{}",
                )),
                Step::RetryAfter(seconds) => {
                    let mut response = ApiResponse::new(StatusCode::TOO_MANY_REQUESTS, "{}");
                    response.headers.insert(
                        header::RETRY_AFTER,
                        HeaderValue::from_str(&seconds.to_string()).expect("valid header"),
                    );
                    Ok(response)
                }
                Step::ConnectionReset => Err(ContentstackError::Transport(Box::new(
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"),
                ))),
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(30),
            jitter: false,
        }
    }

    fn transport(script: &Arc<Scripted>, retries: u32) -> ResilientTransport<Arc<Scripted>> {
        ResilientTransport::new(
            Arc::clone(script),
            Arc::new(RateLimiter::disabled()),
            policy(retries),
        )
    }

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("https://api.contentstack.io/", "/v3/locales"),
            "https://api.contentstack.io/v3/locales"
        );
        assert_eq!(
            join_url("http://127.0.0.1:8080", "v3/webhooks"),
            "http://127.0.0.1:8080/v3/webhooks"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_429_is_returned_after_all_attempts() {
        let script = Scripted::new([Step::Status(429)]);
        let transport = transport(&script, 3);
        let start = Instant::now();

        let response = transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect("final 429 must be returned as a response");

        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(script.calls(), 4);
        // 1s + 2s + 4s of backoff between the four attempts.
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_is_not_retried() {
        let script = Scripted::new([Step::Status(500), Step::Status(200)]);
        let transport = transport(&script, 3);

        let response = transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect("500 must be returned as a response");

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_is_retried_until_success() {
        let script = Scripted::new([
            Step::ConnectionReset,
            Step::Status(429),
            Step::Status(201),
        ]);
        let transport = transport(&script, 3);

        let response = transport
            .send(&ApiRequest::post("v3/environments"), &CancellationToken::new())
            .await
            .expect("request must succeed after retries");

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_transport_error_is_returned_unchanged() {
        let script = Scripted::new([Step::ConnectionReset]);
        let transport = transport(&script, 2);

        let err = transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect_err("transport failure must surface");

        match err {
            ContentstackError::Transport(source) => {
                assert_eq!(source.to_string(), "connection reset")
            }
            other => panic!("expected transport error, got {other:?}"),
        }
        assert_eq!(script.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_makes_exactly_one_attempt() {
        let script = Scripted::new([Step::Status(429)]);
        let transport = transport(&script, 0);

        let response = transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect("429 must be returned");

        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_sets_the_wait() {
        let script = Scripted::new([Step::RetryAfter(5), Step::Status(200)]);
        let transport = transport(&script, 3);
        let start = Instant::now();

        transport
            .send(&ApiRequest::get("v3/content_types"), &CancellationToken::new())
            .await
            .expect("request must succeed");

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_returns_cancelled() {
        let script = Scripted::new([Step::Status(429)]);
        let transport = ResilientTransport::new(
            Arc::clone(&script),
            Arc::new(RateLimiter::disabled()),
            RetryPolicy {
                wait_min: Duration::from_secs(10),
                ..policy(3)
            },
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = transport
            .send(&ApiRequest::get("v3/locales"), &cancel)
            .await
            .expect_err("must be cancelled");

        assert!(matches!(err, ContentstackError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_token_sends_nothing_and_keeps_tokens() {
        let script = Scripted::new([Step::Status(200)]);
        let limiter = Arc::new(RateLimiter::new(10.0, 10));
        let transport =
            ResilientTransport::new(Arc::clone(&script), Arc::clone(&limiter), policy(3));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = transport
            .send(&ApiRequest::get("v3/locales"), &cancel)
            .await
            .expect_err("cancelled request must not complete");

        assert!(matches!(err, ContentstackError::Cancelled));
        assert_eq!(script.calls(), 0);
        assert_eq!(limiter.available(), 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn unbuildable_request_is_not_retried() {
        let transport = ResilientTransport::new(
            ReqwestSender::new("not a url", Duration::from_secs(5)),
            Arc::new(RateLimiter::disabled()),
            policy(3),
        );
        let start = Instant::now();

        let err = transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect_err("invalid URL must fail");

        assert!(matches!(err, ContentstackError::Config(_)), "got {err:?}");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_draw_from_the_rate_budget() {
        let script = Scripted::new([Step::Status(429)]);
        let transport = ResilientTransport::new(
            Arc::clone(&script),
            Arc::new(RateLimiter::new(1.0, 1)),
            RetryPolicy {
                wait_min: Duration::ZERO,
                wait_max: Duration::ZERO,
                ..policy(2)
            },
        );
        let start = Instant::now();

        transport
            .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
            .await
            .expect("429 must be returned");

        assert_eq!(script.calls(), 3);
        // One token up front, then one per second for each retry.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_budget() {
        let script = Scripted::new([Step::Status(200)]);
        let transport = Arc::new(ResilientTransport::new(
            Arc::clone(&script),
            Arc::new(RateLimiter::new(10.0, 10)),
            policy(3),
        ));
        let start = Instant::now();

        let tasks: Vec<_> = (0..15)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    transport
                        .send(&ApiRequest::get("v3/locales"), &CancellationToken::new())
                        .await
                        .map(|response| response.status)
                })
            })
            .collect();

        for task in tasks {
            let status = task.await.expect("task must not panic").expect("must succeed");
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(script.calls(), 15);
        // Five requests beyond the burst need half a second of refill.
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
