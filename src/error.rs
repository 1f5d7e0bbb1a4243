use crate::wire::RemoteError;

/// Boxed connection-level error from the underlying HTTP stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ContentstackError {
    /// Connection-level failure (DNS, TCP, TLS, timeout); no response received.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    /// Non-success status carrying a structured Contentstack error payload.
    #[error("remote error {status}: {}", .error.error_message)]
    Remote { status: u16, error: RemoteError },
    /// Non-success status with a body that is not a Contentstack error payload.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The caller cancelled while the request was waiting or in flight.
    #[error("request cancelled")]
    Cancelled,
    /// Request serialization or response decoding error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ContentstackError {
    fn from(err: reqwest::Error) -> Self {
        // A request that cannot be built will never succeed on retry.
        if err.is_builder() {
            return Self::Config(err.to_string());
        }
        Self::Transport(Box::new(err))
    }
}

/// User-facing rendering of an error, split into a headline and details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub summary: String,
    pub detail: String,
}

impl ContentstackError {
    /// HTTP status of the response that caused this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } | Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Formats the error for display by resource handlers.
    ///
    /// Structured remote errors list each field error on its own line as
    /// ` <field> - <message>`.
    pub fn diagnostic(&self) -> Diagnostic {
        match self {
            Self::Remote { error, .. } => {
                let detail = error
                    .errors
                    .iter()
                    .flat_map(|(field, messages)| {
                        messages
                            .iter()
                            .map(move |message| format!(" {field} - {message}"))
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Diagnostic {
                    summary: error.error_message.clone(),
                    detail,
                }
            }
            other => {
                let text = other.to_string();
                Diagnostic {
                    summary: text.clone(),
                    detail: text,
                }
            }
        }
    }
}
