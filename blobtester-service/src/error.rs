use thiserror::Error;

/// Errors returned by storage backends and the [`Container`](crate::Container) handle.
#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the reqwest client, such as connection failures or broken body streams.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// The operation that was attempted.
        context: String,
        /// The underlying client error.
        #[source]
        cause: reqwest::Error,
    },

    /// The remote service answered with an unexpected status code.
    #[error("{context}: unexpected status {status}: {body}")]
    Status {
        /// The operation that was attempted.
        context: String,
        /// The status code of the response.
        status: reqwest::StatusCode,
        /// The response body, usually an error document.
        body: String,
    },

    /// The requested blob does not exist in the container.
    #[error("blob `{blob}` not found in container `{container}`")]
    BlobNotFound {
        /// Name of the container.
        container: String,
        /// Name of the missing blob.
        blob: String,
    },

    /// The account key could not be decoded.
    #[error("invalid storage credentials: {0}")]
    InvalidCredentials(String),

    /// A container or blob name that the backend cannot address.
    #[error("invalid name `{name}`: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is not accepted.
        reason: &'static str,
    },
}

impl BackendError {
    pub(crate) fn reqwest(context: impl Into<String>, cause: reqwest::Error) -> Self {
        Self::Reqwest {
            context: context.into(),
            cause,
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
