use thiserror::Error;

/// Every failure a gateway request can end with.
///
/// `Canceled` is terminal but not an error from the client's point of view:
/// it is what a completion receives when its task was cancelled, either by
/// the caller or because a sibling task failed fatally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Object not found: {0}")]
    ObjectNotFound(String),
    #[error("Bad query: {0}")]
    BadQuery(String),
    #[error("Unknown property: {0}")]
    UnknownProperty(String),
    #[error("Backend action failed: {0}")]
    BackendActionFailed(String),
    #[error("Operation canceled")]
    Canceled,
    #[error("No task queue registered for {0}")]
    QueueNotFound(String),
    #[error("Invalid DIDL-Lite payload: {0}")]
    Didl(String),
}

impl GatewayError {
    pub fn device_not_found(path: &str) -> Self {
        GatewayError::ObjectNotFound(format!(
            "Cannot locate device corresponding to the specified path {}",
            path
        ))
    }

    pub fn backend(message: impl Into<String>) -> Self {
        GatewayError::BackendActionFailed(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, GatewayError::Canceled)
    }
}
