use std::time::Duration;

use pumice::vk;

use crate::pool::PoolKey;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the handle pools and the submission scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed configuration, key or handle; raised before any native call is made.
    #[error("invalid argument: {0}")]
    Validation(String),
    /// A native call returned a non-success code.
    #[error("{operation} failed with {code:?}")]
    NativeCall {
        operation: &'static str,
        code: vk::Result,
    },
    /// The backing pool stayed at capacity for `key` for the whole allowed wait.
    #[error("no command pool for {key:?} became available within {waited:?}")]
    PoolExhausted { key: PoolKey, waited: Duration },
    /// A command builder failed while recording.
    #[error("command recording failed: {0}")]
    Record(String),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
    #[error("submission task panicked: {0}")]
    TaskPanicked(String),
}

impl Error {
    pub fn native(operation: &'static str, code: vk::Result) -> Self {
        Self::NativeCall { operation, code }
    }
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
    pub fn record(message: impl Into<String>) -> Self {
        Self::Record(message.into())
    }
}

pub(crate) trait NativeResultExt<T> {
    fn native(self, operation: &'static str) -> Result<T>;
}

impl<T> NativeResultExt<T> for std::result::Result<T, vk::Result> {
    #[inline]
    fn native(self, operation: &'static str) -> Result<T> {
        self.map_err(|code| Error::native(operation, code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::native("vkQueueSubmit2KHR", vk::Result::ERROR_DEVICE_LOST);
        assert!(err.to_string().starts_with("vkQueueSubmit2KHR failed with"));

        let err = Error::validation("backing_pool_size must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid argument: backing_pool_size must be at least 1"
        );
    }
}
