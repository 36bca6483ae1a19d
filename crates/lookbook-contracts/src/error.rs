use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure classes for one batch run.
///
/// `Precondition` aborts the whole batch attempt before any remote
/// call. `Encoding` and `RemoteCall` are target-level: they end the
/// current target and the batch moves on to the next one.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("failed to encode {path}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("generation call failed: {0}")]
    RemoteCall(String),
}

impl BatchError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteCall(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use super::BatchError;

    #[test]
    fn encoding_error_names_the_offending_path() {
        let err = BatchError::Encoding {
            path: PathBuf::from("/tmp/missing.png"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(err.to_string(), "failed to encode /tmp/missing.png");
    }

    #[test]
    fn remote_error_carries_message() {
        let err = BatchError::remote("Gemini returned status 500");
        assert_eq!(
            err.to_string(),
            "generation call failed: Gemini returned status 500"
        );
    }
}
