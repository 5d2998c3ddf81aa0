//! Error types shared across Cutlog crates.

/// Top-level error type for Cutlog operations.
///
/// The first five variants form the caller-facing taxonomy; the remaining
/// ones wrap infrastructure failures and are reported as internal errors.
#[derive(Debug, thiserror::Error)]
pub enum CutlogError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Transcoding failed: {message}")]
    Transcoding { message: String },

    #[error("Invalid state: {message}")]
    State { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CutlogError.
pub type CutlogResult<T> = Result<T, CutlogError>;

/// Coarse classification used by the operational surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Transcoding,
    State,
    Internal,
}

impl CutlogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict {
            message: msg.into(),
        }
    }

    pub fn transcoding(msg: impl Into<String>) -> Self {
        Self::Transcoding {
            message: msg.into(),
        }
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Rebuild an error of `kind` from a message recorded earlier, such as
    /// a failed job's.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Validation => Self::validation(message),
            ErrorKind::NotFound => Self::not_found("render input", message),
            ErrorKind::Conflict => Self::conflict(message),
            ErrorKind::Transcoding => Self::transcoding(message),
            ErrorKind::State => Self::state(message),
            ErrorKind::Internal => Self::Other(anyhow::anyhow!(message)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Transcoding { .. } => ErrorKind::Transcoding,
            Self::State { .. } => ErrorKind::State,
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Internal => 1,
            ErrorKind::Validation => 2,
            ErrorKind::NotFound => 3,
            ErrorKind::Conflict => 4,
            ErrorKind::Transcoding => 5,
            ErrorKind::State => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        let errors = [
            CutlogError::validation("empty ops"),
            CutlogError::not_found("project", "p1"),
            CutlogError::conflict("version race"),
            CutlogError::transcoding("engine exited 1"),
            CutlogError::state("not archived"),
            CutlogError::Io(std::io::Error::other("disk")),
        ];
        let mut codes: Vec<u8> = errors.iter().map(CutlogError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_from_kind_keeps_exit_code() {
        let recorded = [
            CutlogError::validation("project p1 has no source asset"),
            CutlogError::not_found("source asset", "sha256-ab"),
            CutlogError::transcoding("engine exited 1"),
            CutlogError::Io(std::io::Error::other("disk full")),
        ];
        for err in recorded {
            let rebuilt = CutlogError::from_kind(err.kind(), err.to_string());
            assert_eq!(rebuilt.exit_code(), err.exit_code());
            assert!(rebuilt.to_string().contains(&err.to_string()));
        }
        assert_eq!(
            serde_json::to_value(ErrorKind::NotFound).unwrap(),
            "not_found"
        );
    }

    #[test]
    fn test_not_found_message_names_the_kind() {
        let err = CutlogError::not_found("export", "p1-v3");
        assert_eq!(err.to_string(), "export not found: p1-v3");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
