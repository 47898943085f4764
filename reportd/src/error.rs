//! Application-wide error types.

use std::fmt;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("empty request: no cards to fetch")]
    EmptyRequest,

    #[error("operation canceled")]
    Canceled,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("invalid expression {expr:?}: {reason}")]
    InvalidExpression { expr: String, reason: String },

    #[error("unexpected result type: expected bool, got {0}")]
    UnexpectedResultType(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("malformed report {report}: {reason}")]
    MalformedReport { report: String, reason: String },

    #[error("no delivery targets resolved for report {0}")]
    NoTargets(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("render error: {0}")]
    Render(#[from] report_render::RenderError),

    #[error("{sink} delivery failed: {reason}")]
    Delivery { sink: &'static str, reason: String },

    #[error("{sink} sink does not support {kind} artifacts")]
    UnsupportedArtifact {
        sink: &'static str,
        kind: &'static str,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Joined(JoinedError),

    #[error("{0}")]
    Other(String),
}

/// Several independent failures reported together.
#[derive(Debug)]
pub struct JoinedError(Vec<Error>);

impl JoinedError {
    pub fn errors(&self) -> &[Error] {
        &self.0
    }
}

impl fmt::Display for JoinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn delivery(sink: &'static str, reason: impl fmt::Display) -> Self {
        Self::Delivery {
            sink,
            reason: reason.to_string(),
        }
    }

    pub fn malformed(report: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedReport {
            report: report.into(),
            reason: reason.into(),
        }
    }

    /// Combine independent failures. Returns `None` when there is nothing to
    /// report and the error itself when there is exactly one. Nested joins
    /// are flattened.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                Error::Joined(inner) => flat.extend(inner.0),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Error::Joined(JoinedError(flat))),
        }
    }

    /// Leaf errors of this error, one element unless joined.
    pub fn leaves(&self) -> Vec<&Error> {
        match self {
            Error::Joined(inner) => inner.0.iter().collect(),
            other => vec![other],
        }
    }

    /// Whether retrying or reconnecting may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::Timeout(_) => true,
            Error::Delivery { sink, .. } => matches!(*sink, "smb" | "smtp"),
            Error::Joined(inner) => inner.0.iter().all(Error::is_transient),
            _ => false,
        }
    }

    /// Whether the pipeline should stop rather than continue with the next job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Canceled | Error::ChannelClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_empty_and_single() {
        assert!(Error::join(Vec::new()).is_none());
        let single = Error::join(vec![Error::EmptyRequest]).unwrap();
        assert!(matches!(single, Error::EmptyRequest));
    }

    #[test]
    fn test_join_flattens_and_displays() {
        let inner = Error::join(vec![
            Error::Transport("a".into()),
            Error::Decode("b".into()),
        ])
        .unwrap();
        let outer = Error::join(vec![inner, Error::Canceled]).unwrap();

        assert_eq!(outer.leaves().len(), 3);
        assert_eq!(
            outer.to_string(),
            "transport error: a; decode error: b; operation canceled"
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(Error::Transport("x".into()).is_transient());
        assert!(Error::delivery("smb", "reset").is_transient());
        assert!(!Error::delivery("telegram", "bad request").is_transient());
        assert!(!Error::EmptyRequest.is_transient());
    }

    #[test]
    fn test_is_fatal() {
        assert!(Error::Canceled.is_fatal());
        assert!(Error::ChannelClosed("jobs").is_fatal());
        assert!(!Error::Timeout("job".into()).is_fatal());
    }
}
