//! Failure policy for unrecoverable misuse of the fixed-capacity structures.

use serde::{Deserialize, Serialize};

/// What to do when an operation hits a condition the caller was supposed to
/// provision away: pool exhaustion or an invalid slot handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log at error level and panic.
    #[default]
    Panic,
    /// Hand the error back to the caller.
    Error,
}

impl FailurePolicy {
    /// Apply the policy to `err`.
    ///
    /// Under [`FailurePolicy::Panic`] this never returns.
    #[track_caller]
    pub(crate) fn escalate<E: std::fmt::Display>(self, err: E) -> E {
        match self {
            FailurePolicy::Panic => {
                tracing::error!(error = %err, "Fatal misuse of fixed-capacity structure");
                panic!("{err}");
            }
            FailurePolicy::Error => err,
        }
    }

    /// True when failures panic instead of being returned.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FailurePolicy::Panic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_panic() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Panic);
        assert!(FailurePolicy::default().is_fatal());
    }

    #[test]
    fn error_policy_returns_error() {
        let err = FailurePolicy::Error.escalate("pool exhausted");
        assert_eq!(err, "pool exhausted");
    }

    #[test]
    #[should_panic(expected = "pool exhausted")]
    fn panic_policy_panics() {
        FailurePolicy::Panic.escalate("pool exhausted");
    }

    #[test]
    fn serializes_snake_case() {
        insta::assert_json_snapshot!(FailurePolicy::Error, @r#""error""#);
        let parsed: FailurePolicy = serde_json::from_str(r#""panic""#).unwrap();
        assert_eq!(parsed, FailurePolicy::Panic);
    }
}
