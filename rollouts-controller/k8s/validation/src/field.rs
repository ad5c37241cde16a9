use rollouts_controller_k8s_api::tree::Path;
use std::fmt;

/// The category of a validation finding, rendered the way the Kubernetes API
/// server renders field errors.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorType {
    Invalid,
    Required,
    NotFound,
    Internal,
}

/// A finding about a Rollout field, e.g.
/// `spec.strategy.canary.stableService: Invalid value: "web": ...`.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {error_type}: {}{detail}", quoted(.bad_value))]
pub struct FieldError {
    pub error_type: ErrorType,
    pub field: Path,
    pub bad_value: Option<String>,
    pub detail: String,
}

// === impl ErrorType ===

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => "Invalid value".fmt(f),
            Self::Required => "Required value".fmt(f),
            Self::NotFound => "Not found".fmt(f),
            Self::Internal => "Internal error".fmt(f),
        }
    }
}

// === impl FieldError ===

impl FieldError {
    pub fn invalid(field: Path, bad_value: impl ToString, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Invalid,
            field,
            bad_value: Some(bad_value.to_string()),
            detail: detail.into(),
        }
    }

    pub fn required(field: Path, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Required,
            field,
            bad_value: None,
            detail: detail.into(),
        }
    }

    pub fn not_found(field: Path, bad_value: impl ToString) -> Self {
        Self {
            error_type: ErrorType::NotFound,
            field,
            bad_value: Some(bad_value.to_string()),
            detail: String::new(),
        }
    }

    pub fn internal(field: Path, detail: impl Into<String>) -> Self {
        Self {
            error_type: ErrorType::Internal,
            field,
            bad_value: None,
            detail: detail.into(),
        }
    }
}

fn quoted(bad_value: &Option<String>) -> String {
    match bad_value {
        Some(value) => format!("{value:?}: "),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_the_api_server() {
        let err = FieldError::invalid(
            Path::from(["spec", "strategy", "canary", "stableService"]),
            "web",
            "Service \"web\" has unmatch label \"app\" in rollout",
        );
        assert_eq!(
            err.to_string(),
            "spec.strategy.canary.stableService: Invalid value: \"web\": Service \"web\" has unmatch label \"app\" in rollout"
        );

        let err = FieldError::internal(Path::from(["spec"]), "boom");
        assert_eq!(err.to_string(), "spec: Internal error: boom");
    }
}
