use capability_controller_core as core;
use capability_controller_k8s_api::StoreError;
use std::{fmt, time::Duration};
use thiserror::Error;

/// Errors that fail a reconciliation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{resource} was modified concurrently on each of {attempts} attempts")]
    Conflict { resource: String, attempts: usize },

    #[error("{resource} is owned by {owner}")]
    OwnedElsewhere { resource: String, owner: String },

    #[error("no {kind} matching {selector} in {namespace} after {attempts} attempts")]
    CollaboratorNotYetAvailable {
        kind: String,
        namespace: String,
        selector: String,
        attempts: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] core::Error),

    #[error("reconciliation did not complete within {0:?}")]
    Timeout(Duration),

    #[error("{}", Joined(.0))]
    Aggregate(Vec<Error>),
}

struct Joined<'a>(&'a [Error]);

// === impl Error ===

impl Error {
    /// Joins the errors of independent steps. Nested aggregates are flattened.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Result<(), Error> {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Error::Aggregate(inner) => flat.extend(inner),
                error => flat.push(error),
            }
        }
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Aggregate(flat)),
        }
    }

    /// A short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Conflict { .. } => "conflict",
            Self::OwnedElsewhere { .. } => "owned_elsewhere",
            Self::CollaboratorNotYetAvailable { .. } => "collaborator_not_available",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Timeout(_) => "timeout",
            Self::Aggregate(_) => "aggregate",
        }
    }
}

impl fmt::Display for Joined<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} steps failed", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(name: &str) -> Error {
        Error::Store(StoreError::NotFound(name.to_string()))
    }

    #[test]
    fn join() {
        assert!(Error::join(None).is_ok());

        let one = Error::join(Some(not_found("a"))).unwrap_err();
        assert!(matches!(one, Error::Store(_)));

        let nested = Error::join([
            not_found("a"),
            Error::Aggregate(vec![not_found("b"), not_found("c")]),
        ])
        .unwrap_err();
        let Error::Aggregate(errors) = &nested else {
            panic!("expected an aggregate, got {nested}");
        };
        assert_eq!(errors.len(), 3);
        assert_eq!(
            nested.to_string(),
            "3 steps failed: a not found; b not found; c not found"
        );
    }
}
