//! Concurrent reconciliation of independently addressed resources.
//!
//! One logical weight change may touch several resources (every Ambassador
//! Mapping or OpenShift Route a Rollout names). Each is reconciled
//! concurrently and every failure is collected; already-converged resources
//! are not rolled back since the next pass retries the rest.

use anyhow::Result;
use futures::future;
use std::{fmt, future::Future};

/// More than one resource failed to reconcile.
#[derive(Debug)]
pub struct AggregateError(Vec<anyhow::Error>);

/// Runs `reconcile` for every name concurrently and waits for all of them.
///
/// A single failure is returned unwrapped; several are combined into an
/// [`AggregateError`], in the order the names were given.
pub async fn reconcile_all<'n, I, F, Fut>(names: I, reconcile: F) -> Result<()>
where
    I: IntoIterator<Item = &'n str>,
    F: Fn(&'n str) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let tasks = names.into_iter().map(|name| {
        let task = reconcile(name);
        async move { (name, task.await) }
    });

    let errors = future::join_all(tasks)
        .await
        .into_iter()
        .filter_map(|(name, res)| {
            let error = res.err()?;
            tracing::debug!(%name, %error, "Failed to reconcile");
            Some(error)
        })
        .collect();
    aggregate(errors)
}

/// Folds a list of errors into a single result.
pub fn aggregate(mut errors: Vec<anyhow::Error>) -> Result<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(AggregateError(errors).into()),
    }
}

// === impl AggregateError ===

impl AggregateError {
    pub fn errors(&self) -> &[anyhow::Error] {
        &self.0
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors found:", self.0.len())?;
        for (i, error) in self.0.iter().enumerate() {
            write!(f, " Error {}: {:#}", i + 1, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}
