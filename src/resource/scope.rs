use super::{Finalizer, TestResource};
use crate::error::HarnessError;
use tracing::{debug, error, info, warn};

/// Outcome of closing a [`Scope`]
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Finalizers that succeeded
    pub completed: usize,
    /// Finalizers that failed, with their resource and error
    pub failed: Vec<(String, HarnessError)>,
    /// Finalizers dropped because cleanup is disabled
    pub skipped: usize,
}

impl CleanupReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Stack of finalizers owned by one test scope
///
/// Finalizers run in reverse registration order, each at most once, and a
/// failing finalizer never prevents the ones after it from running.
#[derive(Default)]
pub struct Scope {
    finalizers: Vec<(String, Finalizer)>,
    skip_cleanup: bool,
}

impl Scope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave everything behind on close
    #[must_use]
    pub fn skip_cleanup(mut self, skip: bool) -> Self {
        self.skip_cleanup = skip;
        self
    }

    /// Commit a resource and register its finalizer
    ///
    /// The finalizer is registered right after the first successful commit,
    /// so a resource whose commit failed is never finalized, and a resource
    /// committed again does not get a second finalizer.
    pub async fn commit<R>(&mut self, resource: &mut R) -> Result<(), HarnessError>
    where
        R: TestResource + ?Sized,
    {
        let first = !resource.is_committed();
        resource.commit().await?;

        if first {
            self.defer(
                format!("{} '{}'", resource.kind(), resource.name()),
                resource.finalizer(),
            );
        }
        Ok(())
    }

    /// Register an arbitrary finalizer
    pub fn defer(&mut self, description: impl Into<String>, finalizer: Finalizer) {
        let description = description.into();
        debug!(resource = %description, "Registered finalizer");
        self.finalizers.push((description, finalizer));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.finalizers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.finalizers.is_empty()
    }

    /// Descriptions of pending finalizers, in registration order
    #[must_use]
    pub fn pending(&self) -> Vec<&str> {
        self.finalizers.iter().map(|(d, _)| d.as_str()).collect()
    }

    /// Run every finalizer, newest first
    pub async fn close(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        if self.skip_cleanup {
            report.skipped = self.finalizers.len();
            if report.skipped > 0 {
                warn!(
                    resources = ?self.pending(),
                    "Cleanup skipped, leaving resources behind"
                );
            }
            self.finalizers.clear();
            return report;
        }

        while let Some((description, finalizer)) = self.finalizers.pop() {
            match finalizer().await {
                Ok(()) => {
                    debug!(resource = %description, "Finalized");
                    report.completed += 1;
                }
                Err(e) => {
                    error!(resource = %description, error = %e, "Finalizer failed");
                    report.failed.push((description, e));
                }
            }
        }

        info!(
            completed = report.completed,
            failed = report.failed.len(),
            "Scope closed"
        );
        report
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if !self.finalizers.is_empty() {
            warn!(
                resources = ?self.pending(),
                "Scope dropped without close, resources were not cleaned up"
            );
        }
    }
}
