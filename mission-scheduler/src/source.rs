//! The sensor source seam.

use mission_common::{Category, TelemetrySnapshot};

use crate::error::SourceError;

/// Produces one telemetry snapshot per call.
///
/// A source is owned by exactly one [`SamplingTask`](crate::SamplingTask) and
/// is never shared, so `sample` takes `&mut self` and needs no locking. Sources
/// backed by fallible providers report failures as [`SourceError`]; the task
/// logs them and keeps its schedule.
pub trait SensorSource: Send + 'static {
    /// The category every snapshot from this source belongs to.
    fn category(&self) -> Category;

    /// Capture one snapshot.
    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError>;
}

impl SensorSource for Box<dyn SensorSource> {
    fn category(&self) -> Category {
        (**self).category()
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        (**self).sample()
    }
}

/// A source backed by a closure.
pub struct FnSource<F> {
    category: Category,
    sample_fn: F,
}

/// Build a [`SensorSource`] from a closure.
pub fn source_fn<F>(category: Category, sample_fn: F) -> FnSource<F>
where
    F: FnMut() -> Result<TelemetrySnapshot, SourceError> + Send + 'static,
{
    FnSource {
        category,
        sample_fn,
    }
}

impl<F> SensorSource for FnSource<F>
where
    F: FnMut() -> Result<TelemetrySnapshot, SourceError> + Send + 'static,
{
    fn category(&self) -> Category {
        self.category
    }

    fn sample(&mut self) -> Result<TelemetrySnapshot, SourceError> {
        (self.sample_fn)()
    }
}
