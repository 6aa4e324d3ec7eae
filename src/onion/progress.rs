//! Creation progress reporting
//!
//! Observers are a side channel: their failures are logged and otherwise
//! ignored.

use std::fmt;
use std::sync::Arc;
use tracing::warn;

type Callback = dyn Fn(f64, &str, &str) -> anyhow::Result<()> + Send + Sync;

/// Caller-supplied progress callback: `(percent, tag, message)`
#[derive(Clone)]
pub struct ProgressObserver(Arc<Callback>);

impl ProgressObserver {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(f64, &str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }
}

impl fmt::Debug for ProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressObserver")
    }
}

/// Percentage reported once the service exists locally
pub(crate) const CREATED_PERCENT: f64 = 20.0;
/// Share of the bar covered by descriptor uploads
const UPLOAD_SPAN: f64 = 70.0;

/// Clamps reports to a non-decreasing percentage in `[0, 100]`
#[derive(Debug)]
pub(crate) struct Progress {
    observer: Option<ProgressObserver>,
    last: f64,
}

impl Progress {
    pub(crate) fn new(observer: Option<ProgressObserver>) -> Self {
        Self {
            observer,
            last: 0.0,
        }
    }

    pub(crate) fn current(&self) -> f64 {
        self.last
    }

    /// Percentage for `done` finished uploads out of `known`
    pub(crate) fn upload_percent(done: usize, known: usize) -> f64 {
        if known == 0 {
            return CREATED_PERCENT;
        }
        CREATED_PERCENT + UPLOAD_SPAN * (done as f64 / known as f64)
    }

    pub(crate) fn report(&mut self, percent: f64, tag: &str, message: &str) {
        let percent = percent.clamp(0.0, 100.0).max(self.last);
        self.last = percent;

        if let Some(observer) = &self.observer {
            if let Err(e) = (observer.0)(percent, tag, message) {
                warn!(tag = %tag, "Progress observer failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_monotonic_and_clamped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = ProgressObserver::new(move |pct, tag, _msg| {
            sink.lock().unwrap().push((pct, tag.to_string()));
            Ok(())
        });

        let mut progress = Progress::new(Some(observer));
        progress.report(50.0, "a", "");
        progress.report(10.0, "b", "");
        progress.report(150.0, "c", "");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (50.0, "a".to_string()));
        assert_eq!(seen[1], (50.0, "b".to_string()));
        assert_eq!(seen[2], (100.0, "c".to_string()));
    }

    #[test]
    fn test_observer_error_swallowed() {
        let observer = ProgressObserver::new(|_, _, _| anyhow::bail!("observer exploded"));
        let mut progress = Progress::new(Some(observer));
        progress.report(30.0, "x", "y");
        assert_eq!(progress.current(), 30.0);
    }

    #[test]
    fn test_upload_percent() {
        assert_eq!(Progress::upload_percent(0, 0), CREATED_PERCENT);
        assert_eq!(Progress::upload_percent(2, 2), 90.0);
    }
}
