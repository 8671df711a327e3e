//! Progress tracking and callbacks for registration runs.
//!
//! The optimizer reports every iteration of every level to a
//! [`ProgressTracker`], which fans the information out to the registered
//! callbacks.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Progress information for one optimizer iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Pyramid level, 0 being the finest.
    pub level: usize,
    /// Iteration within the level.
    pub iteration: usize,
    /// Iteration budget of the level.
    pub total_iterations: Option<usize>,
    /// Best similarity score so far at this level.
    pub score: f64,
    /// Step length after the iteration.
    pub step_length: f64,
    /// Time elapsed since the run started.
    pub elapsed: Duration,
    /// Estimated time left in the level.
    pub estimated_remaining: Option<Duration>,
    /// Additional named values; the level loop reports its running
    /// `accepted` and `rejected` step counts and the `overlap` voxel count
    /// of the last evaluation.
    pub metrics: Vec<(String, f64)>,
}

impl ProgressInfo {
    pub fn new(
        level: usize,
        iteration: usize,
        total_iterations: Option<usize>,
        score: f64,
        step_length: f64,
        elapsed: Duration,
    ) -> Self {
        Self {
            level,
            iteration,
            total_iterations,
            score,
            step_length,
            elapsed,
            estimated_remaining: None,
            metrics: Vec::new(),
        }
    }

    /// Progress through the level in percent.
    pub fn progress_percent(&self) -> Option<f64> {
        self.total_iterations
            .map(|total| (self.iteration as f64 / total as f64) * 100.0)
    }

    /// Estimate the remaining time from the average time per iteration.
    pub fn calculate_remaining(&mut self) {
        if let Some(total) = self.total_iterations {
            if self.iteration > 0 {
                let per_iteration = self.elapsed.as_secs_f64() / self.iteration as f64;
                let remaining = total.saturating_sub(self.iteration);
                self.estimated_remaining = Some(Duration::from_secs_f64(per_iteration * remaining as f64));
            }
        }
    }

    pub fn add_metric(&mut self, name: impl Into<String>, value: f64) {
        self.metrics.push((name.into(), value));
    }

    /// Value of a named metric.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|(n, _)| n == name).map(|&(_, value)| value)
    }
}

/// Receives progress of a registration run.
pub trait ProgressCallback: Send + Sync {
    /// Called after every optimizer iteration.
    fn on_progress(&self, info: &ProgressInfo);

    /// Called when the run starts.
    fn on_start(&self) {}

    /// Called when a level starts, with the level's voxel grid.
    fn on_level_start(&self, _level: usize, _dims: [usize; 3]) {}

    /// Called when the run finishes successfully.
    fn on_complete(&self, _info: &ProgressInfo) {}

    /// Called when the run fails.
    fn on_error(&self, _error: &str) {}
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    /// Log every `log_interval` iterations.
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.total_iterations == Some(info.iteration) {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());

            tracing::info!(
                "Level {} iter {}/{} ({:.1}%) | Score: {:.6} | Step: {:.4} | Elapsed: {:.2}s | ETA: {}",
                info.level,
                info.iteration,
                info.total_iterations.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string()),
                info.progress_percent().unwrap_or(0.0),
                info.score,
                info.step_length,
                info.elapsed.as_secs_f64(),
                remaining
            );

            for (name, value) in &info.metrics {
                tracing::info!("  {}: {:.6}", name, value);
            }
        }
    }

    fn on_start(&self) {
        tracing::info!("Registration started");
    }

    fn on_level_start(&self, level: usize, dims: [usize; 3]) {
        tracing::info!("Level {} on a {:?} grid", level, dims);
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "Registration completed in {:.2}s with final score: {:.6}",
            info.elapsed.as_secs_f64(),
            info.score
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Registration failed: {}", error);
    }
}

/// Records every iteration.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the recorded history.
    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded iterations of one level.
    pub fn level_history(&self, level: usize) -> Vec<ProgressInfo> {
        self.history()
            .into_iter()
            .filter(|info| info.level == level)
            .collect()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }
}

/// Fans progress out to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Option<Instant>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    pub fn start_level(&self, level: usize, dims: [usize; 3]) {
        for callback in &self.callbacks {
            callback.on_level_start(level, dims);
        }
    }

    /// Report one iteration, with any extra named values.
    pub fn update(
        &self,
        level: usize,
        iteration: usize,
        total_iterations: Option<usize>,
        score: f64,
        step_length: f64,
        metrics: &[(&str, f64)],
    ) {
        let mut info = ProgressInfo::new(level, iteration, total_iterations, score, step_length, self.elapsed());
        info.calculate_remaining();
        for &(name, value) in metrics {
            info.add_metric(name, value);
        }

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    pub fn complete(&self, final_score: f64, step_length: f64) {
        let info = ProgressInfo::new(0, 0, None, final_score, step_length, self.elapsed());
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_info() {
        let info = ProgressInfo::new(1, 10, Some(100), -0.5, 1.0, Duration::from_secs(10));
        assert_eq!(info.level, 1);
        assert_eq!(info.score, -0.5);
        assert_eq!(info.progress_percent(), Some(10.0));
    }

    #[test]
    fn test_progress_info_remaining() {
        let mut info = ProgressInfo::new(0, 10, Some(100), 0.5, 1.0, Duration::from_secs(10));
        info.calculate_remaining();
        assert_eq!(info.estimated_remaining, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_history_callback() {
        let callback = HistoryCallback::new();
        callback.on_progress(&ProgressInfo::new(1, 1, Some(10), 0.5, 1.0, Duration::ZERO));
        callback.on_progress(&ProgressInfo::new(0, 1, Some(10), 0.6, 0.5, Duration::ZERO));

        let history = callback.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].level, 1);
        assert_eq!(callback.level_history(0).len(), 1);

        callback.clear();
        assert!(callback.history().is_empty());
    }

    #[test]
    fn test_progress_tracker_fans_out() {
        let history = Arc::new(HistoryCallback::new());
        let mut tracker = ProgressTracker::new();
        tracker.add_callback(history.clone());
        tracker.add_callback(Arc::new(ConsoleProgressCallback::default()));

        tracker.start();
        tracker.start_level(0, [4, 4, 4]);
        tracker.update(0, 1, Some(10), 0.5, 1.0, &[]);
        tracker.update(0, 2, Some(10), 0.7, 1.0, &[("accepted", 2.0)]);
        tracker.complete(0.7, 1.0);

        let recorded = history.history();
        let scores: Vec<f64> = recorded.iter().map(|i| i.score).collect();
        assert_eq!(scores, vec![0.5, 0.7]);
        assert_eq!(recorded[0].metric("accepted"), None);
        assert_eq!(recorded[1].metric("accepted"), Some(2.0));
        assert_eq!(recorded[1].metric("rejected"), None);
    }
}
