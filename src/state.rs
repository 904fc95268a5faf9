//! # Application State Management
//!
//! Shared state accessed by HTTP handlers and every WebSocket connection
//! actor. Uses the Arc<RwLock<T>> pattern throughout:
//!
//! - **Arc**: many handlers/actors hold a reference at once
//! - **RwLock**: many readers or one writer at a time
//!
//! Per-session mutable state (history, capture buffer, active turn) does
//! *not* live here: each connection actor owns its own `Session`
//! exclusively. `AppState` holds only what is genuinely cross-connection:
//! the runtime configuration, coarse service metrics, and the start time.

use crate::config::AppConfig;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers and connection actors.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Service metrics (updated by middleware and connection actors)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (Instant is Copy, so no lock needed)
    pub start_time: Instant,
}

/// Coarse service metrics.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start
    pub request_count: u64,

    /// Total errors since start
    pub error_count: u64,

    /// Currently open chat sessions (WebSocket connections)
    pub active_sessions: u32,

    /// Turns started across all sessions since start
    pub turns_started: u64,

    /// Turns cancelled by barge-in since start
    pub turns_cancelled: u64,

    /// Turns that failed on a provider error since start
    pub turns_failed: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so other threads aren't
    /// blocked; AppConfig is cheap to clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Claim a session slot if the concurrent-session limit allows it.
    ///
    /// Returns false (and leaves the counter untouched) when the service is
    /// already at `max_concurrent_sessions`; the caller refuses the
    /// connection. Check-and-increment happens under one write lock so two
    /// racing connections cannot both take the last slot.
    pub fn try_acquire_session(&self) -> bool {
        let max = self.get_config().performance.max_concurrent_sessions as u32;
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions >= max {
            return false;
        }
        metrics.active_sessions += 1;
        true
    }

    /// Release a session slot (called when a connection closes).
    pub fn release_session(&self) {
        let mut metrics = self.metrics.write().unwrap();
        // Underflow guard: u32 would panic on wrap
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn record_turn_started(&self) {
        self.metrics.write().unwrap().turns_started += 1;
    }

    pub fn record_turn_cancelled(&self) {
        self.metrics.write().unwrap().turns_cancelled += 1;
    }

    pub fn record_turn_failed(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.turns_failed += 1;
        metrics.error_count += 1;
    }

    /// Snapshot metrics for the /health and /metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    /// Server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_slot_limit() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 2;
        let state = AppState::new(config);

        assert!(state.try_acquire_session());
        assert!(state.try_acquire_session());
        assert!(!state.try_acquire_session());

        state.release_session();
        assert!(state.try_acquire_session());
    }

    #[test]
    fn test_release_never_underflows() {
        let state = AppState::new(AppConfig::default());
        state.release_session();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_turn_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_turn_started();
        state.record_turn_cancelled();
        state.record_turn_failed();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.turns_started, 1);
        assert_eq!(snapshot.turns_cancelled, 1);
        assert_eq!(snapshot.turns_failed, 1);
        assert_eq!(snapshot.error_count, 1);
    }
}
