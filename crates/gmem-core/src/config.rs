//! Runtime configuration
//!
//! All values have defaults. Override via environment variables (prefixed
//! `GMEM_`) or by constructing the structs directly.

use crate::types::BackendSegment;
use std::time::Duration;

/// Executor settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmaConfig {
    /// Backend segment backing segment id 0 on every unit
    pub local_pool_segment: BackendSegment,

    /// First backend segment id reserved for binding caller buffers
    pub bind_segment_base: BackendSegment,

    /// Number of bind segment ids, i.e. remote transfers that can be
    /// outstanding at once
    pub bind_segment_count: usize,
}

impl Default for RmaConfig {
    fn default() -> Self {
        Self {
            local_pool_segment: 1,
            bind_segment_base: 32,
            bind_segment_count: 16,
        }
    }
}

impl RmaConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `GMEM_LOCAL_POOL_SEGMENT`
    /// - `GMEM_BIND_SEGMENT_BASE`
    /// - `GMEM_BIND_SEGMENT_COUNT`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("GMEM_LOCAL_POOL_SEGMENT") {
            cfg.local_pool_segment = v;
        }
        if let Some(v) = env_parse("GMEM_BIND_SEGMENT_BASE") {
            cfg.bind_segment_base = v;
        }
        if let Some(v) = env_parse("GMEM_BIND_SEGMENT_COUNT") {
            cfg.bind_segment_count = v;
        }

        cfg
    }

    /// Backend segment ids available for binding, clipped to the id space
    pub fn bind_segments(&self) -> impl Iterator<Item = BackendSegment> {
        let base = self.bind_segment_base as usize;
        let end = (base + self.bind_segment_count).min(BackendSegment::MAX as usize + 1);
        (base..end).map(|s| s as BackendSegment)
    }
}

/// Settings of the shared-memory fabric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmConfig {
    /// Prefix of every region name; units of one job must agree on it
    pub job: String,

    /// Transfer queues per unit
    pub queue_num: usize,

    /// Operations a queue holds before it must be drained
    pub queue_depth: usize,

    /// How long a unit waits for the others in a barrier
    pub barrier_timeout: Duration,
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            job: "/gmem".to_string(),
            queue_num: 8,
            queue_depth: 1024,
            barrier_timeout: Duration::from_secs(30),
        }
    }
}

impl ShmConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `GMEM_JOB`
    /// - `GMEM_QUEUE_NUM`
    /// - `GMEM_QUEUE_DEPTH`
    /// - `GMEM_BARRIER_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("GMEM_JOB") {
            if !v.is_empty() {
                cfg.job = v;
            }
        }
        if let Some(n) = env_parse("GMEM_QUEUE_NUM") {
            cfg.queue_num = n;
        }
        if let Some(n) = env_parse("GMEM_QUEUE_DEPTH") {
            cfg.queue_depth = n;
        }
        if let Some(s) = env_parse("GMEM_BARRIER_TIMEOUT_SECS") {
            cfg.barrier_timeout = Duration::from_secs(s);
        }

        cfg
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RmaConfig::default();
        assert_eq!(cfg.local_pool_segment, 1);
        assert_eq!(cfg.bind_segments().count(), 16);
        assert_eq!(cfg.bind_segments().next(), Some(32));
    }

    #[test]
    fn test_bind_segments_clipped() {
        let cfg = RmaConfig {
            bind_segment_base: 250,
            bind_segment_count: 100,
            ..Default::default()
        };
        let ids: Vec<_> = cfg.bind_segments().collect();
        assert_eq!(ids, vec![250, 251, 252, 253, 254, 255]);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("GMEM_BIND_SEGMENT_COUNT", "4");
        std::env::set_var("GMEM_QUEUE_DEPTH", "not-a-number");
        let rma = RmaConfig::from_env();
        let shm = ShmConfig::from_env();
        std::env::remove_var("GMEM_BIND_SEGMENT_COUNT");
        std::env::remove_var("GMEM_QUEUE_DEPTH");

        assert_eq!(rma.bind_segment_count, 4);
        assert_eq!(shm.queue_depth, ShmConfig::default().queue_depth);
    }
}
