use std::time::Duration;

use crate::source::ScopeFilter;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_PROGRESS_EVERY: u64 = 100;

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub dry_run: bool,
    pub scope: ScopeFilter,
    /// Records processed between throttling pauses.
    pub chunk_size: usize,
    /// Pause between chunks; zero disables throttling.
    pub chunk_pause: Duration,
    /// Emit a progress line every this many records per collection.
    pub progress_every: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            scope: ScopeFilter::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_pause: Duration::ZERO,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl MigrationConfig {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn project(mut self, project: Option<String>) -> Self {
        self.scope = ScopeFilter::new(project);
        self
    }

    pub fn chunking(mut self, chunk_size: usize, pause_ms: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_pause = Duration::from_millis(pause_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_normalizes_inputs() {
        let cfg = MigrationConfig::default()
            .dry_run(true)
            .project(Some("  ".into()))
            .chunking(0, 250);
        assert!(cfg.dry_run);
        assert_eq!(cfg.scope.project(), None);
        assert_eq!(cfg.chunk_size, 1);
        assert_eq!(cfg.chunk_pause, Duration::from_millis(250));
    }
}
