use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::reaper;

/// Manages per-practice engines. Each practice gets its own Engine + WAL +
/// reaper + compactor. Practice = the name a connection attaches to.
pub struct PracticeRegistry {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    hold_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl PracticeRegistry {
    pub fn new(
        data_dir: PathBuf,
        compact_threshold: u64,
        hold_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            hold_ttl,
            clock,
        }
    }

    /// Get or lazily create an engine for the given practice.
    pub fn get_or_create(&self, practice: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(practice) {
            return Ok(engine.value().clone());
        }
        if practice.len() > MAX_PRACTICE_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "practice name too long",
            ));
        }
        if self.engines.len() >= MAX_PRACTICES {
            return Err(std::io::Error::other("too many practices"));
        }

        // Sanitize practice name to prevent path traversal
        let safe_name: String = practice
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty practice name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(
            wal_path,
            notify,
            self.clock.clone(),
            self.hold_ttl,
        )?);

        // Spawn reaper + compactor for this practice
        let reaper_engine = engine.clone();
        tokio::spawn(async move {
            reaper::run_reaper(reaper_engine).await;
        });
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            reaper::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(practice.to_string(), engine.clone());
        metrics::gauge!(crate::observability::PRACTICES_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}
