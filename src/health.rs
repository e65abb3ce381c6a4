//! Engine health reporting for the service layer.

use crate::config::AudioConfig;
use crate::engine::{AudioEngine, EngineState};
use crate::state::AudioStats;
use serde::Serialize;
use uuid::Uuid;

/// Point-in-time view of one engine, ready to be returned as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `healthy`, `degraded` (running but dropping blocks) or `inactive`
    pub status: &'static str,
    pub engine_id: Uuid,
    pub state: EngineState,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_seconds: i64,
    pub audio: AudioConfig,
    pub pipeline_attached: bool,
    pub process_count: u64,
    pub stats: AudioStats,
}

impl HealthReport {
    pub fn collect(engine: &AudioEngine) -> Self {
        let stats = engine.get_stats();

        Self {
            status: status_label(engine.health_check(), &stats),
            engine_id: engine.id(),
            state: engine.state(),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: engine.uptime_seconds(),
            audio: engine.config().audio,
            pipeline_attached: engine.is_pipeline_attached(),
            process_count: engine.process_count(),
            stats,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn status_label(running: bool, stats: &AudioStats) -> &'static str {
    if !running {
        "inactive"
    } else if stats.dropped_frames > 0 {
        "degraded"
    } else {
        "healthy"
    }
}

impl AudioEngine {
    pub fn health_report(&self) -> HealthReport {
        HealthReport::collect(self)
    }
}
