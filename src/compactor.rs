use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a season's WAL once enough appends have
/// piled up since the last compaction, and drops notification channels
/// nobody listens to anymore.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        engine.notify.prune();
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when the append count reaches `threshold`. Returns whether it ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, crate::engine::EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!("compaction skipped: {appends}/{threshold} appends");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::wal::Wal;
    use std::path::PathBuf;
    use ulid::Ulid;

    const T0: Ms = 1_700_000_000_000;
    const HOUR: Ms = 3_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tentshift_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn below_threshold_does_nothing() {
        let path = test_wal_path("below.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        let session = Session::authenticated(Ulid::new());
        engine
            .create_tent(&session, Ulid::new(), "Tent", TentType::Black)
            .await
            .unwrap();

        assert!(!compact_if_due(&engine, 100).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 1);
    }

    #[tokio::test]
    async fn repainting_compacts_to_live_intervals() {
        let path = test_wal_path("repaint.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        let session = Session::authenticated(Ulid::new());
        engine
            .create_tent(&session, Ulid::new(), "Tent", TentType::Blue)
            .await
            .unwrap();
        for status in [
            AvailabilityStatus::Available,
            AvailabilityStatus::Maybe,
            AvailabilityStatus::Unavailable,
            AvailabilityStatus::Available,
        ] {
            engine
                .submit_availability(&session, T0, T0 + HOUR, status)
                .await
                .unwrap();
        }

        assert!(compact_if_due(&engine, 5).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // TentCreated + ProfileUpserted + the one surviving interval.
        let events = Wal::replay(&path).unwrap();
        assert_eq!(events.len(), 3);
        let intervals: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, Event::AvailabilitySubmitted { .. }))
            .collect();
        assert_eq!(intervals.len(), 1);
    }

    #[tokio::test]
    async fn prune_runs_on_engine_hub() {
        let path = test_wal_path("prune.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        drop(engine.notify.subscribe(Ulid::new()));
        assert_eq!(engine.notify.channel_count(), 1);
        engine.notify.prune();
        assert_eq!(engine.notify.channel_count(), 0);
    }
}
