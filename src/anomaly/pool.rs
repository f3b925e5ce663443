//! Bounded blocking pool for anomaly detection.
//!
//! Scoring is CPU bound (the isolation and density strategies walk the whole
//! training set), so async callers hand it to the blocking thread pool with
//! at most `size` detections in flight.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{EngineError, EngineResult};
use crate::types::DataPoint;
use super::{Anomaly, AnomalyDetectorService};

#[derive(Clone)]
pub struct ScoringPool {
    service: Arc<AnomalyDetectorService>,
    permits: Arc<Semaphore>,
}

impl ScoringPool {
    pub fn new(service: Arc<AnomalyDetectorService>, size: usize) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn service(&self) -> &Arc<AnomalyDetectorService> {
        &self.service
    }

    /// Available permits, for diagnostics
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn detect(&self, detector_id: &str, point: DataPoint) -> EngineResult<Option<Anomaly>> {
        let _permit = self.permits
            .acquire()
            .await
            .map_err(|_| EngineError::Worker("scoring pool closed".to_string()))?;

        let service = Arc::clone(&self.service);
        let detector_id = detector_id.to_string();
        tokio::task::spawn_blocking(move || service.detect_anomaly(&detector_id, point))
            .await
            .map_err(|e| EngineError::Worker(format!("scoring task failed: {}", e)))?
    }

    /// Detect over a batch; results keep the input order
    pub async fn detect_batch(
        &self,
        detector_id: &str,
        points: Vec<DataPoint>,
    ) -> Vec<EngineResult<Option<Anomaly>>> {
        let handles: Vec<_> = points
            .into_iter()
            .map(|point| {
                let pool = self.clone();
                let detector_id = detector_id.to_string();
                tokio::spawn(async move { pool.detect(&detector_id, point).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(r) => r,
                Err(e) => Err(EngineError::Worker(e.to_string())),
            });
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::DetectionType;
    use crate::clock::ManualClock;
    use crate::config::AnomalyConfig;
    use chrono::{TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool() -> (ScoringPool, String, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 8, 12, 6, 0, 0).unwrap());
        let svc = AnomalyDetectorService::with_rng(
            &AnomalyConfig::default(),
            Arc::new(clock.clone()),
            StdRng::seed_from_u64(3),
        );
        let id = svc.create_detector("beds", "shelter-7", DetectionType::Statistical, None).unwrap();
        let training = [20.0, 21.0, 19.0, 20.5, 19.5, 20.0]
            .iter()
            .map(|v| DataPoint::new(*v, clock.now()))
            .collect();
        svc.train_model(&id, training, Default::default()).unwrap();
        (ScoringPool::new(Arc::new(svc), 2), id, clock)
    }

    #[tokio::test]
    async fn detects_on_blocking_pool() {
        let (pool, id, clock) = pool();
        let anomaly = pool.detect(&id, DataPoint::new(80.0, clock.now())).await.unwrap();
        assert!(anomaly.is_some());
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_errors() {
        let (pool, id, clock) = pool();
        let points = vec![
            DataPoint::new(80.0, clock.now()),
            DataPoint::new(20.0, clock.now()),
            DataPoint::new(-40.0, clock.now()),
        ];
        let results = pool.detect_batch(&id, points).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].as_ref().unwrap().is_some());
        assert!(results[1].as_ref().unwrap().is_none());
        assert!(results[2].as_ref().unwrap().is_some());

        let missing = pool.detect("nope", DataPoint::new(1.0, clock.now())).await;
        assert!(missing.unwrap_err().is_not_found());
    }
}
