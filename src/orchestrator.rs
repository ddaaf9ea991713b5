use std::{sync::Arc, time::Duration};

use tokio::time::timeout;

use crate::{
    cache::ResultCache,
    classifier::Classifier,
    detector::{DetectionError, Detector},
    domain::{ClassificationResult, ImageInput},
};

/// Runs one classification request: cache lookup, inference on a miss,
/// classification, best-effort cache write.
pub struct Orchestrator<D> {
    detector: Arc<D>,
    classifier: Arc<Classifier>,
    cache: Arc<ResultCache>,
    detect_timeout: Duration,
}

impl<D: Detector> Orchestrator<D> {
    pub fn new(
        detector: Arc<D>,
        classifier: Arc<Classifier>,
        cache: Arc<ResultCache>,
        detect_timeout: Duration,
    ) -> Self {
        Self {
            detector,
            classifier,
            cache,
            detect_timeout,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Only a detector failure is an error. Empty or unmapped detections come
    /// back as an unsuccessful result.
    pub async fn handle(&self, input: &ImageInput) -> Result<ClassificationResult, DetectionError> {
        let key = self.cache.key(input);
        if let Some(cached) = self.cache.get(&key).await {
            tracing::info!(
                target: "orchestrator",
                key = key.short(),
                issue_type = ?cached.issue_type,
                "returning cached classification"
            );
            return Ok(cached);
        }

        let detections = {
            let image = input.decode()?;
            timeout(self.detect_timeout, self.detector.predict(&image))
                .await
                .map_err(|_| DetectionError::Timeout(self.detect_timeout))??
        };
        tracing::info!(
            target: "orchestrator",
            detector = self.detector.name(),
            detections = detections.len(),
            "inference finished"
        );

        let result = self.classifier.classify(detections);
        tracing::info!(
            target: "orchestrator",
            key = key.short(),
            success = result.success,
            issue_type = ?result.issue_type,
            confidence = result.confidence,
            "classified image"
        );

        self.cache.set(&key, &result, self.cache.ttl()).await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;
    use crate::{
        classifier::LabelMapping,
        config::{CacheBackendKind, CacheConfig},
        domain::{Detection, IssueType},
    };

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 7, 7, 7];

    enum Script {
        Detections(Vec<Detection>),
        Slow(Vec<Detection>, Duration),
        Fail,
        Hang,
    }

    struct ScriptedDetector {
        script: Script,
        calls: AtomicUsize,
        seen: parking_lot::Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedDetector {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                seen: parking_lot::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Detector for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn predict(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(image.to_vec());
            match &self.script {
                Script::Detections(detections) => Ok(detections.clone()),
                Script::Slow(detections, delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(detections.clone())
                }
                Script::Fail => Err(DetectionError::InvalidOutput("model crashed".into())),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    async fn orchestrator(
        detector: Arc<ScriptedDetector>,
        backend: CacheBackendKind,
    ) -> Orchestrator<ScriptedDetector> {
        let cache = ResultCache::connect(&CacheConfig {
            backend,
            redis_url: "redis://127.0.0.1:1/0".into(),
            ttl: Duration::from_secs(3600),
            op_timeout: Duration::from_millis(500),
            namespace: "classification".into(),
            clear_on_start: false,
        })
        .await;
        Orchestrator::new(
            detector,
            Arc::new(Classifier::new(LabelMapping::builtin())),
            Arc::new(cache),
            Duration::from_secs(5),
        )
    }

    fn pothole_scene() -> Script {
        Script::Detections(vec![
            Detection::new("unknown_thing", 0.9, [0.0, 0.0, 5.0, 5.0]),
            Detection::new("pothole", 0.6, [1.0, 1.0, 9.0, 9.0]),
        ])
    }

    #[tokio::test]
    async fn identical_images_run_inference_once() {
        let detector = ScriptedDetector::new(pothole_scene());
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;
        let input = ImageInput::Bytes(PNG.to_vec());

        let first = orchestrator.handle(&input).await.unwrap();
        let second = orchestrator.handle(&input).await.unwrap();

        assert_eq!(detector.calls(), 1);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(first.issue_type, Some(IssueType::Pothole));
        assert_eq!(first.confidence, 0.6);
    }

    #[tokio::test]
    async fn different_images_are_classified_separately() {
        let detector = ScriptedDetector::new(pothole_scene());
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;

        let mut other = PNG.to_vec();
        other.push(0);
        orchestrator.handle(&ImageInput::Bytes(PNG.to_vec())).await.unwrap();
        orchestrator.handle(&ImageInput::Bytes(other)).await.unwrap();

        assert_eq!(detector.calls(), 2);
    }

    #[tokio::test]
    async fn without_cache_every_request_runs_inference() {
        let detector = ScriptedDetector::new(pothole_scene());
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Redis).await;
        assert!(!orchestrator.cache().is_enabled());
        let input = ImageInput::Bytes(PNG.to_vec());

        let first = orchestrator.handle(&input).await.unwrap();
        let second = orchestrator.handle(&input).await.unwrap();

        assert_eq!(detector.calls(), 2);
        assert_eq!(first, second);
        assert!(first.success);
    }

    #[tokio::test]
    async fn base64_input_reaches_detector_decoded() {
        let detector = ScriptedDetector::new(pothole_scene());
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;
        let input = ImageInput::Base64(STANDARD.encode(PNG));

        orchestrator.handle(&input).await.unwrap();
        orchestrator.handle(&input).await.unwrap();

        assert_eq!(detector.calls(), 1);
        assert_eq!(detector.seen.lock().as_slice(), &[PNG.to_vec()]);
    }

    #[tokio::test]
    async fn undecodable_base64_fails_without_inference() {
        let detector = ScriptedDetector::new(pothole_scene());
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;

        let err = orchestrator
            .handle(&ImageInput::Base64("%%%".into()))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::InvalidEncoding(_)));
        assert_eq!(detector.calls(), 0);
    }

    #[tokio::test]
    async fn detector_failure_propagates_and_is_not_cached() {
        let detector = ScriptedDetector::new(Script::Fail);
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;
        let input = ImageInput::Bytes(PNG.to_vec());

        assert!(orchestrator.handle(&input).await.is_err());
        assert!(orchestrator.handle(&input).await.is_err());

        assert_eq!(detector.calls(), 2);
        assert_eq!(orchestrator.cache().stats().await.total_keys, 0);
    }

    #[tokio::test]
    async fn empty_and_unmapped_results_are_data_not_errors() {
        let detector = ScriptedDetector::new(Script::Detections(vec![Detection::new(
            "bicycle",
            0.8,
            [0.0; 4],
        )]));
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;

        let result = orchestrator
            .handle(&ImageInput::Bytes(PNG.to_vec()))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.raw_class.as_deref(), Some("bicycle"));
        assert_eq!(orchestrator.cache().stats().await.total_keys, 1);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_orchestrator() {
        let detector = ScriptedDetector::new(Script::Slow(
            vec![Detection::new("garbage", 0.7, [0.0; 4])],
            Duration::from_millis(20),
        ));
        let orchestrator = Arc::new(orchestrator(detector.clone(), CacheBackendKind::Memory).await);

        let mut other = PNG.to_vec();
        other.push(1);
        let inputs: Vec<_> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    ImageInput::Bytes(PNG.to_vec())
                } else {
                    ImageInput::Bytes(other.clone())
                }
            })
            .collect();

        let results = futures::future::join_all(inputs.iter().map(|input| {
            let orchestrator = orchestrator.clone();
            async move { orchestrator.handle(input).await }
        }))
        .await;

        let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert!(results.iter().all(|r| r.issue_type == Some(IssueType::Garbage)));
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert!((2..=8).contains(&detector.calls()));

        let settled = detector.calls();
        orchestrator.handle(&inputs[0]).await.unwrap();
        orchestrator.handle(&inputs[1]).await.unwrap();
        assert_eq!(detector.calls(), settled);
        assert_eq!(orchestrator.cache().stats().await.total_keys, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_detector_times_out() {
        let detector = ScriptedDetector::new(Script::Hang);
        let orchestrator = orchestrator(detector.clone(), CacheBackendKind::Memory).await;

        let err = orchestrator
            .handle(&ImageInput::Bytes(PNG.to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, DetectionError::Timeout(_)));
    }
}
