use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;
use url::Url;

use crate::{config::DetectorConfig, domain::Detection};

use super::{check_image, finalize, DetectionError, Detector};

pub const DEFAULT_ENDPOINT: &str = "https://serverless.roboflow.com";

/// Hosted object detection endpoint. The image travels as base64 in the
/// request body and detections come back as center/size boxes.
pub struct RemoteDetector {
    http: Client,
    url: Url,
    confidence_threshold: f32,
}

impl RemoteDetector {
    pub fn new(http: Client, config: &DetectorConfig) -> Result<Self> {
        let model_id = config
            .model_id
            .as_deref()
            .context("DETECTOR_MODEL_ID must be configured for the remote detector")?;

        let mut url = Url::parse(&format!(
            "{}/{}",
            config.endpoint.trim_end_matches('/'),
            model_id.trim_matches('/')
        ))
        .with_context(|| format!("invalid detector endpoint {}", config.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("detector endpoint must be http(s): {}", config.endpoint);
        }

        {
            let mut query = url.query_pairs_mut();
            if let Some(api_key) = &config.api_key {
                query.append_pair("api_key", api_key);
            }
            // The hosted API takes its threshold as a percentage.
            let percent = (config.confidence_threshold * 100.0).round() as u32;
            query.append_pair("confidence", &percent.to_string());
        }

        Ok(Self {
            http,
            url,
            confidence_threshold: config.confidence_threshold,
        })
    }
}

impl Detector for RemoteDetector {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn predict(&self, image: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        check_image(image)?;

        let response = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(STANDARD.encode(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(target: "detector", status = status.as_u16(), "inference endpoint rejected request");
            return Err(DetectionError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        finalize(parse_predictions(&body)?, self.confidence_threshold)
    }
}

pub fn parse_predictions(body: &str) -> Result<Vec<Detection>, DetectionError> {
    let response: PredictionResponse = serde_json::from_str(body)
        .map_err(|err| DetectionError::InvalidOutput(err.to_string()))?;
    Ok(response
        .predictions
        .into_iter()
        .map(Prediction::into_detection)
        .collect())
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

impl Prediction {
    fn into_detection(self) -> Detection {
        let (half_w, half_h) = (self.width / 2.0, self.height / 2.0);
        Detection::new(
            self.class,
            self.confidence,
            [
                self.x - half_w,
                self.y - half_h,
                self.x + half_w,
                self.y + half_h,
            ],
        )
    }
}
