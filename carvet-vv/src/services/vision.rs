//! Vision API client
//!
//! Calls an OpenAI-compatible chat-completions endpoint with the inspector
//! prompt and the listing photos, and parses the structured JSON report out
//! of the reply. The hosted model is opaque; everything around the call
//! (encoding, rate limiting, validation) lives here.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::detection::VisionReport;
use crate::models::vehicle::ListingClaim;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
/// Images per call are capped to bound API cost per attempt
pub const MAX_IMAGES_PER_CALL: usize = 5;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const MIN_REQUEST_INTERVAL_MS: u64 = 1000;
const MAX_TOKENS: u32 = 1500;
const TEMPERATURE: f64 = 0.2;

/// Vision client errors
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Vision API error {0}: {1}")]
    Api(u16, String),

    /// Reply received but not parseable as the expected JSON report.
    /// The raw reply is carried so it can be persisted for diagnosis.
    #[error("Failed to parse vision reply: {reason}")]
    Parse { reason: String, raw: String },

    #[error("Image error: {0}")]
    Image(String),
}

impl VisionError {
    /// Raw reply to retain on the attempt record, when one was received
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            VisionError::Parse { raw, .. } => Some(raw.as_str()),
            _ => None,
        }
    }
}

/// Resolved vision endpoint configuration
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

/// Parsed vision reply plus the raw text it came from
#[derive(Debug, Clone)]
pub struct VisionAnalysis {
    pub report: VisionReport,
    pub raw: String,
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Vision API client
pub struct VisionClient {
    http_client: reqwest::Client,
    config: VisionConfig,
    rate_limiter: Arc<RateLimiter>,
}

impl VisionClient {
    pub fn new(config: VisionConfig) -> Result<Self, VisionError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| VisionError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
            rate_limiter: Arc::new(RateLimiter::new(MIN_REQUEST_INTERVAL_MS)),
        })
    }

    /// Model name this client is configured for
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Submit the prompt and images, returning the parsed report
    pub async fn analyze(
        &self,
        prompt: &str,
        image_data_urls: &[String],
    ) -> Result<VisionAnalysis, VisionError> {
        self.rate_limiter.wait().await;

        let mut content = vec![json!({"type": "text", "text": prompt})];
        for url in image_data_urls {
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": url, "detail": "high"}
            }));
        }

        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        tracing::debug!(model = %self.config.model, images = image_data_urls.len(), "Calling vision API");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VisionError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(VisionError::Api(status.as_u16(), error_text));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisionError::Network(e.to_string()))?;

        let raw = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| VisionError::Parse {
                reason: "Reply has no message content".to_string(),
                raw: payload.to_string(),
            })?
            .to_string();

        let report = VisionReport::parse(&raw).map_err(|e| VisionError::Parse {
            reason: e.to_string(),
            raw: raw.clone(),
        })?;

        Ok(VisionAnalysis { report, raw })
    }
}

/// Encode an image file as a base64 data URL for the vision API
pub fn encode_image_file(path: &Path) -> Result<String, VisionError> {
    let bytes = std::fs::read(path)
        .map_err(|e| VisionError::Image(format!("{}: {}", path.display(), e)))?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)))
}

/// Build the inspector prompt for a listing claim
///
/// The reply schema named here is what `VisionReport` parses; keep the two
/// in sync when adding fields.
pub fn build_verification_prompt(claim: &ListingClaim) -> String {
    let unspecified = "Not specified".to_string();
    let plate_line = match &claim.plate_number {
        Some(plate) => format!("- Plate Number: {}\n", plate),
        None => String::new(),
    };
    let plate_task = if claim.plate_number.is_some() {
        "5. Read the registration plate if visible and rate how well it matches the declared plate (0-100)\n"
    } else {
        ""
    };

    format!(
        r#"You are an expert vehicle inspector. Analyze the provided vehicle images and verify the listing details.

**User-Provided Vehicle Information:**
- Manufacturer/Brand: {brand}
- Model: {model}
- Vehicle Type: {vehicle_type}
- Fuel Type: {fuel_type}
- Year: {year}
{plate_line}
**Your Task:**
1. Verify the images show an actual vehicle (not random objects, memes, or inappropriate content)
2. Identify the vehicle's brand, model, type (car/van/suv/truck/motorcycle/etc) and likely fuel type (petrol/diesel/electric/hybrid)
3. Compare your findings with the user-provided information
4. Rate the match accuracy for each field (0-100; omit a score you cannot assess)
{plate_task}{final_step}. Assess image quality and note any discrepancies or concerns

**Response Format (JSON):**
{{
    "is_vehicle_image": true,
    "detected_information": {{
        "brand": "detected brand name",
        "model": "detected model name or closest match",
        "vehicle_type": "car/van/suv/motorcycle/truck/etc",
        "fuel_type": "petrol/diesel/electric/hybrid/unknown",
        "year_range": "approximate year or range",
        "plate_number": "plate read from images, or null"
    }},
    "match_scores": {{
        "brand_match": 0,
        "model_match": 0,
        "vehicle_type_match": 0,
        "fuel_type_match": 0,
        "plate_number_match": null
    }},
    "image_quality": {{
        "score": 0,
        "clear_images": true,
        "multiple_angles": true,
        "well_lit": true
    }},
    "verification_passed": true,
    "discrepancies": ["list any discrepancies found"],
    "suggestions": "Suggestions to improve the listing or resolve discrepancies",
    "requires_manual_review": false,
    "confidence_level": "high/medium/low"
}}

Provide ONLY valid JSON response, no additional text."#,
        brand = claim.manufacturer,
        model = claim.model,
        vehicle_type = claim.vehicle_type.as_ref().unwrap_or(&unspecified),
        fuel_type = claim.fuel_type.as_ref().unwrap_or(&unspecified),
        year = claim
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| unspecified.clone()),
        plate_line = plate_line,
        plate_task = plate_task,
        final_step = if claim.plate_number.is_some() { 6 } else { 5 },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claim(plate: Option<&str>) -> ListingClaim {
        ListingClaim {
            guid: Uuid::new_v4(),
            manufacturer: "Toyota".to_string(),
            model: "Corolla".to_string(),
            vehicle_type: Some("car".to_string()),
            fuel_type: None,
            year: Some(2019),
            plate_number: plate.map(|p| p.to_string()),
        }
    }

    #[test]
    fn prompt_includes_declared_fields() {
        let prompt = build_verification_prompt(&claim(None));
        assert!(prompt.contains("Toyota"));
        assert!(prompt.contains("Corolla"));
        assert!(prompt.contains("2019"));
        assert!(prompt.contains("Fuel Type: Not specified"));
        assert!(!prompt.contains("Plate Number:"));
    }

    #[test]
    fn prompt_adds_plate_task_when_declared() {
        let prompt = build_verification_prompt(&claim(Some("KA-1234")));
        assert!(prompt.contains("Plate Number: KA-1234"));
        assert!(prompt.contains("registration plate"));
    }

    #[test]
    fn encode_missing_image_is_an_error() {
        let result = encode_image_file(Path::new("/nonexistent/photo.jpg"));
        assert!(matches!(result, Err(VisionError::Image(_))));
    }

    #[test]
    fn encode_produces_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"\xff\xd8\xff\xe0fakejpeg").unwrap();
        let url = encode_image_file(&path).unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }
}
