//! Classifier Client - Vision-Language Incident Judgment
//!
//! ## Responsibilities
//!
//! - Send a frame plus capture context to the scoring model
//! - Parse the structured judgment out of the model response
//! - Reject judgments outside declared bounds before they reach the workflow

use crate::error::{Error, Result};
use crate::models::{strip_model_fences, AnalysisResult};
use async_trait::async_trait;
use base64::Engine;
use serde_json::json;
use std::time::Duration;

/// Turns one frame into a structured judgment.
///
/// Implementations must either return a fully validated [`AnalysisResult`]
/// or fail with a classification error; a partial result never escapes.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        image_jpeg: &[u8],
        timestamp: &str,
        location: &str,
    ) -> Result<AnalysisResult>;
}

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini-backed classifier
pub struct GeminiClassifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_API_BASE.to_string())
    }

    /// Custom endpoint, used to point tests at a stub server
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    fn build_prompt(timestamp: &str, location: &str) -> String {
        format!(
            r#"You are a security monitoring AI assistant analyzing live surveillance footage.

**Context:**
- Timestamp: {timestamp}
- Location: {location}

**Your Task:**
Analyze this image for ANY security concerns, safety hazards, or incidents that require attention.

**Incidents to detect (but not limited to):**
- Fire/Smoke (any signs of flames, smoke, or burning)
- Fighting/Violence (physical altercations, aggressive behavior)
- Stampede/Crowd Crush (dangerous crowd density or movement)
- Medical Emergency (person collapsed, injured, distressed)
- Suspicious Activity (unattended packages, unusual behavior)
- Unauthorized Access (people in restricted areas)
- Vandalism/Property Damage
- Weapons/Dangerous Objects
- Slip/Trip/Fall Hazards
- Overcrowding (exceeding safe capacity)
- Missing/Lost Person (child alone, distressed individual)
- Natural Hazards (flooding, structural damage)

**Response Format:**
Provide your analysis in JSON format with these fields:

{{
  "is_problem": boolean,
  "incident_type": string (one of: "fire", "fight", "stampede", "medical_emergency", "suspicious_activity", "unauthorized_access", "vandalism", "weapon_detected", "hazard", "overcrowding", "lost_person", "natural_hazard", "normal", "other"),
  "severity": string (one of: "low", "medium", "high", "critical"),
  "confidence": float between 0.0 and 1.0,
  "description": string (2-3 sentences max),
  "recommended_action": string,
  "people_count": integer (0 if none visible),
  "additional_concerns": [list of strings]
}}

**Important Guidelines:**
- Be accurate but cautious: false alarms are better than missed incidents
- If image quality is poor, indicate lower confidence
- If nothing is wrong, mark is_problem as false and incident_type as "normal"
- Focus on actionable information for security personnel

Return ONLY valid JSON, no markdown formatting or extra text."#
        )
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(
        &self,
        image_jpeg: &[u8],
        timestamp: &str,
        location: &str,
    ) -> Result<AnalysisResult> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let image_b64 = base64::engine::general_purpose::STANDARD.encode(image_jpeg);
        let body = json!({
            "contents": [{
                "parts": [
                    {"text": Self::build_prompt(timestamp, location)},
                    {"inline_data": {"mime_type": "image/jpeg", "data": image_b64}}
                ]
            }],
            "generationConfig": {"temperature": 0.3}
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Classification(format!("classifier unreachable: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Classification(format!(
                "classifier returned {}: {}",
                status, text
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Classification(format!("bad classifier response body: {}", e)))?;

        let text = extract_response_text(&payload)?;
        parse_judgment(&text)
    }
}

/// Pull the generated text out of a generateContent response
fn extract_response_text(payload: &serde_json::Value) -> Result<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| Error::Classification("response has no candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.trim().is_empty() {
        return Err(Error::Classification("response text is empty".to_string()));
    }
    Ok(text)
}

/// Parse and bound-check the model's JSON judgment
fn parse_judgment(text: &str) -> Result<AnalysisResult> {
    let cleaned = strip_model_fences(text);
    let result: AnalysisResult = serde_json::from_str(cleaned).map_err(|e| {
        let head: String = cleaned.chars().take(200).collect();
        Error::Classification(format!("unparsable judgment: {} (got: {})", e, head))
    })?;
    result.validate()?;
    Ok(result)
}
