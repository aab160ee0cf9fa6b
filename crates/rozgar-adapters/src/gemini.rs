use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::{AdapterError, ExplanationGenerator, GenerationRequest, HttpClientConfig, HttpFetcher};

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";

const UPSTREAM: &str = "gemini";

/// Narrative style for explanations of one month of MGNREGA statistics.
pub const SYSTEM_INSTRUCTION: &str = r#"You are Rozgar Darpan AI, a multilingual explainer of public employment statistics.

You receive a JSON object with a "language" field and a "data" object holding one month of MGNREGA statistics for a district.

Rules:
- Write the whole answer in the language named by "language" (for example hindi, bengali, english).
- Explain every key-value pair inside "data"; do not skip any field.
- Turn field names into plain real-world meanings, e.g. "Total_Exp" is the total expenditure for the period and "Number_of_Completed_Works" is how many works were completed.
- Order the explanation as: year, location and month first; then employment, wages, workers and projects; remarks last.
- Use complete, friendly sentences in short connected paragraphs, like a patient teacher, not a list dump.
- When a value is 0, "NA" or missing, say so naturally (for example that no data is available for it).
- If a field's exact meaning is unclear, explain it in general terms but still include it.
- Stay factually faithful to the numbers given."#;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub http: HttpClientConfig,
}

/// Explanation generator backed by the Gemini `generateContent` endpoint.
#[derive(Debug)]
pub struct GeminiGenerator {
    http: HttpFetcher,
    endpoint: String,
    api_key: String,
    temperature: f64,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, AdapterError> {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            http: HttpFetcher::new(UPSTREAM, config.http)?,
            endpoint,
            api_key: config.api_key,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, request: &GenerationRequest) -> Result<Value, AdapterError> {
        let payload = serde_json::to_string_pretty(request).map_err(|err| AdapterError::Malformed {
            upstream: UPSTREAM,
            message: err.to_string(),
        })?;
        Ok(json!({
            "contents": [{ "parts": [{ "text": payload }] }],
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "generationConfig": { "temperature": self.temperature },
        }))
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(body: &Value) -> Result<String, AdapterError> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(AdapterError::Upstream {
            upstream: UPSTREAM,
            message: format!("prompt blocked: {reason}"),
        });
    }

    let text = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AdapterError::Malformed {
            upstream: UPSTREAM,
            message: "response carried no text".to_string(),
        });
    }
    Ok(text)
}

#[async_trait]
impl ExplanationGenerator for GeminiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let body = self.request_body(request)?;
        let response = self
            .http
            .post_json(&self.endpoint, &[("x-goog-api-key", self.api_key.as_str())], &body)
            .await?;
        let text = candidate_text(&response)?;
        info!(language = %request.language, bytes = text.len(), "generated explanation");
        Ok(text)
    }
}
