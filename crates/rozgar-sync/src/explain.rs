use std::sync::Arc;

use rozgar_adapters::{ExplanationGenerator, GenerationRequest};
use rozgar_core::{canonical_language, ExplanationKey, NewExplanation};
use rozgar_storage::{ExplanationCache, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplainOutcome {
    pub response: String,
    /// `true` when the text was read back from the cache rather than generated by this call.
    pub cached: bool,
}

/// First non-blank of `names` in `data`, strings trimmed and numbers rendered.
fn data_text(data: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        let text = match data.get(*name)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    })
}

/// Generates each explanation at most once per key and serves it from the
/// cache afterwards.
pub struct ExplanationOrchestrator {
    cache: Arc<dyn ExplanationCache>,
    generator: Arc<dyn ExplanationGenerator>,
}

impl ExplanationOrchestrator {
    pub fn new(cache: Arc<dyn ExplanationCache>, generator: Arc<dyn ExplanationGenerator>) -> Self {
        Self { cache, generator }
    }

    pub async fn explain(&self, request: ExplainRequest) -> Result<ExplainOutcome, SyncError> {
        let language = canonical_language(request.language.as_deref());
        let data = request.data;

        let key = match (
            data_text(&data, &["region_code", "district_code"]),
            data_text(&data, &["fiscal_year", "fin_year"]),
            data_text(&data, &["month"]),
        ) {
            (Some(region_code), Some(fiscal_year), Some(month)) => ExplanationKey {
                region_code,
                fiscal_year,
                month,
                language: language.clone(),
            },
            _ => {
                return Err(SyncError::Validation(
                    "Missing required fields: district_code, fin_year and month are required"
                        .to_string(),
                ))
            }
        };

        if let Some(hit) = self.cache.find_by_key(&key).await? {
            info!(
                region_code = %key.region_code,
                month = %key.month,
                language = %key.language,
                "explanation cache hit"
            );
            return Ok(ExplainOutcome {
                response: hit.response().to_string(),
                cached: true,
            });
        }

        let generation = GenerationRequest {
            language,
            data: data.clone(),
        };
        let response = self.generator.generate(&generation).await.map_err(|err| {
            warn!(region_code = %key.region_code, error = %err, "explanation generation failed");
            SyncError::from(err)
        })?;
        if response.trim().is_empty() {
            return Err(SyncError::Upstream(
                "generator returned an empty explanation".to_string(),
            ));
        }

        let explanation = NewExplanation {
            key: key.clone(),
            state_code: data_text(&data, &["state_code"]).unwrap_or_default(),
            state_name: data_text(&data, &["state_name"]).unwrap_or_default(),
            region_name: data_text(&data, &["region_name", "district_name"]).unwrap_or_default(),
            response,
        };

        match self.cache.insert(explanation).await {
            Ok(stored) => {
                info!(
                    region_code = %key.region_code,
                    month = %key.month,
                    language = %key.language,
                    "stored new explanation"
                );
                Ok(ExplainOutcome {
                    response: stored.response().to_string(),
                    cached: false,
                })
            }
            Err(StoreError::DuplicateKey(_)) => {
                info!(
                    region_code = %key.region_code,
                    month = %key.month,
                    language = %key.language,
                    "lost explanation race; serving stored text"
                );
                let stored = self.cache.find_by_key(&key).await?.ok_or_else(|| {
                    SyncError::Internal(
                        "explanation missing after duplicate-key conflict".to_string(),
                    )
                })?;
                Ok(ExplainOutcome {
                    response: stored.response().to_string(),
                    cached: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}
