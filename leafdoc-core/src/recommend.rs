use anyhow::Context;
use async_trait::async_trait;
use leafdoc_types::Recommendation;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Produces treatment advice for a diagnosed crop disease.
#[async_trait]
pub trait Recommender: Send + Sync {
    async fn recommend(&self, crop: &str, disease: &str) -> anyhow::Result<Recommendation>;
}

/// Healthy leaves need no advice.
pub fn needs_recommendation(disease: &str) -> bool {
    !disease.to_lowercase().contains("healthy")
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct GeminiRecommender {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[bon::bon]
impl GeminiRecommender {
    /// `base_url` is the models collection, `GEMINI_ENDPOINT` unless overridden.
    #[builder]
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        client: Option<reqwest::Client>,
    ) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_owned()),
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| GEMINI_ENDPOINT.to_owned()),
            client: client.unwrap_or_default(),
        }
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.base_url, self.model)
    }
}

impl std::fmt::Debug for GeminiRecommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiRecommender")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn prompt(crop: &str, disease: &str) -> String {
    format!(
        "A leaf of the crop \"{crop}\" was diagnosed with \"{disease}\". \
         Reply with a single JSON object with exactly these string fields: \
         \"severity\" (how serious the disease is for the crop), \
         \"treatment\" (what the farmer should do now), \
         \"prevention\" (how to avoid it next season). \
         Keep every field under 80 words."
    )
}

/// Pulls the JSON object out of a model reply, with or without Markdown fences.
fn parse_reply(text: &str) -> anyhow::Result<Recommendation> {
    let text = text.trim();
    let body = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(text)
        .trim();
    serde_json::from_str(body).context("Gemini reply is not a recommendation object")
}

#[async_trait]
impl Recommender for GeminiRecommender {
    async fn recommend(&self, crop: &str, disease: &str) -> anyhow::Result<Recommendation> {
        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt(crop, disease),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        tracing::debug!(model = %self.model, crop, disease, "requesting recommendation");
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API returned {status}: {body}");
        }

        let response: GeminiResponse = response
            .json()
            .await
            .context("Failed to decode Gemini response")?;
        let text = response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .context("Gemini response has no candidates")?;
        parse_reply(&text)
    }
}
