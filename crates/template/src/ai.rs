//! AI opener generation
//!
//! One-line personalized openers via the Gemini `generateContent` endpoint.
//! The call is strictly best-effort: callers fall back to a static opener on
//! any failure, so errors here never fail a send on their own.

use std::time::Duration;

use async_trait::async_trait;
use outreach_core::PipelineError;
use outreach_core::models::Lead;
use serde_json::{Value, json};

/// Generates a short opener line for a lead.
#[async_trait]
pub trait OpenerGenerator: Send + Sync {
    async fn generate(&self, lead: &Lead) -> Result<String, PipelineError>;
}

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GeminiOpener {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl GeminiOpener {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        )
    }

    fn prompt(lead: &Lead) -> String {
        let mut facts = Vec::new();
        if let Some(name) = &lead.first_name {
            facts.push(format!("first name: {name}"));
        }
        if let Some(title) = &lead.job_title {
            facts.push(format!("job title: {title}"));
        }
        if let Some(company) = &lead.company_name {
            facts.push(format!("company: {company}"));
        }
        if let Some(industry) = &lead.industry {
            facts.push(format!("industry: {industry}"));
        }

        format!(
            "Write one short, friendly opening line for a cold outreach email. \
             No greeting, no placeholders, at most 20 words. Prospect: {}.",
            if facts.is_empty() {
                "unknown".to_string()
            } else {
                facts.join(", ")
            }
        )
    }

    fn extract_text(response: &Value) -> Option<String> {
        response["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }
}

#[async_trait]
impl OpenerGenerator for GeminiOpener {
    async fn generate(&self, lead: &Lead) -> Result<String, PipelineError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": Self::prompt(lead) }] }]
        });

        let request = self.client.post(self.endpoint()).json(&body).send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| PipelineError::Timeout(self.timeout))?
            .map_err(|e| PipelineError::Provider(format!("opener request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::Provider(format!(
                "opener request returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::Provider(format!("opener response unreadable: {e}")))?;

        Self::extract_text(&payload).ok_or_else(|| {
            PipelineError::Provider("opener response contained no text".to_string())
        })
    }
}
