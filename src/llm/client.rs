use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::prompts::{SYSTEM_PROMPT, build_resolution_prompt};
use super::resolver::{ResolutionRequest, SpeakerNameResolver};
use crate::adapters::{CallFailure, RetryPolicy, with_retries};
use crate::config::{AnalysisConfig, DEFAULT_RESOLVER_MODEL};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{ResolverMetadata, SpeakerProposal, SpeakerResolution};

const TOOL_NAME: &str = "submit_speaker_mappings";

/// Configuration for the Anthropic API client
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// API key (from ANTHROPIC_API_KEY env var)
    pub api_key: String,
    /// Fallback model when a request names none
    pub model: String,
    /// Temperature (0-1, lower = more deterministic)
    pub temperature: f64,
    /// Maximum tokens in response
    pub max_tokens: u32,
    pub base_url: String,
    pub retry: RetryPolicy,
}

impl AnthropicConfig {
    /// Create config from environment variables
    pub fn from_env() -> PipelineResult<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            PipelineError::Configuration(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;
        Ok(Self::new(api_key, DEFAULT_RESOLVER_MODEL.to_string()))
    }

    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            temperature: 0.2,
            max_tokens: 2048,
            base_url: "https://api.anthropic.com/v1".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Anthropic API client resolving speaker names through a forced tool call
pub struct AnthropicClient {
    client: Client,
    config: AnthropicConfig,
    analysis: AnalysisConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig, analysis: AnalysisConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            analysis,
        }
    }

    fn tool() -> Tool {
        Tool {
            name: TOOL_NAME.to_string(),
            description: "Submit the name identified for each speaker label".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "speaker_mappings": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": {
                                    "type": "string",
                                    "description": "Speaker label exactly as it appears in the transcript"
                                },
                                "name": {
                                    "type": "string",
                                    "description": "Person's name, a role, or \"Unknown\""
                                },
                                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                                "reasoning": {"type": "string"},
                                "alternatives": {
                                    "type": "array",
                                    "items": {"type": "string"},
                                    "description": "Other names considered for this label"
                                }
                            },
                            "required": ["label", "name"]
                        }
                    },
                    "analysis": {
                        "type": "string",
                        "description": "One or two sentences on the meeting and who is who"
                    }
                },
                "required": ["speaker_mappings"]
            }),
        }
    }

    async fn send(&self, request: &AnthropicToolRequest) -> Result<AnthropicResponse, CallFailure> {
        let response = self
            .client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| CallFailure::retryable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CallFailure::from_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| CallFailure::fatal(format!("failed to parse response: {}", e)))
    }
}

#[async_trait]
impl SpeakerNameResolver for AnthropicClient {
    async fn resolve(&self, request: &ResolutionRequest) -> PipelineResult<SpeakerResolution> {
        let model = if request.model.is_empty() {
            self.config.model.clone()
        } else {
            request.model.clone()
        };

        let body = AnthropicToolRequest {
            model: model.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: build_resolution_prompt(request, &self.analysis),
            }],
            tools: vec![Self::tool()],
            tool_choice: Some(ToolChoice {
                choice_type: "tool".to_string(),
                name: TOOL_NAME.to_string(),
            }),
        };

        info!(
            "Resolving {} speaker label(s) with {} ({:?} transcript)",
            request.labels.len(),
            model,
            request.scope
        );
        let response = with_retries("speaker resolution", &self.config.retry, || self.send(&body))
            .await
            .map_err(|f| PipelineError::ResolverUnavailable(f.message))?;

        let submission = response.submission().ok_or_else(|| {
            PipelineError::ResolverUnavailable(format!("no {} tool call in response", TOOL_NAME))
        })??;
        debug!(
            "Resolver proposed {} mapping(s) ({} in / {} out tokens)",
            submission.speaker_mappings.len(),
            response.usage.input_tokens,
            response.usage.output_tokens
        );

        Ok(submission.into_resolution(model, &response.usage))
    }
}

#[derive(Debug, Serialize)]
struct AnthropicToolRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    choice_type: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

/// Token usage reported per call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<serde_json::Value>,
}

impl AnthropicResponse {
    /// The forced tool call's input, if present
    fn submission(&self) -> Option<PipelineResult<MappingSubmission>> {
        self.content
            .iter()
            .find(|c| c.content_type == "tool_use" && c.name.as_deref() == Some(TOOL_NAME))
            .and_then(|c| c.input.clone())
            .map(|input| {
                serde_json::from_value(input).map_err(|e| {
                    PipelineError::ResolverUnavailable(format!("malformed tool input: {}", e))
                })
            })
    }
}

#[derive(Debug, Deserialize)]
struct MappingSubmission {
    #[serde(default)]
    speaker_mappings: Vec<SpeakerProposal>,
    #[serde(default)]
    analysis: Option<String>,
}

impl MappingSubmission {
    fn into_resolution(self, model: String, usage: &Usage) -> SpeakerResolution {
        let mut metadata = ResolverMetadata {
            model,
            calls: 1,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            summary: self.analysis,
            ..Default::default()
        };
        for proposal in &self.speaker_mappings {
            if let Some(confidence) = proposal.confidence {
                metadata.confidence.insert(proposal.label.clone(), confidence);
            }
            if let Some(reasoning) = &proposal.reasoning {
                metadata
                    .reasoning
                    .insert(proposal.label.clone(), reasoning.clone());
            }
        }

        SpeakerResolution {
            proposals: self.speaker_mappings,
            metadata,
        }
    }
}
