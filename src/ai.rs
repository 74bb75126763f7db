use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::errors::AppError;
use crate::prompts::{
    build_prompt, DiagnosisInput, DiagnosisOutput, ExplanationInput, ExplanationOutput,
    MarketForecastInput, MarketForecastOutput, PromptPart, PromptSchema, RecognitionInput,
    RecognitionOutput, RenderedPrompt, DIAGNOSIS_TEMPLATE, EXPLANATION_TEMPLATE,
    MARKET_FORECAST_TEMPLATE, RECOGNITION_TEMPLATE,
};

// ==============================================================================
// CAPABILITY BOUNDARY
// ==============================================================================

/// The external generative model, one method per prompt contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiCapability: Send + Sync {
    async fn diagnose(&self, input: DiagnosisInput) -> Result<DiagnosisOutput, AppError>;

    async fn explain(&self, input: ExplanationInput) -> Result<ExplanationOutput, AppError>;

    async fn recognize(&self, input: RecognitionInput) -> Result<RecognitionOutput, AppError>;

    async fn forecast_market(
        &self,
        input: MarketForecastInput,
    ) -> Result<MarketForecastOutput, AppError>;
}

/// Parses a model reply into the declared output record.
///
/// Tolerates a surrounding markdown code fence; anything that does not
/// deserialize into `O` is a capability failure.
pub fn parse_structured_output<O: DeserializeOwned + PromptSchema>(content: &str) -> Result<O, AppError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| {
        AppError::CapabilityUnavailable(format!("Malformed {} response: {}", O::NAME, e))
    })
}

// ==============================================================================
// OPENAI-COMPATIBLE IMPLEMENTATION
// ==============================================================================

const SYSTEM_PROMPT: &str = "You are an agricultural assistant for smallholder farmers. Always answer with the exact JSON object requested.";

pub struct OpenAiCapability {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCapability {
    pub fn new(settings: &Settings) -> Option<Self> {
        if !settings.openai.is_configured() {
            return None;
        }

        let mut config = OpenAIConfig::new().with_api_key(&settings.openai.api_key);
        if let Some(base) = &settings.openai.api_base {
            config = config.with_api_base(base);
        }
        let client = Client::with_config(config);

        Some(Self {
            client,
            model: settings.openai.model.clone(),
            max_tokens: settings.openai.max_tokens,
            temperature: settings.openai.temperature,
        })
    }

    fn user_content(prompt: &RenderedPrompt) -> Result<ChatCompletionRequestUserMessageContent, AppError> {
        if prompt.media().is_empty() {
            return Ok(ChatCompletionRequestUserMessageContent::Text(prompt.text()));
        }

        let mut parts = Vec::with_capacity(prompt.parts.len());
        for part in &prompt.parts {
            let part = match part {
                PromptPart::Text(text) => ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(text.as_str())
                        .build()?,
                ),
                PromptPart::Media(url) => ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(url.as_str())
                                .detail(ImageDetail::Auto)
                                .build()?,
                        )
                        .build()?,
                ),
            };
            parts.push(part);
        }
        Ok(ChatCompletionRequestUserMessageContent::Array(parts))
    }

    #[instrument(skip(self, prompt), fields(schema = O::NAME, model = %self.model))]
    async fn invoke<O: DeserializeOwned + PromptSchema>(&self, prompt: RenderedPrompt) -> Result<O, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(SYSTEM_PROMPT)
                        .build()?,
                ),
                ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(Self::user_content(&prompt)?)
                        .build()?,
                ),
            ])
            .response_format(ResponseFormat::JsonObject)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| AppError::CapabilityUnavailable("No response from AI".to_string()))?;

        debug!(bytes = content.len(), "AI response received");
        parse_structured_output(&content)
    }
}

#[async_trait]
impl AiCapability for OpenAiCapability {
    async fn diagnose(&self, input: DiagnosisInput) -> Result<DiagnosisOutput, AppError> {
        let prompt = build_prompt::<_, DiagnosisOutput>(DIAGNOSIS_TEMPLATE, &input)?;
        self.invoke(prompt).await
    }

    async fn explain(&self, input: ExplanationInput) -> Result<ExplanationOutput, AppError> {
        let prompt = build_prompt::<_, ExplanationOutput>(EXPLANATION_TEMPLATE, &input)?;
        self.invoke(prompt).await
    }

    async fn recognize(&self, input: RecognitionInput) -> Result<RecognitionOutput, AppError> {
        let prompt = build_prompt::<_, RecognitionOutput>(RECOGNITION_TEMPLATE, &input)?;
        self.invoke(prompt).await
    }

    async fn forecast_market(
        &self,
        input: MarketForecastInput,
    ) -> Result<MarketForecastOutput, AppError> {
        let prompt = build_prompt::<_, MarketForecastOutput>(MARKET_FORECAST_TEMPLATE, &input)?;
        self.invoke(prompt).await
    }
}
