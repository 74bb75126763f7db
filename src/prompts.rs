//! Prompt contracts for the four AI operations.
//!
//! Every operation pairs an input record, an output record and an instruction
//! template. Templates reference input fields with `{{field}}` (or the
//! triple-brace form `{{{field}}}`) and inline images with
//! `{{media url=field}}`. Rendering is a pure function so it can be tested
//! without talking to a model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

// ==============================================================================
// SCHEMA DECLARATIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

/// A flat record whose fields are described to the model.
pub trait PromptSchema {
    const NAME: &'static str;
    fn fields() -> &'static [FieldSpec];

    /// Briefing on the input record, one line per field.
    fn input_brief() -> String {
        let lines = Self::fields()
            .iter()
            .map(|f| format!("- {}: {}", f.name, f.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!("The request provides these inputs:\n{}", lines)
    }

    /// JSON response instruction appended to every prompt.
    fn response_instruction() -> String {
        let keys = Self::fields()
            .iter()
            .map(|f| format!("- \"{}\" ({}): {}", f.name, f.kind.json_type(), f.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Respond with a single JSON object and nothing else. All keys are required:\n{}",
            keys
        )
    }
}

// ==============================================================================
// CROP HEALTH DIAGNOSIS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisInput {
    pub photo_data_uri: String,
}

impl PromptSchema for DiagnosisInput {
    const NAME: &'static str = "analyze_crop_health_input";
    fn fields() -> &'static [FieldSpec] {
        &[FieldSpec {
            name: "photo_data_uri",
            kind: FieldKind::String,
            description: "A photo of a crop leaf, as a data URI that must include a MIME type and use Base64 encoding. Expected format: data:<mimetype>;base64,<encoded_data>.",
        }]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisOutput {
    pub problem_identified: String,
    pub confidence_percentage: f64,
    pub suggested_action: String,
}

impl PromptSchema for DiagnosisOutput {
    const NAME: &'static str = "analyze_crop_health_output";
    fn fields() -> &'static [FieldSpec] {
        &[
            FieldSpec {
                name: "problem_identified",
                kind: FieldKind::String,
                description: "The identified problem (e.g., Early Blight), or Healthy.",
            },
            FieldSpec {
                name: "confidence_percentage",
                kind: FieldKind::Number,
                description: "The confidence percentage from 0 to 100 (e.g., 92).",
            },
            FieldSpec {
                name: "suggested_action",
                kind: FieldKind::String,
                description: "The suggested action (e.g., Spray organic fungicide).",
            },
        ]
    }
}

pub const DIAGNOSIS_TEMPLATE: &str = "You are an AI assistant specialized in analyzing crop health based on images of crop leaves.

Analyze the provided image and identify potential diseases, pests, or stress affecting the crop.
Provide a confidence percentage for your diagnosis and suggest appropriate actions to address the issue.

Analyze the following crop leaf image:
{{media url=photo_data_uri}}";

// ==============================================================================
// CONFIDENCE EXPLANATION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplanationInput {
    pub problem_identified: String,
    pub confidence_percentage: f64,
    pub suggested_action: String,
}

impl From<&DiagnosisOutput> for ExplanationInput {
    fn from(d: &DiagnosisOutput) -> Self {
        Self {
            problem_identified: d.problem_identified.clone(),
            confidence_percentage: d.confidence_percentage,
            suggested_action: d.suggested_action.clone(),
        }
    }
}

impl PromptSchema for ExplanationInput {
    const NAME: &'static str = "explain_confidence_score_input";
    fn fields() -> &'static [FieldSpec] {
        &[
            FieldSpec {
                name: "problem_identified",
                kind: FieldKind::String,
                description: "The identified problem with the crop.",
            },
            FieldSpec {
                name: "confidence_percentage",
                kind: FieldKind::Number,
                description: "The confidence percentage of the diagnosis.",
            },
            FieldSpec {
                name: "suggested_action",
                kind: FieldKind::String,
                description: "The suggested action to take.",
            },
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplanationOutput {
    pub explanation: String,
}

impl PromptSchema for ExplanationOutput {
    const NAME: &'static str = "explain_confidence_score_output";
    fn fields() -> &'static [FieldSpec] {
        &[FieldSpec {
            name: "explanation",
            kind: FieldKind::String,
            description: "The explanation of the confidence score.",
        }]
    }
}

pub const EXPLANATION_TEMPLATE: &str = "You are an AI assistant designed to explain the confidence score of an AI diagnosis to farmers.

Problem Identified: {{{problem_identified}}}
Confidence Percentage: {{{confidence_percentage}}}
Suggested Action: {{{suggested_action}}}

Explain the confidence score in simple terms so that the farmer can understand the certainty of the diagnosis and make better decisions about the recommended actions.";

// ==============================================================================
// GENERIC IMAGE RECOGNITION
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionInput {
    pub photo_data_uri: String,
}

impl PromptSchema for RecognitionInput {
    const NAME: &'static str = "image_recognition_input";
    fn fields() -> &'static [FieldSpec] {
        &[FieldSpec {
            name: "photo_data_uri",
            kind: FieldKind::String,
            description: "A photo of a plant, as a data URI that must include a MIME type and use Base64 encoding.",
        }]
    }
}

/// `confidence` is on a 0-1 scale, unlike the 0-100 diagnosis percentage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecognitionOutput {
    pub pest_or_disease_detected: bool,
    pub identification: String,
    pub confidence: f64,
    pub suggested_actions: String,
}

impl PromptSchema for RecognitionOutput {
    const NAME: &'static str = "image_recognition_output";
    fn fields() -> &'static [FieldSpec] {
        &[
            FieldSpec {
                name: "pest_or_disease_detected",
                kind: FieldKind::Boolean,
                description: "Whether a pest or disease is detected in the image.",
            },
            FieldSpec {
                name: "identification",
                kind: FieldKind::String,
                description: "The identified pest or disease, if any.",
            },
            FieldSpec {
                name: "confidence",
                kind: FieldKind::Number,
                description: "The confidence level of the identification (0-1).",
            },
            FieldSpec {
                name: "suggested_actions",
                kind: FieldKind::String,
                description: "Suggested actions to address the identified pest or disease.",
            },
        ]
    }
}

pub const RECOGNITION_TEMPLATE: &str = "You are an expert in plant pathology. Analyze the image of the plant and determine if any pests or diseases are present.

Based on the image, report whether a pest or disease is detected, its name, your confidence (0-1) and a list of suggested actions.

Analyze the following image: {{media url=photo_data_uri}}";

// ==============================================================================
// MARKET TREND FORECAST
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketForecastInput {
    pub crop_type: String,
    pub region: String,
    pub historical_price_data: String,
    pub economic_indicators: String,
}

impl PromptSchema for MarketForecastInput {
    const NAME: &'static str = "market_trend_forecast_input";
    fn fields() -> &'static [FieldSpec] {
        &[
            FieldSpec {
                name: "crop_type",
                kind: FieldKind::String,
                description: "The type of crop to forecast market trends for.",
            },
            FieldSpec {
                name: "region",
                kind: FieldKind::String,
                description: "The region where the crop is grown.",
            },
            FieldSpec {
                name: "historical_price_data",
                kind: FieldKind::String,
                description: "Historical price data for the crop.",
            },
            FieldSpec {
                name: "economic_indicators",
                kind: FieldKind::String,
                description: "Relevant economic indicators for the crop and region.",
            },
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketForecastOutput {
    pub forecast_summary: String,
    pub suggested_selling_time: String,
    pub reasoning: String,
}

impl PromptSchema for MarketForecastOutput {
    const NAME: &'static str = "market_trend_forecast_output";
    fn fields() -> &'static [FieldSpec] {
        &[
            FieldSpec {
                name: "forecast_summary",
                kind: FieldKind::String,
                description: "A summary of the market trend forecast for the crop.",
            },
            FieldSpec {
                name: "suggested_selling_time",
                kind: FieldKind::String,
                description: "The suggested best time to sell the crop to maximize profits.",
            },
            FieldSpec {
                name: "reasoning",
                kind: FieldKind::String,
                description: "The reasoning behind the market trend forecast and suggested selling time.",
            },
        ]
    }
}

pub const MARKET_FORECAST_TEMPLATE: &str = "You are an expert agricultural market analyst. Based on the provided information, generate a market trend forecast for the specified crop and suggest the best time to sell to maximize profits.

Crop Type: {{{crop_type}}}
Region: {{{region}}}
Historical Price Data: {{{historical_price_data}}}
Economic Indicators: {{{economic_indicators}}}

Consider all factors and provide a well-reasoned forecast and recommendation.";

// ==============================================================================
// TEMPLATE RENDERING
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    Media(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedPrompt {
    pub parts: Vec<PromptPart>,
}

impl RenderedPrompt {
    /// Text view with media parts shown as `[media]`.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| match p {
                PromptPart::Text(t) => t.as_str(),
                PromptPart::Media(_) => "[media]",
            })
            .collect()
    }

    pub fn media(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                PromptPart::Media(url) => Some(url.as_str()),
                PromptPart::Text(_) => None,
            })
            .collect()
    }

    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.parts.last_mut() {
            Some(PromptPart::Text(existing)) => existing.push_str(text),
            _ => self.parts.push(PromptPart::Text(text.to_string())),
        }
    }

    fn push_media(&mut self, url: String) {
        self.parts.push(PromptPart::Media(url));
    }
}

fn scalar_text(name: &str, value: &Value) -> Result<String, AppError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        _ => Err(AppError::Template(format!("Field '{}' is not a primitive", name))),
    }
}

/// `media url=x` yields `url=x`; a field that merely starts with `media` yields `None`.
fn media_reference(body: &str) -> Option<&str> {
    let rest = body.strip_prefix("media")?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Renders `template` against the fields of `record`.
pub fn render<T: Serialize>(template: &str, record: &T) -> Result<RenderedPrompt, AppError> {
    let value = serde_json::to_value(record).map_err(|e| AppError::Template(e.to_string()))?;
    let fields = value
        .as_object()
        .ok_or_else(|| AppError::Template("Prompt input must be a flat record".to_string()))?;

    let mut rendered = RenderedPrompt::default();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        rendered.push_text(&rest[..start]);
        let after = &rest[start..];
        let (open, close) = if after.starts_with("{{{") { ("{{{", "}}}") } else { ("{{", "}}") };
        let body_start = open.len();
        let end = after[body_start..]
            .find(close)
            .ok_or_else(|| AppError::Template("Unclosed placeholder".to_string()))?;
        let body = after[body_start..body_start + end].trim();

        if let Some(reference) = media_reference(body) {
            let name = reference
                .strip_prefix("url=")
                .ok_or_else(|| AppError::Template(format!("Malformed media reference '{}'", body)))?
                .trim();
            let url = fields
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::Template(format!("Media field '{}' must be a string", name)))?;
            rendered.push_media(url.to_string());
        } else {
            let field = fields
                .get(body)
                .ok_or_else(|| AppError::Template(format!("Unknown field '{}'", body)))?;
            rendered.push_text(&scalar_text(body, field)?);
        }

        rest = &after[body_start + end + close.len()..];
    }
    rendered.push_text(rest);

    Ok(rendered)
}

/// Renders an operation's template, then appends the input briefing and the
/// output schema instruction.
pub fn build_prompt<I, O>(template: &str, input: &I) -> Result<RenderedPrompt, AppError>
where
    I: Serialize + PromptSchema,
    O: PromptSchema,
{
    let mut prompt = render(template, input)?;
    prompt.push_text("\n\n");
    prompt.push_text(&I::input_brief());
    prompt.push_text("\n\n");
    prompt.push_text(&O::response_instruction());
    Ok(prompt)
}
