use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

// ==============================================================================
// FARMER PROFILE
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct FarmerProfile {
    #[validate(length(min = 2, message = "Name must be at least 2 characters"))]
    pub name: String,
    #[validate(
        length(min = 10, message = "Phone number must be at least 10 digits"),
        custom(function = "validate_digits")
    )]
    pub phone: String,
    #[validate(length(min = 2, message = "State is required"))]
    pub state: String,
    #[validate(length(min = 2, message = "District is required"))]
    pub district: String,
    #[validate(length(min = 2, message = "Village is required"))]
    pub village: String,
    #[validate(length(min = 2, message = "Crop type is required"))]
    pub crop_type: String,
}

fn validate_digits(phone: &str) -> Result<(), ValidationError> {
    if !phone.is_empty() && phone.chars().all(|c| c.is_ascii_digit()) {
        return Ok(());
    }
    let mut err = ValidationError::new("digits");
    err.message = Some("Phone number must contain only digits".into());
    Err(err)
}

// ==============================================================================
// CROP ANALYSIS
// ==============================================================================

/// Combined diagnosis and explanation, before the caller stamps it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CropAnalysis {
    pub photo_data_uri: String,
    pub problem_identified: String,
    pub confidence_percentage: f64,
    pub suggested_action: String,
    pub explanation: String,
}

/// One entry of the analysis history. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    pub id: String,
    pub photo_data_uri: String,
    pub problem_identified: String,
    pub confidence_percentage: f64,
    pub suggested_action: String,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Stamps an analysis; the id is the creation instant in RFC 3339.
    pub fn new(analysis: CropAnalysis, at: DateTime<Utc>) -> Self {
        Self {
            id: at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            photo_data_uri: analysis.photo_data_uri,
            problem_identified: analysis.problem_identified,
            confidence_percentage: analysis.confidence_percentage,
            suggested_action: analysis.suggested_action,
            explanation: analysis.explanation,
            timestamp: at,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.problem_identified.trim().eq_ignore_ascii_case("healthy")
    }
}

// ==============================================================================
// REQUEST/RESPONSE DTOs
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeCropRequest {
    pub photo_data_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionRequest {
    pub photo_data_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MarketForecastRequest {
    #[validate(length(min = 1, message = "Crop type is required"))]
    pub crop_type: String,
    #[validate(length(min = 1, message = "Region is required"))]
    pub region: String,
    #[validate(length(min = 1, message = "Historical price data is required"))]
    pub historical_price_data: String,
    #[validate(length(min = 1, message = "Economic indicators are required"))]
    pub economic_indicators: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOverview {
    pub registered: bool,
    pub farmer: Option<FarmerProfile>,
    pub history_count: usize,
    pub analysis_in_progress: bool,
}

// API Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.to_string()),
        }
    }
}
