use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::ai::AiCapability;
use crate::errors::AppError;
use crate::media::DataUri;
use crate::models::CropAnalysis;
use crate::prompts::{DiagnosisInput, ExplanationInput};

// ==============================================================================
// CROP ANALYSIS WORKFLOW
// ==============================================================================

/// Diagnoses the leaf photo, then asks for an explanation of that diagnosis.
///
/// Each call is attempted once. Nothing partial is returned: the caller only
/// gets a `CropAnalysis` when both calls succeed. A problem label or action
/// that is blank after trimming counts as empty, not only `""`.
#[instrument(skip_all, fields(mime = %image.mime(), bytes = image.decoded_len()))]
pub async fn perform_crop_analysis(
    capability: &dyn AiCapability,
    image: &DataUri,
) -> Result<CropAnalysis, AppError> {
    let diagnosis = capability
        .diagnose(DiagnosisInput {
            photo_data_uri: image.as_str().to_string(),
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Diagnosis call failed");
            into_capability_error(e)
        })?;

    if diagnosis.problem_identified.trim().is_empty() || diagnosis.suggested_action.trim().is_empty() {
        warn!(
            problem = %diagnosis.problem_identified,
            action = %diagnosis.suggested_action,
            "Diagnosis came back empty"
        );
        return Err(AppError::DiagnosisEmpty);
    }

    let explanation = capability
        .explain(ExplanationInput::from(&diagnosis))
        .await
        .map_err(|e| {
            error!(error = %e, problem = %diagnosis.problem_identified, "Explanation call failed");
            into_capability_error(e)
        })?;

    info!(
        problem = %diagnosis.problem_identified,
        confidence = diagnosis.confidence_percentage,
        "Crop analysis completed"
    );

    Ok(CropAnalysis {
        photo_data_uri: image.as_str().to_string(),
        problem_identified: diagnosis.problem_identified,
        confidence_percentage: diagnosis.confidence_percentage,
        suggested_action: diagnosis.suggested_action,
        explanation: explanation.explanation,
    })
}

fn into_capability_error(err: AppError) -> AppError {
    match err {
        AppError::CapabilityUnavailable(_) => err,
        other => AppError::CapabilityUnavailable(other.to_string()),
    }
}

// ==============================================================================
// IN-FLIGHT GUARD
// ==============================================================================

/// Allows one crop analysis at a time.
#[derive(Clone, Default)]
pub struct AnalysisGate {
    busy: Arc<AtomicBool>,
}

/// Held while an analysis runs; dropping it reopens the gate.
pub struct AnalysisPermit {
    busy: Arc<AtomicBool>,
}

impl AnalysisGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Result<AnalysisPermit, AppError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::AnalysisInProgress)?;
        Ok(AnalysisPermit {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for AnalysisPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
