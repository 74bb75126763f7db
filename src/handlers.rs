use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{info, warn};
use validator::Validate;

use crate::ai::AiCapability;
use crate::dashboard::Dashboard;
use crate::errors::AppError;
use crate::media::DataUri;
use crate::models::*;
use crate::prompts::{MarketForecastInput, RecognitionInput};
use crate::state::SessionStore;
use crate::workflow::{perform_crop_analysis, AnalysisGate};

// ==============================================================================
// APPLICATION STATE
// ==============================================================================

pub struct AppState {
    pub session: RwLock<SessionStore>,
    pub ai: Option<Arc<dyn AiCapability>>,
    pub gate: AnalysisGate,
    pub max_image_bytes: usize,
}

impl AppState {
    pub fn new(session: SessionStore, ai: Option<Arc<dyn AiCapability>>, max_image_bytes: usize) -> Self {
        Self {
            session: RwLock::new(session),
            ai,
            gate: AnalysisGate::new(),
            max_image_bytes,
        }
    }

    fn capability(&self) -> Result<Arc<dyn AiCapability>, AppError> {
        self.ai
            .clone()
            .ok_or_else(|| AppError::CapabilityUnavailable("OpenAI API not configured".to_string()))
    }

    async fn registered_farmer(&self) -> Result<FarmerProfile, AppError> {
        self.session
            .read()
            .await
            .profile()
            .cloned()
            .ok_or(AppError::RegistrationRequired)
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check)).service(
        web::scope("/api/v1")
            .route("/session", web::get().to(session_overview))
            .route("/farmer", web::post().to(register_farmer))
            .route("/farmer", web::get().to(get_farmer))
            .route("/analysis", web::post().to(analyze_crop))
            .route("/analysis/upload", web::post().to(upload_crop_photo))
            .route("/analysis/history", web::get().to(analysis_history))
            .route("/dashboard", web::get().to(dashboard))
            .route("/recognition", web::post().to(recognize_image))
            .route("/market/forecast", web::post().to(forecast_market)),
    );
}

// ==============================================================================
// HEALTH CHECK
// ==============================================================================

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "Farmsmart",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ==============================================================================
// REGISTRATION
// ==============================================================================

pub async fn session_overview(state: web::Data<AppState>) -> HttpResponse {
    let session = state.session.read().await;
    let overview = SessionOverview {
        registered: session.profile().is_some(),
        farmer: session.profile().cloned(),
        history_count: session.history().len(),
        analysis_in_progress: state.gate.is_busy(),
    };
    HttpResponse::Ok().json(ApiResponse::success(overview))
}

pub async fn register_farmer(
    state: web::Data<AppState>,
    body: web::Json<FarmerProfile>,
) -> Result<HttpResponse, AppError> {
    let profile = body.into_inner();
    state.session.write().await.set_profile(profile.clone()).await?;

    info!(district = %profile.district, crop = %profile.crop_type, "Farmer registered");

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        profile,
        "Farmer registered successfully",
    )))
}

pub async fn get_farmer(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let farmer = state.registered_farmer().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(farmer)))
}

// ==============================================================================
// CROP ANALYSIS
// ==============================================================================

pub async fn analyze_crop(
    state: web::Data<AppState>,
    body: web::Json<AnalyzeCropRequest>,
) -> Result<HttpResponse, AppError> {
    state.registered_farmer().await?;
    let image = DataUri::parse_image(&body.photo_data_uri, state.max_image_bytes)?;
    run_analysis(&state, image).await
}

pub async fn upload_crop_photo(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    state.registered_farmer().await?;
    let mut image = None;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(e.to_string()))?;
        let content_type = match field.content_type() {
            Some(ct) if ct.type_() == mime::IMAGE => ct.clone(),
            _ => continue,
        };

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(e.to_string()))?;
            if bytes.len() + chunk.len() > state.max_image_bytes {
                return Err(AppError::Validation(format!(
                    "Image exceeds the {} byte limit",
                    state.max_image_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(AppError::Validation("Uploaded image is empty".to_string()));
        }

        image = Some(DataUri::from_bytes(&content_type, &bytes));
        break;
    }

    let image = image.ok_or_else(|| AppError::BadRequest("No image file in upload".to_string()))?;
    run_analysis(&state, image).await
}

/// Callers check registration before touching the payload.
async fn run_analysis(state: &AppState, image: DataUri) -> Result<HttpResponse, AppError> {
    let capability = state.capability()?;
    let _permit = state.gate.try_acquire().map_err(|e| {
        warn!("Rejected crop analysis while another is running");
        e
    })?;

    let analysis = perform_crop_analysis(capability.as_ref(), &image).await?;
    let record = AnalysisRecord::new(analysis, Utc::now());
    state.session.write().await.append_to_history(record.clone()).await?;

    info!(id = %record.id, problem = %record.problem_identified, "Analysis recorded");

    Ok(HttpResponse::Created().json(ApiResponse::success(record)))
}

pub async fn analysis_history(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session = state.session.read().await;
    if session.profile().is_none() {
        return Err(AppError::RegistrationRequired);
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(session.history())))
}

pub async fn dashboard(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let session = state.session.read().await;
    let snapshot = session.state();
    let farmer = snapshot.profile.as_ref().ok_or(AppError::RegistrationRequired)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(Dashboard::build(farmer, &snapshot.history))))
}

// ==============================================================================
// STANDALONE AI FEATURES
// ==============================================================================

pub async fn recognize_image(
    state: web::Data<AppState>,
    body: web::Json<RecognitionRequest>,
) -> Result<HttpResponse, AppError> {
    state.registered_farmer().await?;
    let image = DataUri::parse_image(&body.photo_data_uri, state.max_image_bytes)?;
    let capability = state.capability()?;

    let result = capability
        .recognize(RecognitionInput {
            photo_data_uri: image.into_string(),
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Image recognition failed");
            e
        })?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn forecast_market(
    state: web::Data<AppState>,
    body: web::Json<MarketForecastRequest>,
) -> Result<HttpResponse, AppError> {
    state.registered_farmer().await?;
    body.validate()?;
    let capability = state.capability()?;

    let req = body.into_inner();
    let result = capability
        .forecast_market(MarketForecastInput {
            crop_type: req.crop_type,
            region: req.region,
            historical_price_data: req.historical_price_data,
            economic_indicators: req.economic_indicators,
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Market forecast failed");
            e
        })?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAiCapability;
    use crate::models::fixtures::farmer;
    use crate::prompts::{DiagnosisOutput, ExplanationOutput, MarketForecastOutput, RecognitionOutput};
    use crate::snapshot::InMemorySnapshotStore;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    async fn app_state(mock: Option<MockAiCapability>, registered: bool) -> web::Data<AppState> {
        let mut session = SessionStore::load(Arc::new(InMemorySnapshotStore::new())).await;
        if registered {
            session.set_profile(farmer()).await.unwrap();
        }
        let ai = mock.map(|m| Arc::new(m) as Arc<dyn AiCapability>);
        web::Data::new(AppState::new(session, ai, 1024 * 1024))
    }

    fn healthy_mock() -> MockAiCapability {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().returning(|_| {
            Ok(DiagnosisOutput {
                problem_identified: "Early Blight".into(),
                confidence_percentage: 92.0,
                suggested_action: "Spray organic fungicide".into(),
            })
        });
        mock.expect_explain().returning(|_| {
            Ok(ExplanationOutput {
                explanation: "The model is quite sure.".into(),
            })
        });
        mock
    }

    macro_rules! service {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(configure)).await
        };
    }

    #[actix_rt::test]
    async fn health_reports_service() {
        let state = app_state(None, false).await;
        let app = service!(state);
        let resp: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp["status"], "healthy");
    }

    #[actix_rt::test]
    async fn registration_then_session_shows_farmer() {
        let state = app_state(None, false).await;
        let app = service!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/farmer")
            .set_json(farmer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let overview: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/session").to_request(),
        )
        .await;
        assert_eq!(overview["data"]["registered"], true);
        assert_eq!(overview["data"]["farmer"]["name"], "Ram Singh");
    }

    #[actix_rt::test]
    async fn short_phone_registration_is_rejected() {
        let state = app_state(None, false).await;
        let app = service!(state);
        let mut f = farmer();
        f.phone = "98765".into();

        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/v1/farmer").set_json(f).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.session.read().await.profile().is_none());
    }

    #[actix_rt::test]
    async fn second_registration_conflicts() {
        let state = app_state(None, true).await;
        let app = service!(state);
        let resp = test::call_service(
            &app,
            test::TestRequest::post().uri("/api/v1/farmer").set_json(farmer()).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn unregistered_session_is_gated() {
        let state = app_state(Some(MockAiCapability::new()), false).await;
        let app = service!(state);

        for uri in ["/api/v1/farmer", "/api/v1/analysis/history", "/api/v1/dashboard"] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", uri);
        }

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn analysis_is_recorded_newest_first() {
        let state = app_state(Some(healthy_mock()), true).await;
        let app = service!(state);

        for _ in 0..2 {
            let resp = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri("/api/v1/analysis")
                    .set_json(json!({ "photo_data_uri": PNG }))
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let history: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/analysis/history").to_request(),
        )
        .await;
        let entries = history["data"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["problem_identified"], "Early Blight");
        assert_eq!(entries[0]["photo_data_uri"], PNG);
        assert_eq!(entries[0]["explanation"], "The model is quite sure.");

        let session = state.session.read().await;
        assert!(session.history()[0].timestamp >= session.history()[1].timestamp);
    }

    #[actix_rt::test]
    async fn empty_diagnosis_returns_generic_failure() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().returning(|_| {
            Ok(DiagnosisOutput {
                problem_identified: String::new(),
                confidence_percentage: 0.0,
                suggested_action: String::new(),
            })
        });
        mock.expect_explain().times(0);
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], crate::errors::ANALYSIS_FAILED_MESSAGE);
        assert!(state.session.read().await.history().is_empty());
        assert!(!state.gate.is_busy());
    }

    #[actix_rt::test]
    async fn explanation_failure_records_nothing() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().returning(|_| {
            Ok(DiagnosisOutput {
                problem_identified: "Early Blight".into(),
                confidence_percentage: 92.0,
                suggested_action: "Spray organic fungicide".into(),
            })
        });
        mock.expect_explain()
            .times(1)
            .returning(|_| Err(AppError::CapabilityUnavailable("upstream timeout".into())));
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], crate::errors::ANALYSIS_FAILED_MESSAGE);
        assert!(!body.to_string().contains("upstream timeout"));
        assert!(state.session.read().await.history().is_empty());
        assert!(!state.gate.is_busy());
    }

    #[actix_rt::test]
    async fn unregistered_caller_with_bad_payload_sees_registration_error() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().times(0);
        mock.expect_recognize().times(0);
        mock.expect_forecast_market().times(0);
        let state = app_state(Some(mock), false).await;
        let app = service!(state);

        for uri in ["/api/v1/analysis", "/api/v1/recognition"] {
            let resp = test::call_service(
                &app,
                test::TestRequest::post()
                    .uri(uri)
                    .set_json(json!({ "photo_data_uri": "not a data uri" }))
                    .to_request(),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{}", uri);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "REGISTRATION_REQUIRED");
        }

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/market/forecast")
                .set_json(json!({
                    "crop_type": "",
                    "region": "",
                    "historical_price_data": "",
                    "economic_indicators": ""
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_rt::test]
    async fn non_image_payload_is_rejected_before_ai_call() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().times(0);
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": "data:text/plain;base64,aGVsbG8=" }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn busy_gate_rejects_analysis() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose().times(0);
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let _permit = state.gate.try_acquire().unwrap();
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_rt::test]
    async fn unconfigured_ai_is_bad_gateway() {
        let state = app_state(None, true).await;
        let app = service!(state);
        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[actix_rt::test]
    async fn multipart_upload_becomes_data_uri() {
        let mut mock = MockAiCapability::new();
        mock.expect_diagnose()
            .withf(|input| input.photo_data_uri == "data:image/png;base64,iVBORw0KGgo=")
            .returning(|_| {
                Ok(DiagnosisOutput {
                    problem_identified: "Healthy".into(),
                    confidence_percentage: 88.0,
                    suggested_action: "No action needed".into(),
                })
            });
        mock.expect_explain()
            .returning(|_| Ok(ExplanationOutput { explanation: "Looks fine.".into() }));
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let mut body = Vec::new();
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"leaf.png\"\r\nContent-Type: image/png\r\n\r\n",
        );
        body.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis/upload")
                .insert_header(("content-type", "multipart/form-data; boundary=XBOUNDARY"))
                .set_payload(body)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(state.session.read().await.history().len(), 1);
    }

    #[actix_rt::test]
    async fn dashboard_reflects_history() {
        let state = app_state(Some(healthy_mock()), true).await;
        let app = service!(state);
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/analysis")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/api/v1/dashboard").to_request(),
        )
        .await;
        assert_eq!(body["data"]["health_summary"]["diseased"], 1);
        assert_eq!(body["data"]["field_layout"][0]["status"], "diseased");
        assert_eq!(body["data"]["weather"]["district"], "Guntur");
    }

    #[actix_rt::test]
    async fn recognition_keeps_unit_confidence_scale() {
        let mut mock = MockAiCapability::new();
        mock.expect_recognize().returning(|_| {
            Ok(RecognitionOutput {
                pest_or_disease_detected: true,
                identification: "Aphids".into(),
                confidence: 0.85,
                suggested_actions: "Apply neem oil".into(),
            })
        });
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/recognition")
                .set_json(json!({ "photo_data_uri": PNG }))
                .to_request(),
        )
        .await;
        assert_eq!(body["data"]["confidence"], 0.85);
        assert_eq!(body["data"]["pest_or_disease_detected"], true);
    }

    #[actix_rt::test]
    async fn market_forecast_passes_fields_through() {
        let mut mock = MockAiCapability::new();
        mock.expect_forecast_market()
            .withf(|input| input.crop_type == "Cotton" && input.region == "Maharashtra")
            .returning(|_| {
                Ok(MarketForecastOutput {
                    forecast_summary: "Prices firming".into(),
                    suggested_selling_time: "Early March".into(),
                    reasoning: "Export demand".into(),
                })
            });
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let body: Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/market/forecast")
                .set_json(json!({
                    "crop_type": "Cotton",
                    "region": "Maharashtra",
                    "historical_price_data": "6800, 7000, 7200",
                    "economic_indicators": "Export demand rising"
                }))
                .to_request(),
        )
        .await;
        assert_eq!(body["data"]["suggested_selling_time"], "Early March");
    }

    #[actix_rt::test]
    async fn market_forecast_requires_fields() {
        let mut mock = MockAiCapability::new();
        mock.expect_forecast_market().times(0);
        let state = app_state(Some(mock), true).await;
        let app = service!(state);

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/api/v1/market/forecast")
                .set_json(json!({
                    "crop_type": "",
                    "region": "Maharashtra",
                    "historical_price_data": "6800",
                    "economic_indicators": "stable"
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
