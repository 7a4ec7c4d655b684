use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use validator::Validate;
use crate::core::{ConsentProtocol, MatchingError, RoundOrchestrator, TrainingPipeline};
use crate::models::{
    ErrorResponse, EventScope, HealthResponse, PairId, PredictQuery, SubmitConsentRequest,
    TrainEmbeddingsRequest,
};
use crate::services::MatchStore;
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MatchStore>,
    pub orchestrator: RoundOrchestrator,
    pub consent: ConsentProtocol,
    pub training: TrainingPipeline,
}

/// Configure all round-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/events/{scope}/rounds/{round}/run", web::post().to(run_round))
        .route("/events/{scope}/rounds/{round}", web::get().to(get_round))
        .route("/events/{scope}/pairs/{pair_id}/consent", web::post().to(submit_consent))
        .route("/events/{scope}/embeddings/train", web::post().to(train_embeddings))
        .route("/events/{scope}/compatibility", web::get().to(predict_compatibility));
}

fn error_response(err: &MatchingError) -> HttpResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::info!("Request rejected ({}): {}", err.kind(), err);
    }

    HttpResponse::build(status).json(ErrorResponse {
        error: err.kind().to_string(),
        message: err.to_string(),
        status_code: status.as_u16(),
    })
}

fn validation_response(errors: validator::ValidationErrors) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "validation_failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let healthy = match state.store.health_check().await {
        Ok(ok) => ok,
        Err(e) => {
            tracing::warn!("Store health check failed: {}", e);
            false
        }
    };

    let status = if healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Run a matching round
///
/// POST /api/v1/events/{scope}/rounds/{round}/run
async fn run_round(
    state: web::Data<AppState>,
    path: web::Path<(String, u32)>,
) -> impl Responder {
    let (scope, round) = path.into_inner();
    let scope = EventScope::new(scope);

    match state.orchestrator.run_round(&scope, round).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

/// Records of a closed round
///
/// GET /api/v1/events/{scope}/rounds/{round}
async fn get_round(
    state: web::Data<AppState>,
    path: web::Path<(String, u32)>,
) -> impl Responder {
    let (scope, round) = path.into_inner();
    let scope = EventScope::new(scope);

    match state.store.get_round_records(&scope, round).await {
        Ok(records) if records.is_empty() => HttpResponse::NotFound().json(ErrorResponse {
            error: "round_not_found".to_string(),
            message: format!("Round {} of {} has not been run", round, scope),
            status_code: 404,
        }),
        Ok(records) => HttpResponse::Ok().json(serde_json::json!({
            "round": round,
            "records": records,
        })),
        Err(e) => error_response(&MatchingError::Store(e)),
    }
}

/// Record one participant's consent on a pairing
///
/// POST /api/v1/events/{scope}/pairs/{pair_id}/consent
///
/// Request body:
/// ```json
/// {
///   "participantId": 42,
///   "wantsMatch": true
/// }
/// ```
async fn submit_consent(
    state: web::Data<AppState>,
    path: web::Path<(String, PairId)>,
    req: web::Json<SubmitConsentRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_response(errors);
    }

    let (scope, pair_id) = path.into_inner();
    let scope = EventScope::new(scope);

    match state
        .consent
        .submit_for_participant(&scope, pair_id, req.participant_id, req.wants_match)
        .await
    {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

/// Train a new embedding model version
///
/// POST /api/v1/events/{scope}/embeddings/train
///
/// Request body: `{"rank": 3}` or `{}` for the configured rank
async fn train_embeddings(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<TrainEmbeddingsRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return validation_response(errors);
    }

    let scope = EventScope::new(path.into_inner());
    match state.training.train_embeddings(&scope, req.rank).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

/// Learned compatibility of two participants
///
/// GET /api/v1/events/{scope}/compatibility?a={id}&b={id}
async fn predict_compatibility(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<PredictQuery>,
) -> impl Responder {
    if let Err(errors) = query.validate() {
        return validation_response(errors);
    }

    let scope = EventScope::new(path.into_inner());
    match state.training.predict_compatibility(&scope, query.a, query.b).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_error_response_uses_kind_and_status() {
        let response = error_response(&MatchingError::RoundAlreadyComplete(2));
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "round_already_complete");
        assert_eq!(json["status_code"], 409);
    }

    #[test]
    fn test_health_check_response() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            timestamp: chrono::Utc::now(),
        };

        assert_eq!(response.status, "healthy");
    }
}
