use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ServerState;
use crate::error::RegistrationError;
use crate::logging::{clear_correlation_id, new_correlation_id, RegistrationMetrics};
use crate::types::{RegisterRequest, RegistrationResult};

/// Wire response. `transform` is always present; `error` only on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub transform: Option<[[f64; 4]; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegisterResponse {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            transform: None,
            error: Some(message.into()),
        }
    }
}

impl From<&RegistrationResult> for RegisterResponse {
    fn from(result: &RegistrationResult) -> Self {
        Self {
            transform: result.to_response().transform,
            error: None,
        }
    }
}

pub(super) async fn banner() -> &'static str {
    "Point cloud registration service\n\
     POST {\"src\": [[x, y, z], ...], \"tgt\": [[x, y, z], ...]} to / or /api/register\n"
}

pub(super) async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "extractor": state.registrar.extractor_name(),
    }))
}

pub(super) async fn stats(State(state): State<ServerState>) -> Json<RegistrationMetrics> {
    Json(state.metrics.registration_metrics())
}

pub(super) async fn register(
    State(state): State<ServerState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> (StatusCode, Json<RegisterResponse>) {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected request body");
            return (
                rejection.status(),
                Json(RegisterResponse::failure(rejection.body_text())),
            );
        }
    };

    let Ok(permit) = state.permits.clone().acquire_owned().await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(RegisterResponse::failure("service is shutting down")),
        );
    };

    let registrar = state.registrar.clone();
    let seed = state.seed;
    let task = tokio::task::spawn_blocking(move || {
        // Held until the work finishes, even if the client was already answered
        let _permit = permit;
        let correlation_id = new_correlation_id();
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::info!(
            %correlation_id,
            source_points = request.src.len(),
            target_points = request.tgt.len(),
            "Registration request"
        );
        let result = registrar.register_triples(&request.src, &request.tgt, &mut rng);
        clear_correlation_id();
        result
    });

    let budget = Duration::from_millis(state.config.request_timeout_ms);
    let Ok(joined) = tokio::time::timeout(budget, task).await else {
        tracing::warn!(
            timeout_ms = state.config.request_timeout_ms,
            "Registration exceeded the request budget"
        );
        return (
            StatusCode::OK,
            Json(RegisterResponse {
                transform: None,
                error: None,
            }),
        );
    };

    match joined {
        Ok(Ok(result)) => (StatusCode::OK, Json(RegisterResponse::from(&result))),
        Ok(Err(e)) => (status_for(&e), Json(RegisterResponse::failure(e.to_string()))),
        Err(e) => {
            tracing::error!(error = %e, "Registration task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RegisterResponse::failure("registration task failed")),
            )
        }
    }
}

fn status_for(error: &RegistrationError) -> StatusCode {
    if error.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %error, "Registration failed");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shapes() {
        let ok = RegisterResponse {
            transform: None,
            error: None,
        };
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"transform":null}"#);

        let failed = RegisterResponse::failure("bad cloud");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"transform": null, "error": "bad cloud"})
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&RegistrationError::InvalidInput("empty".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&RegistrationError::FeatureModel("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
