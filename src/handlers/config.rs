use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "audio": {
                "sample_rate": config.audio.sample_rate,
                "channels": config.audio.channels,
                "bit_depth": config.audio.bit_depth,
                "max_capture_bytes": config.audio.max_capture_bytes
            },
            "providers": {
                "language": config.providers.language,
                "system_prompt": config.providers.system_prompt
            },
            "recording": {
                "enabled": config.recording.enabled,
                "directory": config.recording.directory
            },
            "performance": {
                "max_concurrent_sessions": config.performance.max_concurrent_sessions
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state.update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port
            },
            "audio": {
                "sample_rate": current_config.audio.sample_rate,
                "channels": current_config.audio.channels,
                "bit_depth": current_config.audio.bit_depth,
                "max_capture_bytes": current_config.audio.max_capture_bytes
            },
            "providers": {
                "language": current_config.providers.language,
                "system_prompt": current_config.providers.system_prompt
            },
            "recording": {
                "enabled": current_config.recording.enabled,
                "directory": current_config.recording.directory
            },
            "performance": {
                "max_concurrent_sessions": current_config.performance.max_concurrent_sessions
            }
        }
    })))
}
