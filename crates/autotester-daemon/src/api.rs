//! The REST surface over the controller.
//!
//! Thin by design: handlers parse the path and body, call one controller
//! operation, and map the error kind onto a status code. All mutating
//! endpoints answer 204 No Content.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use autotester_core::app::{Controller, ReadingView, StatusView};
use autotester_core::domain::{Config, Parameter, RenderedConfig, Task, TaskKind};
use autotester_core::Error;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/config", get(get_config).put(put_config))
        .route("/run/:param", post(run_param))
        .route("/calibrate/pump/start", post(calibrate_pump_start))
        .route("/calibrate/:param/start", post(calibrate_start))
        .route("/calibrate/:param", post(calibrate_write))
        .route("/status/:param", get(status_param))
        .route("/results/:param", get(results_param))
        .route("/queue", get(queue_list))
        .route("/queue/:param", delete(queue_cancel))
        .route("/log", get(log_list))
        .route("/fill/:param", post(fill_param))
        .with_state(controller)
}

#[derive(Debug)]
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::UnknownParameter(_) | Error::InvalidSchedule { .. } => StatusCode::BAD_REQUEST,
            // the legacy surface reports a missed cancel as a plain 400
            Error::NotQueued(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateInProgress(_)
            | Error::DuplicateQueued(_)
            | Error::TaskRunning(_)
            | Error::ReagentDepleted(_)
            | Error::WasteFull
            | Error::AnalyzerBusy => StatusCode::CONFLICT,
            Error::Device(_) | Error::Store(_) | Error::Codec(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

fn parse_parameter(param: &str) -> Result<Parameter, ApiError> {
    Parameter::parse(param).ok_or_else(|| ApiError(Error::UnknownParameter(param.to_string())))
}

#[derive(Debug, Deserialize)]
struct ValueBody {
    value: f32,
}

async fn get_config(
    State(controller): State<Arc<Controller>>,
) -> Result<Json<RenderedConfig>, ApiError> {
    Ok(Json(controller.render_config().await?))
}

async fn put_config(
    State(controller): State<Arc<Controller>>,
    Json(cfg): Json<Config>,
) -> Result<StatusCode, ApiError> {
    controller.update_config(cfg).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn run_param(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
) -> Result<StatusCode, ApiError> {
    let p = parse_parameter(&param)?;
    controller.run_test(p).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn calibrate_pump_start(
    State(controller): State<Arc<Controller>>,
) -> Result<StatusCode, ApiError> {
    controller.start_pump_calibration().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn calibrate_start(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
    Json(body): Json<ValueBody>,
) -> Result<StatusCode, ApiError> {
    let p = parse_parameter(&param)?;
    controller.start_calibration(p, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn calibrate_write(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
    Json(body): Json<ValueBody>,
) -> Result<StatusCode, ApiError> {
    let kind = if param == "pump" {
        TaskKind::PumpCalibration
    } else {
        TaskKind::Calibration(parse_parameter(&param)?)
    };
    controller.write_calibration(kind, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status_param(
    State(controller): State<Arc<Controller>>,
    // the path segment is UI convenience; the response carries whatever the
    // worker is actually running
    Path(_param): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    Ok(Json(controller.device_status().await?))
}

async fn results_param(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
) -> Result<Json<Vec<ReadingView>>, ApiError> {
    let p = parse_parameter(&param)?;
    Ok(Json(controller.results(p)?))
}

async fn queue_list(
    State(controller): State<Arc<Controller>>,
) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(controller.queue_list().await?))
}

async fn queue_cancel(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
) -> Result<StatusCode, ApiError> {
    let kind = TaskKind::parse(&param)
        .ok_or_else(|| ApiError(Error::UnknownParameter(param.clone())))?;
    controller.cancel(kind).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn log_list(State(controller): State<Arc<Controller>>) -> Json<Vec<String>> {
    Json(controller.log_lines())
}

async fn fill_param(
    State(controller): State<Arc<Controller>>,
    Path(param): Path<String>,
) -> Result<StatusCode, ApiError> {
    let p = parse_parameter(&param)?;
    controller.request_flush(p).await?;
    Ok(StatusCode::NO_CONTENT)
}
