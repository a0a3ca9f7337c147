// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! HTTP control surface
//!
//! - `GET /health` liveness of the server itself
//! - `GET /process/list` every workload with its state
//! - `POST /process/control` with `fn` (start, stop, kill, end, status) and `id`

use std::any::Any;
use std::future::Future;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::ErrorKind;
use crate::registry::Workload;
use crate::supervisor::{ProcessSupervisor, Started};
use crate::workload::{ExecutionMode, Status};
use crate::Error;

const INTERNAL_ERROR: &str = "Internal server error";

/// One element of the list response
#[derive(Debug, Serialize)]
pub struct ProcessEntry {
    pub id: usize,
    pub desc: String,
    pub status: Status,
    pub mode: ExecutionMode,
    pub pid: libc::pid_t,
}

impl From<&Workload> for ProcessEntry {
    fn from(workload: &Workload) -> Self {
        Self {
            id: workload.id,
            desc: workload.spec.description.clone(),
            status: workload.runtime.status(),
            mode: workload.spec.mode,
            pid: workload.runtime.wire_pid(),
        }
    }
}

/// Body of a `status` control call
#[derive(Debug, Serialize)]
pub struct StatusEntry {
    pub id: usize,
    pub desc: String,
    pub status: Status,
    pub pid: libc::pid_t,
}

impl From<Workload> for StatusEntry {
    fn from(workload: Workload) -> Self {
        Self {
            id: workload.id,
            desc: workload.spec.description.clone(),
            status: workload.runtime.status(),
            pid: workload.runtime.wire_pid(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    Start,
    /// Graceful termination
    Stop,
    /// Forceful termination
    Kill,
    Status,
}

impl FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Function::Start),
            "stop" | "end" => Ok(Function::Stop),
            "kill" => Ok(Function::Kill),
            "status" => Ok(Function::Status),
            _ => Err(Error::validation(format!(
                "unknown function: {}. Valid functions: start, stop, kill, end, status",
                s
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ControlParams {
    #[serde(rename = "fn")]
    function: Option<String>,
    id: Option<String>,
}

impl ControlParams {
    fn or(self, other: ControlParams) -> Self {
        Self {
            function: self.function.or(other.function),
            id: self.id.or(other.id),
        }
    }
}

/// Error rendered to the client as a status code and a plain text message
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::NotRunning(_) => StatusCode::CONFLICT,
            ErrorKind::Spawn { .. }
            | ErrorKind::Termination { .. }
            | ErrorKind::TerminationTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => {
                error!("internal error: {}", err);
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR);
            }
        };

        if status.is_server_error() {
            warn!("control request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub fn router(supervisor: Arc<ProcessSupervisor>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/process/list", get(list))
        .route("/process/control", post(control))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

/// Serves the control surface until `shutdown` completes
pub async fn serve<F>(
    listener: TcpListener,
    supervisor: Arc<ProcessSupervisor>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "OK"
}

async fn list(State(supervisor): State<Arc<ProcessSupervisor>>) -> Json<Vec<ProcessEntry>> {
    let entries = supervisor
        .registry()
        .list()
        .iter()
        .map(ProcessEntry::from)
        .collect();

    Json(entries)
}

async fn control(
    State(supervisor): State<Arc<ProcessSupervisor>>,
    Query(query): Query<ControlParams>,
    form: Result<Form<ControlParams>, FormRejection>,
) -> Result<Response, ApiError> {
    let params = match form {
        Ok(Form(form)) => form.or(query),
        Err(_) => query,
    };

    let (function, raw_id) = match (params.function, params.id) {
        (Some(function), Some(id)) => (function, id),
        _ => {
            return Err(
                Error::validation("missing required parameters: fn and id").into(),
            )
        }
    };

    let id = parse_id(&raw_id, supervisor.registry().len())?;
    let function = function.parse::<Function>()?;

    let response = match function {
        Function::Start => match supervisor.start(id).await? {
            Started::Spawned(pid) => {
                format!("Process started successfully (PID: {})", pid).into_response()
            }
            Started::AlreadyRunning(pid) => {
                format!("Process is already running (PID: {})", pid).into_response()
            }
        },
        Function::Stop | Function::Kill => {
            match supervisor.stop(id, function == Function::Kill).await {
                Ok(()) => "Process terminated successfully".into_response(),
                Err(err) if matches!(err.kind(), ErrorKind::NotRunning(_)) => {
                    "Process is not running".into_response()
                }
                Err(err) => return Err(err.into()),
            }
        }
        Function::Status => Json(StatusEntry::from(supervisor.status(id)?)).into_response(),
    };

    Ok(response)
}

/// Parses a workload id, anything that is not an integer is a bad request, out of range is not found
fn parse_id(raw: &str, count: usize) -> Result<usize, ApiError> {
    let id = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::validation("invalid id parameter: must be a number"))?;

    usize::try_from(id)
        .ok()
        .filter(|id| *id < count)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "Process ID out of range"))
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    error!("control handler panicked: {}", detail);
    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names() {
        assert_eq!("start".parse::<Function>().unwrap(), Function::Start);
        assert_eq!("stop".parse::<Function>().unwrap(), Function::Stop);
        assert_eq!("end".parse::<Function>().unwrap(), Function::Stop);
        assert_eq!("kill".parse::<Function>().unwrap(), Function::Kill);
        assert_eq!("status".parse::<Function>().unwrap(), Function::Status);
        assert!(matches!(
            "restart".parse::<Function>().unwrap_err().kind(),
            ErrorKind::Validation(_)
        ));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("0", 2).unwrap(), 0);
        assert_eq!(parse_id(" 1 ", 2).unwrap(), 1);
        assert_eq!(parse_id("2", 2).unwrap_err().status, StatusCode::NOT_FOUND);
        assert_eq!(parse_id("-1", 2).unwrap_err().status, StatusCode::NOT_FOUND);
        assert_eq!(parse_id("one", 2).unwrap_err().status, StatusCode::BAD_REQUEST);
        assert_eq!(parse_id("", 2).unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = ApiError::from(Error::from("lock poisoned"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, INTERNAL_ERROR);
    }

    #[test]
    fn test_params_prefer_form() {
        let form = ControlParams {
            function: Some("kill".to_string()),
            id: None,
        };
        let query = ControlParams {
            function: Some("start".to_string()),
            id: Some("3".to_string()),
        };

        let params = form.or(query);
        assert_eq!(params.function.as_deref(), Some("kill"));
        assert_eq!(params.id.as_deref(), Some("3"));
    }
}
