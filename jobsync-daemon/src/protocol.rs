use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobsync_core::OperationKind;
use jobsync_sync::{OperationSnapshot, OrchestratorError, WorkspaceInfo};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
    /// Operation kind for `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Finished validation run feeding an import or delete `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_id: Option<String>,
    /// Operation id for `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl DaemonRequest {
    pub fn new(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            ..Self::default()
        }
    }
}

/// Machine-readable reason attached to a failed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Conflict,
    NotFound,
    NotReady,
    BadRequest,
    Internal,
}

impl ErrorCode {
    pub fn of(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::Conflict { .. } => Self::Conflict,
            OrchestratorError::NotFound { .. } => Self::NotFound,
            OrchestratorError::NotReady { .. } | OrchestratorError::NoBatch { .. } => {
                Self::NotReady
            }
            OrchestratorError::NotAValidation { .. } | OrchestratorError::NoBatchInput { .. } => {
                Self::BadRequest
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "conflict",
            Self::NotFound => "not_found",
            Self::NotReady => "not_ready",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            code: Some(code),
        }
    }

    pub fn rejected(err: &OrchestratorError) -> Self {
        Self::error(ErrorCode::of(err), err.to_string())
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: DaemonResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Liveness check. Retries briefly so it can be used right after spawning
/// the daemon.
pub fn request_ping(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new("ping");

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon ping retry loop exited unexpectedly".to_string())
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Started {
    operation_id: String,
}

/// Start an operation; returns its id.
pub fn request_start(
    home: &Path,
    kind: OperationKind,
    validation_id: Option<String>,
) -> Result<String, DaemonError> {
    let request = DaemonRequest {
        kind: Some(kind.to_string()),
        validation_id,
        ..DaemonRequest::new("start")
    };
    let started: Started = request_data(home, &request)?;
    Ok(started.operation_id)
}

pub fn request_status(home: &Path, id: &str) -> Result<OperationSnapshot, DaemonError> {
    let request = DaemonRequest {
        id: Some(id.to_string()),
        ..DaemonRequest::new("status")
    };
    request_data(home, &request)
}

pub fn request_list(home: &Path) -> Result<Vec<OperationSnapshot>, DaemonError> {
    request_data(home, &DaemonRequest::new("list"))
}

pub fn request_info(home: &Path) -> Result<WorkspaceInfo, DaemonError> {
    request_data(home, &DaemonRequest::new("info"))
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new("stop"))?;
    response_into_data(response).map(|_| ())
}

fn request_data<T: DeserializeOwned>(
    home: &Path,
    request: &DaemonRequest,
) -> Result<T, DaemonError> {
    let data = response_into_data(send_request(home, request)?)?;
    Ok(serde_json::from_value(data)?)
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Rejected {
            code: response.code.unwrap_or(ErrorCode::Internal),
            message: response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        })
    }
}
