use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use jobsync_core::{config, OperationKind, Settings};
use jobsync_sync::{DirectoryStore, Orchestrator, StartRequest};

use crate::error::{io_err, DaemonError};
use crate::paths::{jobsync_root, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, ErrorCode};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Load settings for `home` and serve a directory-backed orchestrator.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let settings = config::load_at(&home)?;
    ensure_runtime_dirs(&home, &settings)?;
    tracing::info!(
        store_root = %settings.store_root.display(),
        source_folder = settings.source_folder.as_deref().unwrap_or("<unset>"),
        num_threads = settings.num_threads,
        "daemon starting"
    );

    let store = Arc::new(DirectoryStore::new(settings.store_root.clone()));
    let orchestrator = Arc::new(Orchestrator::new(store, settings));
    serve(home, orchestrator).await
}

/// Serve `orchestrator` on the daemon socket until `stop` or ctrl-c.
pub async fn serve(home: PathBuf, orchestrator: Arc<Orchestrator>) -> Result<(), DaemonError> {
    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                orchestrator,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let root = jobsync_root(&home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }

    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let orchestrator = orchestrator.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        orchestrator,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(
                        ErrorCode::BadRequest,
                        format!("invalid request JSON: {err}"),
                    ),
                )
                .await?;
                continue;
            }
        };

        let response = handle_request(&orchestrator, &request, &shutdown_tx, started_at_unix).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

/// Answer one request against the orchestrator.
pub(crate) async fn handle_request(
    orchestrator: &Orchestrator,
    request: &DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
    started_at_unix: u64,
) -> DaemonResponse {
    tracing::debug!(cmd = %request.cmd, "daemon request");
    match request.cmd.as_str() {
        "ping" => DaemonResponse::ok(json!({
            "running": true,
            "pid": std::process::id(),
            "started_at_unix": started_at_unix,
        })),
        "start" => start_operation(orchestrator, request).await,
        "status" => {
            let Some(id) = request.id.as_deref() else {
                return DaemonResponse::error(ErrorCode::BadRequest, "status requires an id");
            };
            match orchestrator.poll(id).await {
                Ok(snapshot) => data(&snapshot),
                Err(err) => DaemonResponse::rejected(&err),
            }
        }
        "list" => data(&orchestrator.list().await),
        "info" => match orchestrator.workspace_info().await {
            Ok(info) => data(&info),
            Err(err) => {
                tracing::error!(error = %err, "workspace info failed");
                DaemonResponse::error(ErrorCode::Internal, err.to_string())
            }
        },
        "stop" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(ErrorCode::BadRequest, format!("unknown command '{other}'")),
    }
}

async fn start_operation(orchestrator: &Orchestrator, request: &DaemonRequest) -> DaemonResponse {
    let Some(kind) = request.kind.as_deref() else {
        return DaemonResponse::error(ErrorCode::BadRequest, "start requires a kind");
    };
    let kind = match kind.parse::<OperationKind>() {
        Ok(kind) => kind,
        Err(message) => return DaemonResponse::error(ErrorCode::BadRequest, message),
    };

    let started = match (kind, request.validation_id.as_deref()) {
        (_, Some(validation_id)) => orchestrator.start_from_validation(kind, validation_id).await,
        (OperationKind::Validate, None) => orchestrator.start(StartRequest::Validate).await,
        (OperationKind::Export, None) => orchestrator.start(StartRequest::Export).await,
        (OperationKind::Import | OperationKind::Delete, None) => {
            return DaemonResponse::error(
                ErrorCode::BadRequest,
                format!("{kind} requires a validation_id"),
            );
        }
    };
    match started {
        Ok(id) => DaemonResponse::ok(json!({ "operationId": id })),
        Err(err) => {
            tracing::warn!(%kind, error = %err, "start rejected");
            DaemonResponse::rejected(&err)
        }
    }
}

fn data<T: Serialize>(value: &T) -> DaemonResponse {
    match serde_json::to_value(value) {
        Ok(value) => DaemonResponse::ok(value),
        Err(err) => DaemonResponse::error(ErrorCode::Internal, err.to_string()),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path, settings: &Settings) -> Result<(), DaemonError> {
    for dir in [jobsync_root(home), settings.work_dir.clone(), settings.store_root.clone()] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
