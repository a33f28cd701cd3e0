//! JSON-RPC over HTTP plumbing shared by the simulated binaries.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use dcrharness_common::protocol::{
    RPC_INVALID_PARAMS, RPC_METHOD_NOT_FOUND, RPC_MISC_ERROR, RpcRequest, RpcResponse,
};
use dcrharness_common::rpc::basic_auth_header;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// JSON-RPC parse error code.
pub const RPC_PARSE_ERROR: i64 = -32700;

/// A JSON-RPC error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
}

impl RpcFault {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: RPC_METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: RPC_INVALID_PARAMS,
            message: message.into(),
        }
    }

    pub fn misc(message: impl Into<String>) -> Self {
        Self {
            code: RPC_MISC_ERROR,
            message: message.into(),
        }
    }
}

/// Method dispatch for one simulated process.
///
/// Handlers are synchronous and may block; the server runs them on the
/// blocking pool.
pub trait RpcHandler: Send + Sync + 'static {
    fn handle(&self, method: &str, params: &[Value]) -> Result<Value, RpcFault>;
}

pub fn param_u64(params: &[Value], index: usize, name: &str) -> Result<u64, RpcFault> {
    params
        .get(index)
        .and_then(Value::as_u64)
        .ok_or_else(|| RpcFault::invalid_params(format!("{name} must be a non-negative integer")))
}

pub fn param_str<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, RpcFault> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcFault::invalid_params(format!("{name} must be a string")))
}

#[derive(Clone)]
struct RpcState {
    handler: Arc<dyn RpcHandler>,
    auth: Arc<str>,
    shutdown: Arc<Notify>,
}

/// Router answering JSON-RPC POSTs on `/`.
///
/// A successful `stop` call fires `shutdown` after the reply is built.
pub fn rpc_router(
    handler: Arc<dyn RpcHandler>,
    user: &str,
    password: &str,
    shutdown: Arc<Notify>,
) -> Router {
    let state = RpcState {
        handler,
        auth: Arc::from(basic_auth_header(user, password)),
        shutdown,
    };
    Router::new().route("/", post(rpc_endpoint)).with_state(state)
}

async fn rpc_endpoint(State(state): State<RpcState>, headers: HeaderMap, body: String) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == &*state.auth);
    if !authorized {
        warn!("Rejected RPC request with bad credentials");
        return (StatusCode::UNAUTHORIZED, "401 Unauthorized").into_response();
    }

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(err) => {
            return axum::Json(RpcResponse::failure(
                0,
                RPC_PARSE_ERROR,
                format!("Parse error: {err}"),
            ))
            .into_response();
        }
    };

    debug!(method = %request.method, id = request.id, "RPC request");
    let handler = Arc::clone(&state.handler);
    let method = request.method.clone();
    let params = request.params;
    let outcome = tokio::task::spawn_blocking(move || handler.handle(&method, &params)).await;

    let response = match outcome {
        Ok(Ok(result)) => {
            if request.method == "stop" {
                info!("Stop requested over RPC");
                state.shutdown.notify_one();
            }
            RpcResponse::success(request.id, result)
        }
        Ok(Err(fault)) => RpcResponse::failure(request.id, fault.code, fault.message),
        Err(err) => RpcResponse::failure(request.id, RPC_MISC_ERROR, format!("handler failed: {err}")),
    };
    axum::Json(response).into_response()
}

/// Serve `router` until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    router: Router,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on an RPC `stop`, SIGTERM or Ctrl-C.
pub async fn shutdown_signal(stop: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = stop.notified() => {}
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// An RPC server on its own thread and runtime, bound to an ephemeral port.
///
/// Lets blocking code talk to a simulated endpoint in-process. Dropping it
/// shuts the server down and joins the thread.
pub struct BackgroundServer {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundServer {
    pub fn start(handler: Arc<dyn RpcHandler>, user: &str, password: &str) -> std::io::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let shutdown = Arc::new(Notify::new());
        let router = rpc_router(handler, user, password, Arc::clone(&shutdown));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        let stop = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name(format!("sim-rpc-{}", addr.port()))
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            warn!("Failed to register listener: {err}");
                            return;
                        }
                    };
                    if let Err(err) = serve(listener, router, async move { stop.notified().await }).await {
                        warn!("Background RPC server failed: {err}");
                    }
                });
            })?;

        Ok(Self {
            addr,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
