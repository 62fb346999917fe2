use std::{any::Any, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use server_api::{get_chats, get_status, manual_reconnect, send_message, ApiContext};
use session_core::ControllerHandle;
use session_integration::{bridge::BridgeConnector, LogQrDisplay};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{
        ChatsResponse, NotFoundResponse, ReconnectResponse, SendMessageRequest,
        SendMessageResponse, StatusResponse,
    },
};
use tower_http::{
    catch_panic::CatchPanicLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, Settings};

const MAX_BODY_BYTES: usize = 64 * 1024;

type HttpError = (StatusCode, Json<ApiError>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let connector = BridgeConnector::new(settings.bridge_config()?);
    let controller = ControllerHandle::spawn(
        settings.controller_config(),
        Arc::new(connector),
        Arc::new(LogQrDisplay),
    );
    let api = ApiContext::new(controller.clone(), settings.phone_normalizer());
    let app = build_router(Arc::new(AppState { api }));

    tokio::spawn({
        let controller = controller.clone();
        async move {
            if let Err(error) = controller.initialize().await {
                warn!(%error, "initial session start failed; retrying in the background");
            }
        }
    });

    match serve(&settings, app).await {
        Ok(()) => {
            info!("shutdown signal received; destroying session");
            controller.destroy().await;
            info!("gateway stopped");
            Ok(())
        }
        Err(error) => {
            error!(error = %format!("{error:#}"), "gateway server failed");
            controller.destroy().await;
            warn!(delay = ?settings.crash_exit_delay, "delaying exit to avoid a crash loop");
            tokio::time::sleep(settings.crash_exit_delay).await;
            std::process::exit(1);
        }
    }
}

async fn serve(settings: &Settings, app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = settings
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server stopped unexpectedly")
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler; only Ctrl+C stops the gateway");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(api_description))
        .route("/api/status", get(http_status))
        .route("/api/send-message", post(http_send_message))
        .route("/api/chats", get(http_chats))
        .route("/api/reconnect", post(http_reconnect))
        .fallback(not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation | ErrorCode::UnregisteredRecipient | ErrorCode::ReconnectInProgress => {
            StatusCode::BAD_REQUEST
        }
        ErrorCode::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::SessionTransport | ErrorCode::MaxAttemptsExceeded | ErrorCode::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn http_error(err: ApiError) -> HttpError {
    (status_for(err.code), Json(err))
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    error!("request handler panicked");
    http_error(ApiError::new(
        ErrorCode::Internal,
        "the server failed to handle the request",
    ))
    .into_response()
}

async fn api_description() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Messaging Session Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "HTTP gateway for sending messages through a linked messaging session",
        "endpoints": {
            "status": "GET /api/status - session connection status",
            "send_message": "POST /api/send-message - send a text message",
            "get_chats": "GET /api/chats - list chats",
            "reconnect": "POST /api/reconnect - manual reconnect"
        },
        "usage": {
            "send_message": {
                "method": "POST",
                "url": "/api/send-message",
                "body": {
                    "phone": "628123456789",
                    "message": "Hello from the gateway!"
                }
            }
        }
    }))
}

async fn http_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse::from_status(get_status(&state.api), Utc::now()))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, HttpError> {
    let Json(req) = body.map_err(|rejection| {
        http_error(ApiError::new(ErrorCode::Validation, rejection.body_text()))
    })?;
    let outcome = send_message(&state.api, req.phone.as_deref(), req.message.as_deref())
        .await
        .map_err(http_error)?;
    Ok(Json(SendMessageResponse {
        success: true,
        data: outcome.into(),
        message: "message sent".into(),
    }))
}

async fn http_chats(State(state): State<Arc<AppState>>) -> Result<Json<ChatsResponse>, HttpError> {
    let chats = get_chats(&state.api).await.map_err(http_error)?;
    Ok(Json(ChatsResponse {
        success: true,
        count: chats.len(),
        data: chats,
    }))
}

async fn http_reconnect(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReconnectResponse>, HttpError> {
    manual_reconnect(&state.api).await.map_err(http_error)?;
    Ok(Json(ReconnectResponse {
        success: true,
        message: "reconnect started".into(),
    }))
}

async fn not_found(uri: Uri) -> (StatusCode, Json<NotFoundResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(NotFoundResponse {
            error: ErrorCode::NotFound.summary().to_string(),
            path: uri.path().to_string(),
        }),
    )
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
