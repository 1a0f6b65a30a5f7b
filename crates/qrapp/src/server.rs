use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use log::{debug, info, warn};
use tokio::net::TcpListener;

use crate::error::AppError;
use crate::render::{RenderError, card_fragment, render_card};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub struct UiState {
    version: String,
}

impl UiState {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

pub fn router(state: Arc<UiState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static", get(index))
        .route("/static/", get(index))
        .route("/static/index.html", get(index))
        .route("/version", get(version))
        .route("/generate", post(generate))
        .with_state(state)
}

/// Bind the UI port, retrying after each delay in `retry_delays_secs`. A
/// freshly relaunched instance can start before its predecessor has released
/// the port.
pub async fn bind_with_retry(
    addr: SocketAddr,
    retry_delays_secs: &[u64],
) -> Result<TcpListener, AppError> {
    let mut last_err = std::io::Error::other("no bind attempts configured");

    for (attempt, &delay_secs) in retry_delays_secs.iter().enumerate() {
        if delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        }

        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(error) => {
                debug!("UI bind attempt {} on {addr} failed: {error}", attempt + 1);
                last_err = error;
            }
        }
    }

    Err(AppError::Bind {
        addr,
        source: last_err,
    })
}

pub async fn serve(listener: TcpListener, state: Arc<UiState>) -> Result<(), AppError> {
    if let Ok(addr) = listener.local_addr() {
        info!("Web server running on http://localhost:{}", addr.port());
    }
    axum::serve(listener, router(state))
        .await
        .map_err(AppError::Serve)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn version(State(state): State<Arc<UiState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.version.clone(),
    )
}

#[derive(Default)]
struct GenerateForm {
    content: String,
    label: String,
    logo: Option<Vec<u8>>,
}

async fn read_form(mut multipart: Multipart) -> Result<GenerateForm, (StatusCode, String)> {
    let mut form = GenerateForm::default();
    let bad_request = |error: axum::extract::multipart::MultipartError| {
        (StatusCode::BAD_REQUEST, error.body_text())
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("content") => form.content = field.text().await.map_err(bad_request)?,
            Some("label") => form.label = field.text().await.map_err(bad_request)?,
            Some("logo") => {
                let bytes = field.bytes().await.map_err(bad_request)?;
                if !bytes.is_empty() {
                    form.logo = Some(bytes.to_vec());
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn generate(multipart: Multipart) -> Result<Html<String>, (StatusCode, String)> {
    let form = read_form(multipart).await?;
    if form.content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "content missing".to_string()));
    }

    let GenerateForm {
        content,
        label,
        logo,
    } = form;
    let rendered = tokio::task::spawn_blocking(move || render_card(&content, logo.as_deref()))
        .await
        .map_err(|error| {
            warn!("QR render task failed: {error}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "render failed".to_string(),
            )
        })?;

    match rendered.and_then(|png| card_fragment(&png, &label)) {
        Ok(fragment) => Ok(Html(fragment)),
        Err(error @ RenderError::Encode(_)) => Err((StatusCode::BAD_REQUEST, error.to_string())),
        Err(error) => {
            warn!("QR render failed: {error}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))
        }
    }
}
