// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! HTTP front end: class names and image detection over the detector role.

use crate::errors::SubmitError;
use crate::registry::Registry;
use crate::role::Role;
use anyhow::{Result, anyhow};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

type HttpResponse = Response<BoxBody<Bytes, std::io::Error>>;

const MISMATCH: &str = "Results are not match";
const IMAGE_FIELD: &str = "image";
const ACCEPTABLE_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

pub struct AppState {
    pub registry: Arc<Registry>,
    pub names: Vec<String>,
    pub image_dir: PathBuf,
}

/// A path submitted as JSON instead of an uploaded image.
#[derive(Debug, Deserialize, Serialize)]
struct Guess {
    image: PathBuf,
}

/// An uploaded image, removed from disk when dropped.
struct TempImage(PathBuf);

impl TempImage {
    /// Store `contents` as `yolor_<uuid>_<name>` in `dir`.
    async fn write(dir: &Path, name: &str, contents: &[u8]) -> std::io::Result<Self> {
        let path = dir.join(format!("yolor_{}_{name}", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, contents).await?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            warn!("Failed to remove {}: {e}", self.0.display());
        }
    }
}

/// Why an upload was refused, and whose fault it was.
#[derive(Debug, PartialEq)]
enum Rejection {
    BadRequest(String),
    Internal(String),
}

impl Rejection {
    fn into_response(self) -> Result<HttpResponse> {
        match self {
            Rejection::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, &message),
            Rejection::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
            }
        }
    }
}

/// The single `image` file of a `multipart/form-data` body, as (file name, contents).
async fn multipart_image(content_type: &str, body: Bytes) -> Result<(String, Bytes), Rejection> {
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Rejection::BadRequest(format!("Invalid multipart form: {e}")))?;
    let mut multipart = multer::Multipart::with_reader(std::io::Cursor::new(body), boundary);

    let mut image: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Rejection::BadRequest(format!("Invalid multipart form: {e}")))?
    {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let contents = field.bytes().await.map_err(|e| {
            Rejection::Internal(format!("Unable to open this multipart file: {e}"))
        })?;
        if image.replace((file_name, contents)).is_some() {
            return Err(Rejection::BadRequest(
                "Only one image is acceptable".to_string(),
            ));
        }
    }

    let (file_name, contents) =
        image.ok_or_else(|| Rejection::BadRequest("No image found".to_string()))?;
    let base_name = acceptable_name(&file_name).ok_or_else(|| {
        Rejection::BadRequest(format!(
            "File {file_name} is not acceptable, expected {ACCEPTABLE_EXTENSIONS:?}"
        ))
    })?;
    Ok((base_name, contents))
}

/// The final component of `file_name` if its extension is accepted.
fn acceptable_name(file_name: &str) -> Option<String> {
    let base = Path::new(file_name).file_name()?.to_str()?;
    let extension = Path::new(base).extension()?.to_str()?;
    ACCEPTABLE_EXTENSIONS
        .contains(&format!(".{extension}").as_str())
        .then(|| base.to_string())
}

/// Accept connections on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                let (stream, peer) = accept_result?;
                debug!("connection from {peer}");
                let io = TokioIo::new(stream);
                let state = Arc::clone(&state);

                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move {
                            Ok::<_, anyhow::Error>(
                                handle_request(req, &state)
                                    .await
                                    .unwrap_or_else(|e| {
                                        error!("Request handling failed: {e}");
                                        internal_error()
                                    }),
                            )
                        }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection: {err}");
                    }
                });
            }
            _ = shutdown.cancelled() => {
                info!("HTTP server stopped");
                return Ok(());
            }
        }
    }
}

pub async fn handle_request<B>(req: Request<B>, state: &AppState) -> Result<HttpResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    match (req.method(), req.uri().path()) {
        (&Method::OPTIONS, _) => preflight(),
        (&Method::GET, "/names") => json_response(StatusCode::OK, &state.names),
        (&Method::POST, "/predicate") => {
            info!("Handling /predicate request");
            handle_predicate(req, state).await
        }
        _ => {
            info!(
                "{} Request to unknown endpoint: {}",
                req.method(),
                req.uri().path()
            );
            error_response(StatusCode::NOT_FOUND, "Not found")
        }
    }
}

async fn handle_predicate<B>(req: Request<B>, state: &AppState) -> Result<HttpResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let raw_content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let media_type = raw_content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let body = match req.collect().await {
        Ok(body) => body.to_bytes(),
        Err(e) => {
            error!("Failed to read request body: {e}");
            return error_response(StatusCode::BAD_REQUEST, "Unable to read request body");
        }
    };
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Empty request body");
    }

    let (name, contents) = match media_type.as_str() {
        "multipart/form-data" => match multipart_image(&raw_content_type, body).await {
            Ok(upload) => upload,
            Err(rejection) => {
                warn!("Rejected upload: {rejection:?}");
                return rejection.into_response();
            }
        },
        "application/json" => {
            let guess: Guess = match serde_json::from_slice(&body) {
                Ok(guess) => guess,
                Err(e) => {
                    error!("Failed to parse JSON body: {e}");
                    return error_response(StatusCode::BAD_REQUEST, &format!("Invalid body: {e}"));
                }
            };
            return predicate(state, &guess.image).await;
        }
        "image/jpeg" => ("upload.jpg".to_string(), body),
        "image/png" => ("upload.png".to_string(), body),
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Unsupported content type: {other:?}"),
            );
        }
    };

    let image = match TempImage::write(&state.image_dir, &name, &contents).await {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to store uploaded image: {e}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Unable to create temp file: {e}"),
            );
        }
    };
    predicate(state, image.path()).await
}

async fn predicate(state: &AppState, image: &Path) -> Result<HttpResponse> {
    match state.registry.submit(Role::Detector, image).await {
        Ok(detections) => {
            info!("{} detection(s) in {}", detections.len(), image.display());
            json_response(StatusCode::OK, &detections)
        }
        Err(e) => {
            warn!("Prediction failed for {}: {e}", image.display());
            let message = match &e {
                SubmitError::Protocol(_) => MISMATCH.to_string(),
                other => other.to_string(),
            };
            error_response(status_for(&e), &message)
        }
    }
}

fn status_for(err: &SubmitError) -> StatusCode {
    match err {
        SubmitError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
        SubmitError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        SubmitError::UnknownRole(_)
        | SubmitError::NotRunning
        | SubmitError::ProcessExited
        | SubmitError::ShuttingDown
        | SubmitError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Result<HttpResponse> {
    let body = serde_json::to_vec(value).unwrap_or_else(|e| {
        error!("Failed to serialize response: {e}");
        b"Internal server error".to_vec()
    });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(body.into()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build response: {}", e))
}

fn error_response(status: StatusCode, message: &str) -> Result<HttpResponse> {
    json_response(status, &json!({ "error": message }))
}

fn preflight() -> Result<HttpResponse> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Full::new(Bytes::new()).map_err(|e| match e {}).boxed())
        .map_err(|e| anyhow!("Failed to build preflight response: {}", e))
}

fn internal_error() -> HttpResponse {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(
            Full::new(Bytes::from(&b"Internal Server Error"[..]))
                .map_err(|e| match e {})
                .boxed(),
        )
        .unwrap_or_else(|_| {
            Response::new(
                Full::new(Bytes::from(&b"Error"[..]))
                    .map_err(|e| match e {})
                    .boxed(),
            )
        })
}
