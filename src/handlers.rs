use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use bytes::BytesMut;
use tokio_util::io::ReaderStream;
use tracing::error;

use crate::{
    client_ip::ClientIp,
    error::{AppError, TransferError},
    models::{TransferInfoResponse, UploadResponse},
    rate_limit::RateLimitDecision,
    service::{NewUpload, Redemption},
    state::AppState,
    utils::content_disposition,
};

/// Upload a file using multipart/form-data and issue a transfer code.
pub async fn upload_transfer(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let max_file_size = state.service.settings().max_file_size;
    let mut upload: Option<NewUpload> = None;

    // Parse multipart fields
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().map(|s| s.to_string());
        let mime_type = field.content_type().map(|s| s.to_string());

        // Read the file in chunks and stop as soon as it exceeds the ceiling
        let mut content = BytesMut::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if (content.len() + chunk.len()) as u64 > max_file_size {
                error!("Upload exceeds maximum limit of {} bytes", max_file_size);
                return Err(AppError::PayloadTooLarge(format!(
                    "File exceeds maximum limit of {} bytes",
                    max_file_size
                )));
            }
            content.extend_from_slice(&chunk);
        }

        upload = Some(NewUpload {
            original_name,
            mime_type,
            content: content.freeze(),
        });
    }

    // Ensure file exists
    let upload = upload.ok_or_else(|| TransferError::Validation("No file provided".into()))?;

    let issued = state.service.upload(upload).await?;

    Ok(Json(UploadResponse {
        transfer_code: issued.code,
        expires_at: issued.expires_at,
        max_downloads: issued.max_downloads,
    }))
}

/// Redeem a transfer code and stream the file.
pub async fn download_transfer(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let Redemption { file, content, .. } = state.service.redeem(&code).await?;

    // The reader is dropped with the body, whichever way the connection ends
    let mut response = Response::new(Body::from_stream(ReaderStream::new(content)));

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&file.original_name))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    if let Ok(etag) = HeaderValue::from_str(&format!("\"{}\"", file.checksum)) {
        headers.insert(header::ETAG, etag);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok(response)
}

/// Metadata of a redeemable transfer. Does not count as a download.
pub async fn transfer_info(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<TransferInfoResponse>, AppError> {
    let found = state.service.info(&code).await?;
    Ok(Json(found.into()))
}

/// Revoke a transfer before it expires.
pub async fn revoke_transfer(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    state.service.revoke(&code).await?;

    // 204 No Content indicates successful revocation with no response body
    Ok(StatusCode::NO_CONTENT)
}

pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, AppError> {
    state.service.ping().await?;
    Ok("OK")
}

/// Count the attempt against the caller's window before any code lookup happens.
pub async fn limit_redemptions(
    State(state): State<AppState>,
    ClientIp(client): ClientIp,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match state.limiter.check(&client).await {
        RateLimitDecision::Allow => Ok(next.run(request).await),
        RateLimitDecision::Deny { retry_after_secs } => Err(AppError::RateLimited {
            retry_after_secs,
            message: state.limiter.denial_message(retry_after_secs),
        }),
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    error!("Error parsing multipart: {}", e);
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::MultipartError(format!("Failed to parse multipart form: {}", e))
    }
}
