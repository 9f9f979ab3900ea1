use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Multipart, Path},
    http::{header, StatusCode},
    response::Response,
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    infrastructure::{auth::AuthenticatedUser, state::AppState},
    services::{attachments::AttachmentService, errors::ServiceError},
};

pub fn router() -> Router {
    // POST binds a new file to the request id, GET serves an attachment id.
    Router::new().route("/:id", post(upload).get(download))
}

async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(request_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let service = AttachmentService::new(state);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| to_response(ServiceError::Validation(err.to_string())))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("attachment").to_owned();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_owned();
        let data = field
            .bytes()
            .await
            .map_err(|err| to_response(ServiceError::Validation(err.to_string())))?;

        let attachment = service
            .upload(&user, request_id, &file_name, &content_type, data)
            .await
            .map_err(to_response)?;
        return Ok(Json(serde_json::json!({ "attachment": attachment })));
    }

    Err(to_response(ServiceError::Validation(
        "multipart field 'file' is required".into(),
    )))
}

async fn download(
    Extension(state): Extension<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let service = AttachmentService::new(state);
    let (attachment, data) = service.download(&user, id).await.map_err(to_response)?;

    Response::builder()
        .header(header::CONTENT_TYPE, attachment.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                attachment.file_name.replace('"', "")
            ),
        )
        .body(Body::from(data))
        .map_err(|err| to_response(ServiceError::Internal(err.to_string())))
}

fn to_response(err: ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    (
        err.status_code(),
        Json(serde_json::json!({ "error": err.to_string() })),
    )
}
