// File relay endpoint

use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
};
use tracing::info;

use crate::{
    error::AppError,
    state::AppState,
    types::{UploadResponse, now_timestamp},
};

const UPLOAD_FIELD: &str = "resume";
const NO_FILE_MESSAGE: &str = "No file uploaded";

struct UploadedFile {
    name: String,
    content: Vec<u8>,
}

pub(crate) async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let multipart = multipart.map_err(|rejection| {
        AppError::bad_request(rejection.body_text()).with_timestamp()
    })?;

    let file = find_upload(multipart)
        .await?
        .ok_or_else(|| AppError::bad_request(NO_FILE_MESSAGE).with_timestamp())?;

    info!(file_name = %file.name, size = file.content.len(), "received upload");

    let location = state
        .uploads
        .relay(&file.name, file.content)
        .await
        .map_err(|error| AppError::remote_store(error).with_timestamp())?;

    Ok(Json(UploadResponse {
        success: true,
        url: location.url().to_owned(),
        timestamp: now_timestamp(),
    }))
}

/// First part named [`UPLOAD_FIELD`] that carries a file name. Other parts
/// are drained and ignored.
async fn find_upload(mut multipart: Multipart) -> Result<Option<UploadedFile>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_upload = field.name() == Some(UPLOAD_FIELD);
        let name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned);

        let (true, Some(name)) = (is_upload, name) else {
            continue;
        };

        let content = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(UploadedFile {
            name,
            content: content.to_vec(),
        }));
    }
    Ok(None)
}

fn multipart_error(error: MultipartError) -> AppError {
    let app_error = if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(error.body_text())
    } else {
        AppError::bad_request(error.body_text())
    };
    app_error.with_timestamp()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::Response,
    };
    use courier_core::memory_store::InjectedFailure;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        router::build_router,
        test_support::{setup_state, setup_state_with, test_config_with},
    };

    const BOUNDARY: &str = "courier-test-boundary";

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/pdf\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(body: Vec<u8>) -> Request<Body> {
        Request::post("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_relays_file_and_returns_url() {
        let (store, state) = setup_state();
        let app = build_router(state).unwrap();

        let body = multipart_body(&[
            ("candidate", None, b"ignored"),
            ("resume", Some("cv final.pdf"), b"%PDF-1.4 resume"),
        ]);
        let response = app.oneshot(upload_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_of(response).await;
        assert_eq!(json["success"], true);
        let url = json["url"].as_str().expect("url");
        assert!(url.starts_with("memory://uploads/"), "unexpected url {url}");
        assert!(url.ends_with("_cv_final.pdf"));
        assert!(json["timestamp"].is_string());

        let path = url.trim_start_matches("memory://");
        assert_eq!(
            store.content(path).await.as_deref(),
            Some(&b"%PDF-1.4 resume"[..])
        );
    }

    #[tokio::test]
    async fn missing_file_part_is_rejected() {
        let (store, state) = setup_state();
        let app = build_router(state).unwrap();

        let body = multipart_body(&[("resume", None, b"not a file")]);
        let response = app.oneshot(upload_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "No file uploaded");
        assert!(json["timestamp"].is_string());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn non_multipart_request_fails_with_success_false() {
        let (_store, state) = setup_state();
        let app = build_router(state).unwrap();

        let response = app
            .oneshot(
                Request::post("/upload")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let config = test_config_with(&[("MAX_UPLOAD_BYTES", "64")]);
        let (store, state) = setup_state_with(config);
        let app = build_router(state).unwrap();

        let body = multipart_body(&[("resume", Some("big.pdf"), &[b'x'; 512])]);
        let response = app.oneshot(upload_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_maps_to_500() {
        let (store, state) = setup_state();
        store.fail_next_write(InjectedFailure::Unavailable).await;
        let app = build_router(state).unwrap();

        let body = multipart_body(&[("resume", Some("a.pdf"), b"data")]);
        let response = app.oneshot(upload_request(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("503"));
        assert!(json["timestamp"].is_string());
    }
}
