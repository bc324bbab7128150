use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// JSON body extractor whose rejections use the API's `{"message", "status"}` shape.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| AppJson(value))
            .map_err(rejection_response)
    }
}

fn rejection_response(rejection: JsonRejection) -> Response {
    let message = format!("Invalid request body: {}", rejection.body_text());
    tracing::warn!("{}", message);
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "message": message,
            "status": 400
        })),
    )
        .into_response()
}
