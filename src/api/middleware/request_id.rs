use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use uuid::Uuid;

/// Attach an `x-request-id` to every request/response pair for log
/// correlation, preserving one supplied by an upstream proxy.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert("x-request-id", value.clone());
        let mut res = next.run(req).await;
        res.headers_mut().insert("x-request-id", value);
        res
    } else {
        next.run(req).await
    }
}
