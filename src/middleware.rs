//! Request guards. Identity is asserted by the API gateway in front of this
//! service through `x-user-id` and `x-user-role`.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::app_error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Admin user id, inserted as a request extension by [`admin_authorization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminId(pub i32);

fn caller(headers: &HeaderMap) -> Option<(i32, String)> {
    let id = headers.get(USER_ID_HEADER)?.to_str().ok()?.trim().parse().ok()?;
    let role = headers
        .get(USER_ROLE_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .to_ascii_lowercase();
    Some((id, role))
}

pub async fn admin_authorization(mut req: Request, next: Next) -> Response {
    match caller(req.headers()) {
        Some((id, role)) if role == "admin" => {
            req.extensions_mut().insert(AdminId(id));
            next.run(req).await
        }
        Some((id, role)) => {
            tracing::debug!(user_id = id, role = %role, "Non-admin hit an admin route");
            AppError::ForbiddenResource("Admin role required".into()).into_response()
        }
        None => (StatusCode::UNAUTHORIZED, "Missing caller identity").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::HeaderValue,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn guarded() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(AdminId(id)): Extension<AdminId>| async move { id.to_string() }),
            )
            .route_layer(axum::middleware::from_fn(admin_authorization))
    }

    async fn call(headers: &[(&'static str, &'static str)]) -> (StatusCode, String) {
        let mut request = axum::http::Request::builder().uri("/");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = guarded()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn admin_reaches_the_handler_with_its_id() {
        let (status, body) = call(&[(USER_ID_HEADER, "3"), (USER_ROLE_HEADER, "admin")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "3");
    }

    #[tokio::test]
    async fn other_roles_are_forbidden() {
        let (status, _) = call(&[(USER_ID_HEADER, "3"), (USER_ROLE_HEADER, "seller")]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn anonymous_callers_are_unauthorized() {
        let (status, _) = call(&[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn caller_reads_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" 7 "));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("Admin"));
        assert_eq!(caller(&headers), Some((7, "admin".to_string())));
    }

    #[test]
    fn caller_requires_numeric_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("seven"));
        headers.insert(USER_ROLE_HEADER, HeaderValue::from_static("admin"));
        assert_eq!(caller(&headers), None);
    }
}
