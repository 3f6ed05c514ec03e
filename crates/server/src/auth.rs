//! Client authentication: a single shared secret, presented either as
//! `Authorization: Bearer <token>` or `x-api-key: <token>`.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{HeaderMap, Request, Response, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use tower::{Layer, Service};

#[derive(Clone)]
pub(crate) struct ClientAuthLayer {
    token: Arc<SecretString>,
}

impl ClientAuthLayer {
    pub(crate) fn new(token: SecretString) -> Self {
        Self { token: Arc::new(token) }
    }
}

impl<S> Layer<S> for ClientAuthLayer {
    type Service = ClientAuthService<S>;

    fn layer(&self, next: S) -> Self::Service {
        ClientAuthService {
            next,
            token: self.token.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ClientAuthService<S> {
    next: S,
    token: Arc<SecretString>,
}

impl<S> Service<Request<Body>> for ClientAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let authorized = presented_token(request.headers())
            .is_some_and(|presented| presented == self.token.expose_secret());

        // Use the service that was polled ready; keep the clone for later.
        let clone = self.next.clone();
        let mut next = std::mem::replace(&mut self.next, clone);

        Box::pin(async move {
            if !authorized {
                return Ok(unauthorized());
            }

            next.call(request).await
        })
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(bearer);
    }

    headers.get("x-api-key").and_then(|value| value.to_str().ok())
}

fn unauthorized() -> Response<Body> {
    let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid or missing client token"}}"#;

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use tokio::net::TcpListener;

    async fn spawn_protected() -> String {
        let app = Router::new()
            .route("/protected", get(|| async { "ok" }))
            .layer(ClientAuthLayer::new(SecretString::from("sekrit".to_owned())));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        format!("http://{address}/protected")
    }

    #[tokio::test]
    async fn bearer_and_api_key_headers_are_both_accepted() {
        let url = spawn_protected().await;
        let client = reqwest::Client::new();

        let response = client
            .get(&url)
            .header("Authorization", "Bearer sekrit")
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);

        let response = client
            .get(&url)
            .header("x-api-key", "sekrit")
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn missing_or_wrong_tokens_are_rejected() {
        let url = spawn_protected().await;
        let client = reqwest::Client::new();

        let response = client.get(&url).send().await.expect("request");
        assert_eq!(response.status(), 401);

        let response = client
            .get(&url)
            .header("Authorization", "Bearer wrong")
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 401);

        let body: serde_json::Value = client
            .get(&url)
            .header("x-api-key", "nope")
            .send()
            .await
            .expect("request")
            .json()
            .await
            .expect("error body");
        assert_eq!(body["error"]["type"], "authentication_error");
    }
}
