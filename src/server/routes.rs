//! HTTP routes for one device
//!
//! - `GET /`, `GET /index.html`: viewer page
//! - `GET /stream`: multipart MJPEG stream
//! - anything else: 404

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;

use super::page;
use crate::broadcast::FrameBroadcaster;
use crate::codec::{PartEncoder, STREAM_CONTENT_TYPE};
use crate::config::DeviceConfig;

/// Everything a device's handlers need
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub device: Arc<DeviceConfig>,
    pub broadcaster: FrameBroadcaster,
}

impl DeviceContext {
    pub fn new(device: Arc<DeviceConfig>, broadcaster: FrameBroadcaster) -> Self {
        Self {
            device,
            broadcaster,
        }
    }
}

/// Build the router serving one device
pub fn build_router(ctx: DeviceContext) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/index.html", get(index))
        .route("/stream", get(stream))
        .fallback(not_found)
        .with_state(ctx)
}

async fn index(State(ctx): State<DeviceContext>) -> Html<String> {
    Html(page::render(&ctx.device))
}

/// Subscribe and write every frame as one multipart part until the
/// broadcaster closes or the viewer goes away
async fn stream(State(ctx): State<DeviceContext>) -> Response {
    let subscription = match ctx.broadcaster.subscribe().await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(device = %ctx.device.name, error = %e, "Rejecting stream request");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    tracing::debug!(
        device = %ctx.device.name,
        subscriber = subscription.id(),
        "Viewer connected"
    );

    let parts = subscription
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(PartEncoder::part(&frame)));

    (
        [
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "close"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::Request;
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;

    use super::*;
    use crate::broadcast::BroadcastConfig;
    use crate::codec::Frame;
    use crate::config::{Resolution, Rotation};

    fn device() -> Arc<DeviceConfig> {
        Arc::new(DeviceConfig {
            name: "porch".to_string(),
            device: "/dev/video0".to_string(),
            port: 0,
            resolution: Resolution {
                width: 640,
                height: 480,
            },
            framerate: 15,
            rotation: Rotation::None,
            quality: 80,
            input_format: "mjpeg".to_string(),
        })
    }

    fn context() -> (DeviceContext, tokio::io::DuplexStream) {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let broadcaster = FrameBroadcaster::spawn("porch", reader, BroadcastConfig::default());
        (DeviceContext::new(device(), broadcaster), writer)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("Failed to build request")
    }

    #[test]
    fn test_context_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<DeviceContext>();
    }

    #[tokio::test]
    async fn test_index_routes() {
        let (ctx, _writer) = context();

        for uri in ["/", "/index.html"] {
            let response = build_router(ctx.clone())
                .oneshot(get_request(uri))
                .await
                .expect("Failed to execute request");

            assert_eq!(response.status(), StatusCode::OK);
            let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
            assert!(content_type.starts_with("text/html"));

            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let html = String::from_utf8(body.to_vec()).unwrap();
            assert!(html.contains("<h1>porch</h1>"));
            assert!(html.contains("<img src=\"/stream\""));
        }
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (ctx, _writer) = context();

        let response = build_router(ctx)
            .oneshot(get_request("/snapshot.jpg"))
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_headers_and_first_part() {
        let (ctx, mut writer) = context();
        let broadcaster = ctx.broadcaster.clone();

        let response = build_router(ctx)
            .oneshot(get_request("/stream"))
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], STREAM_CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "close");
        assert_eq!(broadcaster.subscriber_count(), 1);

        writer
            .write_all(b"--ffmpeg\r\nContent-Length: 4\r\n\r\njpeg\r\n")
            .await
            .unwrap();

        let mut body = response.into_body().into_data_stream();
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(chunk, PartEncoder::part(&Frame::new(0, &b"jpeg"[..])));

        // Viewer goes away
        drop(body);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_unavailable_after_stop() {
        let (ctx, _writer) = context();
        ctx.broadcaster.stop();
        ctx.broadcaster.stopped().await;

        let response = build_router(ctx)
            .oneshot(get_request("/stream"))
            .await
            .expect("Failed to execute request");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
