//! Viewers over real HTTP against a fake capture stream

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;

use webcam_streamer::broadcast::BroadcastConfig;
use webcam_streamer::codec::{PartEncoder, STREAM_CONTENT_TYPE};
use webcam_streamer::config::{DeviceConfig, Resolution, Rotation};
use webcam_streamer::server::ServerConfig;
use webcam_streamer::{DeviceContext, Frame, FrameBroadcaster, StreamServer};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    addr: SocketAddr,
    broadcaster: FrameBroadcaster,
    capture: DuplexStream,
    shutdown: CancellationToken,
}

async fn start() -> Harness {
    let (capture, reader) = tokio::io::duplex(1024 * 1024);
    let broadcaster = FrameBroadcaster::spawn("e2e", reader, BroadcastConfig::default());

    let device = Arc::new(DeviceConfig {
        name: "e2e".to_string(),
        device: "/dev/video0".to_string(),
        port: 0,
        resolution: Resolution {
            width: 640,
            height: 480,
        },
        framerate: 30,
        rotation: Rotation::None,
        quality: 80,
        input_format: "mjpeg".to_string(),
    });
    let ctx = DeviceContext::new(device, broadcaster.clone());
    let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap());
    let server = StreamServer::bind(config, ctx).await.unwrap();
    let addr = server.local_addr();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(server.run_until(async move { signal.cancelled().await }));

    Harness {
        addr,
        broadcaster,
        capture,
        shutdown,
    }
}

/// A part as ffmpeg writes it
fn capture_part(payload: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "--ffmpeg\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    )
    .into_bytes();
    out.extend_from_slice(payload);
    out.extend_from_slice(b"\r\n");
    out
}

/// The same payload as a viewer must see it
fn wire_part(payload: &[u8]) -> Bytes {
    PartEncoder::part(&Frame::new(0, payload.to_vec()))
}

async fn read_exact<S>(stream: &mut S, buf: &mut BytesMut, len: usize) -> Bytes
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    tokio::time::timeout(WAIT, async {
        while buf.len() < len {
            let chunk = stream
                .next()
                .await
                .expect("stream ended early")
                .expect("stream failed");
            buf.extend_from_slice(&chunk);
        }
    })
    .await
    .expect("timed out waiting for stream data");

    buf.split_to(len).freeze()
}

async fn open_stream(addr: SocketAddr) -> reqwest::Response {
    let response = reqwest::get(format!("http://{addr}/stream")).await.unwrap();
    assert_eq!(response.status(), 200);
    response
}

#[tokio::test]
async fn test_viewers_receive_frames_published_after_joining() {
    let mut h = start().await;

    let frame_a = vec![b'A'; 100];
    let frame_b = vec![b'B'; 100];
    let frame_c = vec![b'C'; 100];

    let first = open_stream(h.addr).await;
    assert_eq!(
        first.headers()["content-type"].to_str().unwrap(),
        STREAM_CONTENT_TYPE
    );
    assert_eq!(first.headers()["cache-control"].to_str().unwrap(), "no-cache");
    let mut first = Box::pin(first.bytes_stream());
    let mut first_buf = BytesMut::new();

    h.capture.write_all(&capture_part(&frame_a)).await.unwrap();
    let got = read_exact(&mut first, &mut first_buf, wire_part(&frame_a).len()).await;
    assert_eq!(got, wire_part(&frame_a));

    // Joins after A was published
    let mut second = Box::pin(open_stream(h.addr).await.bytes_stream());
    let mut second_buf = BytesMut::new();
    assert_eq!(h.broadcaster.subscriber_count(), 2);

    h.capture.write_all(&capture_part(&frame_b)).await.unwrap();
    let got = read_exact(&mut first, &mut first_buf, wire_part(&frame_b).len()).await;
    assert_eq!(got, wire_part(&frame_b));
    let got = read_exact(&mut second, &mut second_buf, wire_part(&frame_b).len()).await;
    assert_eq!(got, wire_part(&frame_b));
    assert!(second_buf.is_empty());

    // Second viewer leaves
    drop(second);

    h.capture.write_all(&capture_part(&frame_c)).await.unwrap();
    let got = read_exact(&mut first, &mut first_buf, wire_part(&frame_c).len()).await;
    assert_eq!(got, wire_part(&frame_c));

    // End of capture closes the remaining viewer
    drop(h.capture);
    let rest = tokio::time::timeout(WAIT, async {
        let mut rest = first_buf.to_vec();
        while let Some(chunk) = first.next().await {
            match chunk {
                Ok(chunk) => rest.extend_from_slice(&chunk),
                Err(_) => break,
            }
        }
        rest
    })
    .await
    .expect("stream did not end");
    assert!(rest.is_empty());

    h.shutdown.cancel();
}

#[tokio::test]
async fn test_index_and_not_found() {
    let h = start().await;

    let index = reqwest::get(format!("http://{}/", h.addr)).await.unwrap();
    assert_eq!(index.status(), 200);
    assert!(index.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = index.text().await.unwrap();
    assert!(html.contains("<h1>e2e</h1>"));
    assert!(html.contains("<img src=\"/stream\""));

    let page = reqwest::get(format!("http://{}/index.html", h.addr)).await.unwrap();
    assert_eq!(page.status(), 200);

    let missing = reqwest::get(format!("http://{}/favicon.ico", h.addr)).await.unwrap();
    assert_eq!(missing.status(), 404);

    h.shutdown.cancel();
}

#[tokio::test]
async fn test_stream_unavailable_once_capture_ends() {
    let h = start().await;
    drop(h.capture);
    tokio::time::timeout(WAIT, h.broadcaster.stopped()).await.unwrap();

    let response = reqwest::get(format!("http://{}/stream", h.addr)).await.unwrap();
    assert_eq!(response.status(), 503);

    // Page still works
    let index = reqwest::get(format!("http://{}/", h.addr)).await.unwrap();
    assert_eq!(index.status(), 200);

    h.shutdown.cancel();
}
