//! Multipart part encoder for the viewer-facing stream
//!
//! Every frame is written as:
//!
//! ```text
//! --jpgboundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n\r\n
//! <N bytes of frame payload>\r\n
//! ```

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use super::frame::Frame;

/// Boundary token announced in the response Content-Type
pub const BOUNDARY: &str = "--jpgboundary";

/// Content-Type of the `/stream` response
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--jpgboundary";

/// Content-Type of each part
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Encodes frames as multipart parts
#[derive(Debug, Default, Clone, Copy)]
pub struct PartEncoder;

impl PartEncoder {
    /// Encode a single frame into a standalone buffer
    pub fn part(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        // Writing into a BytesMut cannot fail
        let _ = PartEncoder.encode(frame, &mut buf);
        buf.freeze()
    }
}

impl<'a> Encoder<&'a Frame> for PartEncoder {
    type Error = io::Error;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let header = format!(
            "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            PART_CONTENT_TYPE,
            frame.len()
        );

        dst.reserve(header.len() + frame.len() + 2);
        dst.put_slice(header.as_bytes());
        dst.put_slice(&frame.data);
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
