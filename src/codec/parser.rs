//! Multipart frame parser
//!
//! Splits the byte stream written by the capture process into frames. The
//! stream is a sequence of parts shaped like:
//!
//! ```text
//! --ffmpeg\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 5120\r\n
//! \r\n
//! <5120 bytes of JPEG data>\r\n
//! ```
//!
//! The parser is a small state machine:
//!
//! ```text
//!   SeekingBoundary ──"--..." line──► ReadingHeaders ──blank line──► ReadingBody
//!         ▲                                 │                            │
//!         └──── malformed header block ─────┘                            │
//!         └──────────────── Content-Length bytes read ───────────────────┘
//! ```
//!
//! It owns no I/O. It implements [`Decoder`] so it can be driven by
//! `FramedRead` over any `AsyncRead`, or fed a `BytesMut` by hand.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use super::frame::Frame;

/// Default upper bound for a single frame payload (16MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Longest header or boundary line the parser will buffer
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Reason a part was skipped without producing a frame
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedFrame {
    /// Header block ended without a Content-Length header
    #[error("part headers carry no Content-Length")]
    MissingContentLength,
    /// Content-Length was not a positive integer
    #[error("invalid Content-Length value {0:?}")]
    InvalidContentLength(String),
    /// Content-Length is above the configured limit
    #[error("frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge { length: u64, max: usize },
    /// A header line grew past [`MAX_LINE_LENGTH`]
    #[error("header line longer than {0} bytes")]
    HeaderTooLong(usize),
}

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Discarding lines until a boundary marker
    SeekingBoundary,
    /// Collecting `key: value` lines until a blank line
    ReadingHeaders,
    /// Waiting for `length` payload bytes
    ReadingBody { length: usize },
}

/// Multipart frame parser
#[derive(Debug)]
pub struct FrameParser {
    state: ParserState,
    /// Content-Length seen in the current header block
    content_length: Option<Result<u64, MalformedFrame>>,
    /// Set after an overlong line was dropped mid-way; the rest of it is skipped
    discarding_line: bool,
    max_frame_size: usize,
    next_sequence: u64,
    malformed_frames: u64,
}

impl FrameParser {
    /// Create a parser with the default frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a parser with a custom frame size limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            state: ParserState::SeekingBoundary,
            content_length: None,
            discarding_line: false,
            max_frame_size,
            next_sequence: 0,
            malformed_frames: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Number of frames produced so far
    pub fn frames_parsed(&self) -> u64 {
        self.next_sequence
    }

    /// Number of parts skipped as malformed
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames
    }

    fn skip_malformed(&mut self, reason: MalformedFrame) {
        tracing::warn!(error = %reason, "Skipping malformed frame");
        self.malformed_frames += 1;
        self.content_length = None;
        self.state = ParserState::SeekingBoundary;
    }

    fn seek_boundary(&mut self, src: &mut BytesMut) -> bool {
        loop {
            let Some(line) = take_line(src) else {
                if src.len() > MAX_LINE_LENGTH {
                    src.clear();
                    self.discarding_line = true;
                }
                return false;
            };

            if std::mem::take(&mut self.discarding_line) {
                continue;
            }

            if is_boundary(&line) {
                self.content_length = None;
                self.state = ParserState::ReadingHeaders;
                return true;
            }
        }
    }

    fn read_headers(&mut self, src: &mut BytesMut) -> bool {
        loop {
            let Some(line) = take_line(src) else {
                if src.len() > MAX_LINE_LENGTH {
                    src.clear();
                    self.discarding_line = true;
                    self.skip_malformed(MalformedFrame::HeaderTooLong(MAX_LINE_LENGTH));
                    return true;
                }
                return false;
            };

            let text = String::from_utf8_lossy(strip_terminator(&line));
            if text.trim().is_empty() {
                self.finish_headers();
                return true;
            }

            if let Some((key, value)) = text.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    self.content_length = Some(parse_content_length(value));
                }
            }
        }
    }

    fn finish_headers(&mut self) {
        match self.content_length.take() {
            Some(Ok(length)) if length > self.max_frame_size as u64 => {
                self.skip_malformed(MalformedFrame::FrameTooLarge {
                    length,
                    max: self.max_frame_size,
                });
            }
            Some(Ok(length)) => {
                self.state = ParserState::ReadingBody {
                    length: length as usize,
                };
            }
            Some(Err(reason)) => self.skip_malformed(reason),
            None => self.skip_malformed(MalformedFrame::MissingContentLength),
        }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameParser {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            match self.state {
                ParserState::SeekingBoundary => {
                    if !self.seek_boundary(src) {
                        return Ok(None);
                    }
                }
                ParserState::ReadingHeaders => {
                    if !self.read_headers(src) {
                        return Ok(None);
                    }
                }
                ParserState::ReadingBody { length } => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }

                    // The trailing line terminator is consumed as a
                    // non-boundary line while seeking the next part.
                    let data = src.split_to(length).freeze();
                    let frame = Frame::new(self.next_sequence, data);
                    self.next_sequence += 1;
                    self.state = ParserState::SeekingBoundary;
                    return Ok(Some(frame));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        if !src.is_empty() || self.state != ParserState::SeekingBoundary {
            tracing::debug!(
                pending = src.len(),
                state = ?self.state,
                "Discarding partial frame at end of stream"
            );
            src.clear();
        }

        self.state = ParserState::SeekingBoundary;
        self.content_length = None;
        self.discarding_line = false;
        Ok(None)
    }
}

/// Split one `\n`-terminated line off the front of `src`
fn take_line(src: &mut BytesMut) -> Option<BytesMut> {
    let end = src.iter().position(|&b| b == b'\n')?;
    Some(src.split_to(end + 1))
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn is_boundary(line: &[u8]) -> bool {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    line[start..].starts_with(b"--")
}

fn parse_content_length(value: &str) -> Result<u64, MalformedFrame> {
    match value.trim().parse::<u64>() {
        Ok(length) if length > 0 => Ok(length),
        _ => Err(MalformedFrame::InvalidContentLength(value.trim().to_string())),
    }
}
