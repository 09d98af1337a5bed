//! Frame codec
//!
//! This module provides:
//! - The [`Frame`] type passed from capture to viewers
//! - [`FrameParser`], the multipart decoder for capture process output
//! - [`PartEncoder`], the multipart encoder for the `/stream` response

pub mod encoder;
pub mod frame;
pub mod parser;

pub use encoder::{PartEncoder, BOUNDARY, PART_CONTENT_TYPE, STREAM_CONTENT_TYPE};
pub use frame::Frame;
pub use parser::{FrameParser, MalformedFrame, ParserState, DEFAULT_MAX_FRAME_SIZE};
