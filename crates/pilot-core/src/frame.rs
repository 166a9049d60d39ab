use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes is over the {max} byte limit")]
    OversizedFrame { size: usize, max: usize },
    #[error("{size} bytes buffered without a line break (limit {max})")]
    OversizedBuffer { size: usize, max: usize },
    #[error("cannot encode frame: {0}")]
    Encode(String),
    #[error("cannot decode frame: {0}")]
    Decode(String),
}

/// Frames and errors produced by one decoder call, each in arrival order.
#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<T> DecodeReport<T> {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.errors.is_empty()
    }
}

/// Serializes `value` as one JSON line, newline included. The limit applies
/// to the JSON body.
pub fn encode_frame<T: Serialize>(value: &T, max_frame_bytes: usize) -> Result<Vec<u8>, FrameError> {
    let mut line = Vec::with_capacity(128);
    serde_json::to_writer(&mut line, value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if line.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: line.len(),
            max: max_frame_bytes,
        });
    }
    line.push(b'\n');
    Ok(line)
}

/// Decodes a single line. Accepts the same `data:` framing as the stream
/// decoder.
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8], max_frame_bytes: usize) -> Result<T, FrameError> {
    let line = strip_line_break(bytes);
    check_size(line, max_frame_bytes)?;
    match payload(line) {
        Some(json) => parse(json),
        None => Err(FrameError::Decode("line carries no payload".to_string())),
    }
}

fn strip_line_break(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn check_size(line: &[u8], max: usize) -> Result<(), FrameError> {
    if line.len() > max {
        return Err(FrameError::OversizedFrame {
            size: line.len(),
            max,
        });
    }
    Ok(())
}

fn parse<T: DeserializeOwned>(json: &[u8]) -> Result<T, FrameError> {
    serde_json::from_slice(json).map_err(|err| FrameError::Decode(err.to_string()))
}

/// JSON body of a line, or `None` for blank lines, comments and the
/// event-stream fields that carry no envelope.
fn payload(line: &[u8]) -> Option<&[u8]> {
    let line = trim_start(line);
    if line.is_empty() || line.starts_with(b":") {
        return None;
    }
    if let Some(data) = line.strip_prefix(b"data:") {
        let data = trim_start(data);
        return (!data.is_empty()).then_some(data);
    }
    let field_only = [&b"event:"[..], &b"id:"[..], &b"retry:"[..]]
        .iter()
        .any(|field| line.starts_with(field));
    (!field_only).then_some(line)
}

fn trim_start(bytes: &[u8]) -> &[u8] {
    let skip = bytes
        .iter()
        .take_while(|byte| byte.is_ascii_whitespace())
        .count();
    &bytes[skip..]
}

/// Incremental line decoder for a pushed envelope stream.
///
/// Works on plain NDJSON and on event-stream bodies alike. A bad line is
/// reported and skipped; the next line decodes normally.
pub struct NdjsonFrameDecoder<T> {
    max_frame_bytes: usize,
    buffer: Vec<u8>,
    // Prefix of `buffer` already searched for a line break.
    scanned: usize,
    frame: PhantomData<fn() -> T>,
}

impl<T> NdjsonFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            buffer: Vec::new(),
            scanned: 0,
            frame: PhantomData,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl<T> Default for NdjsonFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> NdjsonFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        self.buffer.extend_from_slice(chunk);
        let mut report = DecodeReport::default();

        let mut line_start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buffer[cursor..].iter().position(|byte| *byte == b'\n') {
            let line_end = cursor + offset;
            decode_line(&self.buffer[line_start..line_end], self.max_frame_bytes, &mut report);
            line_start = line_end + 1;
            cursor = line_start;
        }
        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.buffer.len(),
                max: self.max_frame_bytes,
            });
            self.buffer.clear();
            self.scanned = 0;
        }
        report
    }

    /// Decodes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> DecodeReport<T> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let mut report = DecodeReport::default();
        decode_line(&rest, self.max_frame_bytes, &mut report);
        report
    }
}

fn decode_line<T: DeserializeOwned>(line: &[u8], max: usize, report: &mut DecodeReport<T>) {
    let line = strip_line_break(line);
    if let Err(err) = check_size(line, max) {
        report.errors.push(err);
        return;
    }
    let Some(json) = payload(line) else {
        return;
    };
    match parse(json) {
        Ok(frame) => report.frames.push(frame),
        Err(err) => report.errors.push(err),
    }
}
