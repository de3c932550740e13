/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Errors surfaced by container and codec operations

use std::fmt::{Debug, Display, Formatter};

/// Possible errors from reading, writing or transcoding terse data
pub enum TerseErrors {
    /// The `<Terse …/>` header tag is missing, an attribute cannot be
    /// parsed, or a required attribute is absent
    MalformedHeader(String),
    /// A frame insertion or decode request does not match the
    /// container's fixed size, dimensions, signedness or bit depth
    IncompatibleFrame(String),
    /// An unsigned compression mode was requested for signed input
    UnsupportedMode(&'static str),
    /// The stream ended before the declared byte count
    ///
    /// The argument is the number of bytes that were still expected
    TruncatedStream(usize),
    /// A frame index beyond the number of stored frames
    ///
    /// # Arguments
    /// - 1st argument is the requested index
    /// - 2nd argument is the number of frames present
    OutOfRange(usize, usize),
    /// An output buffer too small for the decoded frame
    ///
    /// # Arguments
    /// - 1st argument is the required number of values
    /// - 2nd argument is the buffer length provided
    BufferTooSmall(usize, usize),
    /// The compressed stream violates an internal invariant, e.g. a
    /// block header wider than the container bit depth
    InternalCodecInvariant(String),
    /// A background compression job failed; the failure is sticky and
    /// resurfaces every time the frame is accessed
    BackgroundTaskFailed(String),
    /// I/O error from the underlying stream
    IoErrors(std::io::Error)
}

impl TerseErrors {
    /// Map a raw I/O error, turning an unexpected EOF into
    /// [`TruncatedStream`](Self::TruncatedStream) with the byte count
    /// that was being read.
    pub(crate) fn from_io(error: std::io::Error, expected: usize) -> TerseErrors {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            TerseErrors::TruncatedStream(expected)
        } else {
            TerseErrors::IoErrors(error)
        }
    }
}

impl Debug for TerseErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TerseErrors::MalformedHeader(reason) => {
                writeln!(f, "Malformed container header: {reason}")
            }
            TerseErrors::IncompatibleFrame(reason) => {
                writeln!(f, "Incompatible frame: {reason}")
            }
            TerseErrors::UnsupportedMode(reason) => {
                writeln!(f, "Unsupported mode: {reason}")
            }
            TerseErrors::TruncatedStream(expected) => {
                writeln!(
                    f,
                    "Stream ended early, {expected} more byte(s) were declared in the header"
                )
            }
            TerseErrors::OutOfRange(index, frames) => {
                writeln!(
                    f,
                    "Frame index {index} out of range, container holds {frames} frame(s)"
                )
            }
            TerseErrors::BufferTooSmall(expected, found) => {
                writeln!(
                    f,
                    "Output buffer too small, needed {expected} value(s) but got space for {found}"
                )
            }
            TerseErrors::InternalCodecInvariant(reason) => {
                writeln!(f, "Corrupt terse stream: {reason}")
            }
            TerseErrors::BackgroundTaskFailed(reason) => {
                writeln!(f, "Background compression failed: {reason}")
            }
            TerseErrors::IoErrors(error) => {
                writeln!(f, "I/O error: {error:?}")
            }
        }
    }
}

impl Display for TerseErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for TerseErrors {}

impl From<std::io::Error> for TerseErrors {
    fn from(error: std::io::Error) -> Self {
        TerseErrors::IoErrors(error)
    }
}
