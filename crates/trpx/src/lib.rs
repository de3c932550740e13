/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */
//! Lossless compression of integer diffraction frames
//!
//! Terse compresses integral greyscale data, electron diffraction
//! frames in particular, by stripping blocks of consecutive values of
//! their insignificant leading bits. Each block of (by default) 12
//! values is preceded by a small header giving the bits per value,
//! either as a literal or as "same as the previous block".
//!
//! Three interoperable bit-stream modes exist:
//!
//! - **Signed**: the legacy-compatible mode. Two's-complement payloads
//!   with the sign bit kept, no frame prefix.
//! - **Unsigned**: payloads without sign bit, with an escape for
//!   blocks that contain an overloaded (all bits set) pixel: such
//!   blocks are shifted by one so that overloads cost almost nothing.
//! - **Small-unsigned**: for very weak data. Blocks with maxima below 7
//!   are packed into a number of base `max + 1`, and block-to-block
//!   deltas of the maxima shrink the headers further.
//!
//! A [`Terse`] container holds any number of equally shaped frames plus
//! optional per-frame metadata, and reads/writes the self-describing
//! `.trpx` stream format: one ASCII `<Terse …/>` tag followed by the
//! metadata and the frame bytes. Files are byte-identical across host
//! byte orders.
//!
//! ```
//! use trpx::{Terse, TerseMode};
//!
//! // values -500, -499, ..., 499 compress to well under a third
//! let numbers: Vec<i32> = (-500..500).collect();
//! let mut terse = Terse::from_values(&numbers, TerseMode::Default).unwrap();
//! assert!(terse.terse_size().unwrap() < 4000 * 35 / 100);
//!
//! let mut file = Vec::new();
//! terse.write(&mut file).unwrap();
//!
//! let mut read_back = Terse::from_stream(&mut std::io::Cursor::new(file)).unwrap();
//! let mut decoded = vec![0_i32; read_back.size()];
//! read_back.prolix_into(&mut decoded, 0).unwrap();
//! assert_eq!(decoded, numbers);
//! ```
//!
//! Frames pushed by value (see [`Terse::push_back_vec`]) compress in
//! the background on a process-wide thread pool; the degree of
//! parallelism is set per container ([`Terse::set_dop`]), with `0.0`
//! forcing sequential execution. Compressed bytes and decoded pixels
//! are bit-identical whatever the parallelism.

pub use container::{Terse, TerseMode};
pub use errors::TerseErrors;
pub use pool::DegreeOfParallelism;
pub use trpx_core;

mod block;
mod container;
mod decoder;
mod encoder;
mod errors;
mod pool;
