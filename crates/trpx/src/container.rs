/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! The terse container: an ordered stack of equally shaped compressed
//! frames with optional per-frame metadata
//!
//! On disk a container is a single self-closing `<Terse …/>` tag in
//! plain ASCII, followed by the metadata strings and the frame byte
//! blobs, both concatenated in frame order. All numbers inside frames
//! are serialized little-endian, so files are byte-identical across
//! host byte orders.

use std::io::{Read, Write};

use log::trace;
use trpx_core::bit_depth::BitDepth;
use trpx_core::sample::TerseSample;

use crate::block::FrameMode;
use crate::decoder::{decompress_into, frame_byte_len};
use crate::encoder::compress_frame;
use crate::errors::TerseErrors;
use crate::pool::{global_pool, DegreeOfParallelism, Task};

/// Upper bound on the header tag, far beyond any sane frame count
const MAX_HEADER_BYTES: usize = 1 << 24;

/// How a frame should be compressed.
///
/// `Signed` is the legacy-compatible mode and the only legal choice for
/// signed input. `Default` resolves to `Signed` for signed input and to
/// the container's preferred unsigned mode otherwise (see
/// [`Terse::set_small`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TerseMode {
    Signed,
    Unsigned,
    SmallUnsigned,
    Default
}

/// A frame is either compressed bytes, a background job that will
/// produce them, or a failure left behind by such a job.
#[derive(Debug)]
enum FrameSlot {
    Ready(Vec<u8>),
    Pending(Task<Vec<u8>>),
    Failed(String)
}

impl FrameSlot {
    /// Convert future-of-bytes into bytes, joining a pending job.
    ///
    /// A recorded failure is sticky: every access keeps reporting it.
    fn materialize(&mut self) -> Result<&Vec<u8>, TerseErrors> {
        if matches!(self, FrameSlot::Pending(_)) {
            let pending = std::mem::replace(self, FrameSlot::Failed(String::new()));
            if let FrameSlot::Pending(task) = pending {
                match task.join() {
                    Ok(bytes) => *self = FrameSlot::Ready(bytes),
                    Err(message) => *self = FrameSlot::Failed(message)
                }
            }
        }
        match self {
            FrameSlot::Ready(bytes) => Ok(bytes),
            FrameSlot::Failed(message) => {
                Err(TerseErrors::BackgroundTaskFailed(message.clone()))
            }
            FrameSlot::Pending(_) => Err(TerseErrors::BackgroundTaskFailed(
                "frame is still pending".to_string()
            ))
        }
    }
}

/// A stack of compressed frames sharing one shape, bit depth and
/// signedness.
///
/// ```
/// use trpx::{Terse, TerseMode};
///
/// let numbers: Vec<i32> = (-500..500).collect();
/// let mut terse = Terse::new();
/// terse.push_back(&numbers, TerseMode::Default).unwrap();
///
/// let mut file = Vec::new();
/// terse.write(&mut file).unwrap();
///
/// let mut read_back = Terse::from_stream(&mut std::io::Cursor::new(file)).unwrap();
/// let mut decoded = vec![0_i32; 1000];
/// read_back.prolix_into(&mut decoded, 0).unwrap();
/// assert_eq!(decoded, numbers);
/// ```
#[derive(Debug)]
pub struct Terse {
    frames:      Vec<FrameSlot>,
    metadata:    Vec<Vec<u8>>,
    dim:         Vec<usize>,
    size:        usize,
    block:       usize,
    prolix_bits: u8,
    signed:      bool,
    small:       bool,
    dop:         DegreeOfParallelism,
    pool_id:     Option<u64>
}

impl Default for Terse {
    fn default() -> Self {
        Self::new()
    }
}

impl Terse {
    /// Create an empty container.
    ///
    /// The first frame pushed in fixes the value count, signedness and
    /// bit depth of every later frame.
    pub fn new() -> Terse {
        Terse {
            frames:      Vec::new(),
            metadata:    Vec::new(),
            dim:         Vec::new(),
            size:        0,
            block:       12,
            prolix_bits: 0,
            signed:      false,
            small:       false,
            dop:         DegreeOfParallelism::default(),
            pool_id:     None
        }
    }

    /// Create a container holding `data` as its only frame
    pub fn from_values<T: TerseSample>(data: &[T], mode: TerseMode) -> Result<Terse, TerseErrors> {
        let mut terse = Terse::new();
        terse.push_back(data, mode)?;
        Ok(terse)
    }

    /// Read a container written by [`write`](Self::write).
    ///
    /// Scans forward to the `<Terse` tag and leaves the stream
    /// positioned one byte past the container's payload, so several
    /// containers can be read from one stream in sequence. Files
    /// without the `memory_sizes_of_frames` attribute are split by
    /// walking block headers.
    pub fn from_stream<R: Read>(reader: &mut R) -> Result<Terse, TerseErrors> {
        let tag = scan_for_tag(reader)?;

        let prolix_bits = required::<u8>(&tag, "prolix_bits")?;
        if BitDepth::from_bit_count(prolix_bits).is_none() {
            return Err(TerseErrors::MalformedHeader(format!(
                "prolix_bits is {prolix_bits}, must be 8, 16, 32 or 64"
            )));
        }
        let signed = match required::<u8>(&tag, "signed")? {
            0 => false,
            1 => true,
            other => {
                return Err(TerseErrors::MalformedHeader(format!(
                    "signed is {other}, must be 0 or 1"
                )))
            }
        };
        let block = required::<usize>(&tag, "block")?;
        if block == 0 {
            return Err(TerseErrors::MalformedHeader("block is 0".to_string()));
        }
        let size = required::<usize>(&tag, "number_of_values")?;
        let frame_count = required::<usize>(&tag, "number_of_frames")?;
        let memory_size = required::<usize>(&tag, "memory_size")?;

        let dim = number_list(&tag, "dimensions")?.unwrap_or_default();
        if !dim.is_empty() && dim.iter().product::<usize>() != size {
            return Err(TerseErrors::MalformedHeader(format!(
                "dimensions {dim:?} do not multiply to number_of_values {size}"
            )));
        }

        trace!(
            "terse header: {prolix_bits} bits, signed {signed}, block {block}, \
             {frame_count} frame(s) of {size} value(s), {memory_size} compressed byte(s)"
        );

        let mut metadata = vec![Vec::new(); frame_count];
        if let Some(sizes) = number_list(&tag, "metadata_string_sizes")? {
            if sizes.len() != frame_count {
                return Err(TerseErrors::MalformedHeader(format!(
                    "{} metadata sizes for {frame_count} frame(s)",
                    sizes.len()
                )));
            }
            for (slot, len) in metadata.iter_mut().zip(sizes) {
                *slot = read_exact_bytes(reader, len)?;
            }
        }

        let mut frames = Vec::with_capacity(frame_count);
        if let Some(sizes) = number_list(&tag, "memory_sizes_of_frames")? {
            if sizes.len() != frame_count {
                return Err(TerseErrors::MalformedHeader(format!(
                    "{} frame sizes for {frame_count} frame(s)",
                    sizes.len()
                )));
            }
            for len in sizes {
                frames.push(FrameSlot::Ready(read_exact_bytes(reader, len)?));
            }
        } else if frame_count > 0 {
            // older files: one concatenated blob, split by walking the
            // block headers of each frame
            let blob = read_exact_bytes(reader, memory_size)?;
            let mut offset = 0;
            for _ in 0..frame_count {
                let len = frame_byte_len(&blob[offset..], size, block, prolix_bits, signed)?;
                frames.push(FrameSlot::Ready(blob[offset..offset + len].to_vec()));
                offset += len;
            }
        }

        Ok(Terse {
            frames,
            metadata,
            dim,
            size,
            block,
            prolix_bits,
            signed,
            small: false,
            dop: DegreeOfParallelism::default(),
            pool_id: None
        })
    }

    /// Number of values in each frame
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of frames held by the container
    pub fn number_of_frames(&self) -> usize {
        self.frames.len()
    }

    /// The logical shape of each frame, empty when never set
    pub fn dim(&self) -> &[usize] {
        &self.dim
    }

    /// Set the logical shape of the frames.
    ///
    /// The product of the dimensions must match the value count once
    /// frames exist.
    pub fn set_dim(&mut self, dim: &[usize]) -> Result<(), TerseErrors> {
        if self.frames.is_empty() && self.size == 0 {
            self.dim = dim.to_vec();
            return Ok(());
        }
        if dim.iter().product::<usize>() != self.size {
            return Err(TerseErrors::IncompatibleFrame(format!(
                "dimensions {dim:?} do not multiply to {} values per frame",
                self.size
            )));
        }
        self.dim = dim.to_vec();
        Ok(())
    }

    /// Bit depth of the uncompressed values, 0 for an empty container
    pub fn bits_per_val(&self) -> u8 {
        self.prolix_bits
    }

    /// True when the stored values are signed
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// The block size used for compression
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Change the block size. Only allowed while no frames exist.
    pub fn set_block_size(&mut self, block: usize) -> Result<(), TerseErrors> {
        if !self.frames.is_empty() {
            return Err(TerseErrors::IncompatibleFrame(
                "the block size is fixed once frames exist".to_string()
            ));
        }
        if block == 0 {
            return Err(TerseErrors::IncompatibleFrame(
                "the block size must be at least 1".to_string()
            ));
        }
        self.block = block;
        Ok(())
    }

    /// True when `Default` resolves unsigned input to Small-unsigned
    pub fn small(&self) -> bool {
        self.small
    }

    /// Choose Small-unsigned as the default mode for unsigned input
    pub fn set_small(&mut self, small: bool) {
        self.small = small;
    }

    /// True when `Default` resolves unsigned input to Unsigned
    pub fn fast(&self) -> bool {
        !self.small
    }

    /// Choose Unsigned as the default mode for unsigned input
    pub fn set_fast(&mut self, fast: bool) {
        self.small = !fast;
    }

    /// The degree of parallelism of this container
    pub fn dop(&self) -> f64 {
        self.dop.value()
    }

    /// Change the degree of parallelism.
    ///
    /// Joins all pending compression jobs first, so the new value
    /// applies to everything submitted afterwards.
    pub fn set_dop(&mut self, value: f64) -> Result<(), TerseErrors> {
        self.join_all()?;
        self.dop = DegreeOfParallelism::new(value);
        Ok(())
    }

    /// The metadata bytes attached to a frame
    pub fn metadata(&self, frame: usize) -> Result<&[u8], TerseErrors> {
        self.metadata
            .get(frame)
            .map(Vec::as_slice)
            .ok_or(TerseErrors::OutOfRange(frame, self.frames.len()))
    }

    /// Attach metadata to a frame, replacing what was there.
    ///
    /// Metadata is stored uncompressed and travels with the frame.
    pub fn set_metadata<D: Into<Vec<u8>>>(
        &mut self, frame: usize, data: D
    ) -> Result<(), TerseErrors> {
        if frame >= self.frames.len() {
            return Err(TerseErrors::OutOfRange(frame, self.frames.len()));
        }
        self.metadata[frame] = data.into();
        Ok(())
    }

    /// Append a frame
    pub fn push_back<T: TerseSample>(
        &mut self, data: &[T], mode: TerseMode
    ) -> Result<(), TerseErrors> {
        self.insert(self.frames.len(), data, mode)
    }

    /// Append a frame, consuming the data.
    ///
    /// When the container's degree of parallelism is non-zero the
    /// frame compresses in the background; any operation that needs the
    /// compressed bytes joins the job first.
    pub fn push_back_vec<T: TerseSample>(
        &mut self, data: Vec<T>, mode: TerseMode
    ) -> Result<(), TerseErrors> {
        self.insert_vec(self.frames.len(), data, mode)
    }

    /// Insert a frame at `pos`, compressing in the calling thread
    pub fn insert<T: TerseSample>(
        &mut self, pos: usize, data: &[T], mode: TerseMode
    ) -> Result<(), TerseErrors> {
        let mode = self.resolve_mode::<T>(mode)?;
        self.validate_insert::<T>(pos, data.len())?;
        let frame = compress_frame(mode, self.block, data);
        self.frames.insert(pos, FrameSlot::Ready(frame));
        self.metadata.insert(pos, Vec::new());
        Ok(())
    }

    /// Insert a frame at `pos`, consuming the data and compressing in
    /// the background when parallelism allows
    pub fn insert_vec<T: TerseSample>(
        &mut self, pos: usize, data: Vec<T>, mode: TerseMode
    ) -> Result<(), TerseErrors> {
        let mode = self.resolve_mode::<T>(mode)?;
        self.validate_insert::<T>(pos, data.len())?;
        let block = self.block;
        if self.dop.is_sequential() {
            let frame = compress_frame(mode, block, &data);
            self.frames.insert(pos, FrameSlot::Ready(frame));
        } else {
            let dop = self.dop;
            let owner = self.ensure_pool_id();
            let task = Task::run(dop, owner, move || compress_frame(mode, block, &data));
            self.frames.insert(pos, FrameSlot::Pending(task));
        }
        self.metadata.insert(pos, Vec::new());
        Ok(())
    }

    /// Splice all frames of `other` onto the end of this container,
    /// leaving `other` empty.
    ///
    /// An empty container adopts the shape of `other`; otherwise the
    /// shapes must match.
    pub fn append(&mut self, other: &mut Terse) -> Result<(), TerseErrors> {
        other.join_all()?;
        if other.frames.is_empty() {
            return Ok(());
        }
        if self.frames.is_empty() {
            self.size = other.size;
            self.signed = other.signed;
            self.prolix_bits = other.prolix_bits;
            self.block = other.block;
            self.dim = other.dim.clone();
        } else if self.size != other.size
            || self.signed != other.signed
            || self.prolix_bits != other.prolix_bits
            || self.block != other.block
            || self.dim != other.dim
        {
            return Err(TerseErrors::IncompatibleFrame(
                "appended containers must share size, shape, depth and block".to_string()
            ));
        }
        self.frames.append(&mut other.frames);
        self.metadata.append(&mut other.metadata);
        Ok(())
    }

    /// Remove the frame at `pos` and its metadata.
    ///
    /// A pending compression job for the frame is joined first; its
    /// failure, if any, does not block removal.
    pub fn erase(&mut self, pos: usize) -> Result<(), TerseErrors> {
        if pos >= self.frames.len() {
            return Err(TerseErrors::OutOfRange(pos, self.frames.len()));
        }
        let _ = self.frames[pos].materialize();
        self.frames.remove(pos);
        self.metadata.remove(pos);
        Ok(())
    }

    /// Return the frame at `pos` as a single-frame container
    pub fn at(&mut self, pos: usize) -> Result<Terse, TerseErrors> {
        let bytes = self.frame_bytes(pos)?.clone();
        Ok(Terse {
            frames:      vec![FrameSlot::Ready(bytes)],
            metadata:    vec![self.metadata[pos].clone()],
            dim:         self.dim.clone(),
            size:        self.size,
            block:       self.block,
            prolix_bits: self.prolix_bits,
            signed:      self.signed,
            small:       self.small,
            dop:         self.dop,
            pool_id:     None
        })
    }

    /// Decompress the frame at `frame` into `out`.
    ///
    /// `out` must hold at least [`size`](Self::size) values of a type
    /// that is at least as wide as the stored bit depth; signed data
    /// cannot be decoded into an unsigned type.
    pub fn prolix_into<T: TerseSample>(
        &mut self, out: &mut [T], frame: usize
    ) -> Result<(), TerseErrors> {
        self.check_output::<T>()?;
        if out.len() < self.size {
            return Err(TerseErrors::BufferTooSmall(self.size, out.len()));
        }
        let (size, block, bits, signed) = (self.size, self.block, self.prolix_bits, self.signed);
        let bytes = self.frame_bytes(frame)?;
        decompress_into(bytes, &mut out[..size], block, bits, signed)
    }

    /// Decompress every frame into `out`, frame `i` starting at
    /// `i * size()`.
    ///
    /// Frames decode in parallel within the container's core budget;
    /// the result is bit-identical to a sequential decode.
    pub fn prolix_all_into<T: TerseSample>(&mut self, out: &mut [T]) -> Result<(), TerseErrors> {
        self.check_output::<T>()?;
        let frame_count = self.frames.len();
        let needed = self.size * frame_count;
        if out.len() < needed {
            return Err(TerseErrors::BufferTooSmall(needed, out.len()));
        }
        if frame_count == 0 || self.size == 0 {
            return Ok(());
        }
        self.join_all()?;
        let (size, block, bits, signed) = (self.size, self.block, self.prolix_bits, self.signed);
        let ready: Vec<&[u8]> = self
            .frames
            .iter()
            .filter_map(|slot| match slot {
                FrameSlot::Ready(bytes) => Some(bytes.as_slice()),
                _ => None
            })
            .collect();
        if ready.len() != frame_count {
            return Err(TerseErrors::InternalCodecInvariant(
                "frame slot not materialized".to_string()
            ));
        }

        let cores = if self.dop.is_sequential() {
            1
        } else {
            self.dop.cores().min(frame_count)
        };
        if cores <= 1 {
            for (&bytes, chunk) in ready.iter().zip(out[..needed].chunks_mut(size)) {
                decompress_into(bytes, chunk, block, bits, signed)?;
            }
            return Ok(());
        }

        // disjoint output ranges per worker, frames keep their order
        let per_group = frame_count.div_ceil(cores);
        let mut outcome: Result<(), TerseErrors> = Ok(());
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for (group, out_group) in out[..needed].chunks_mut(per_group * size).enumerate() {
                let start = group * per_group;
                let frames = &ready[start..(start + per_group).min(frame_count)];
                handles.push(scope.spawn(move || {
                    for (&bytes, chunk) in frames.iter().zip(out_group.chunks_mut(size)) {
                        decompress_into(bytes, chunk, block, bits, signed)?;
                    }
                    Ok(())
                }));
            }
            for handle in handles {
                let result = match handle.join() {
                    Ok(result) => result,
                    Err(_) => Err(TerseErrors::InternalCodecInvariant(
                        "decode thread panicked".to_string()
                    ))
                };
                if outcome.is_ok() {
                    outcome = result;
                }
            }
        });
        outcome
    }

    /// Total compressed bytes over all frames, excluding header and
    /// metadata. Joins pending jobs.
    pub fn terse_size(&mut self) -> Result<usize, TerseErrors> {
        self.join_all()?;
        Ok(self.ready_sizes().iter().sum())
    }

    /// The byte count [`write`](Self::write) would produce, zero for an
    /// empty container
    pub fn file_size(&mut self) -> Result<usize, TerseErrors> {
        if self.frames.is_empty() {
            return Ok(0);
        }
        self.join_all()?;
        let metadata: usize = self.metadata.iter().map(Vec::len).sum();
        Ok(self.header_string().len() + metadata + self.ready_sizes().iter().sum::<usize>())
    }

    /// Join pending jobs and release unused buffer capacity
    pub fn shrink_to_fit(&mut self) -> Result<(), TerseErrors> {
        self.join_all()?;
        for slot in &mut self.frames {
            if let FrameSlot::Ready(bytes) = slot {
                bytes.shrink_to_fit();
            }
        }
        Ok(())
    }

    /// Write the container to a stream: header tag, metadata strings,
    /// then the frame bytes.
    ///
    /// Writes nothing for an empty container. On error the stream is
    /// left as-is; the partial output should be discarded.
    pub fn write<W: Write>(&mut self, writer: &mut W) -> Result<(), TerseErrors> {
        if self.frames.is_empty() {
            return Ok(());
        }
        self.join_all()?;
        let header = self.header_string();
        writer.write_all(header.as_bytes())?;
        for metadata in &self.metadata {
            writer.write_all(metadata)?;
        }
        for slot in &self.frames {
            if let FrameSlot::Ready(bytes) = slot {
                writer.write_all(bytes)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn resolve_mode<T: TerseSample>(&self, mode: TerseMode) -> Result<FrameMode, TerseErrors> {
        if T::SIGNED {
            return match mode {
                TerseMode::Signed | TerseMode::Default => Ok(FrameMode::Signed),
                TerseMode::Unsigned | TerseMode::SmallUnsigned => Err(
                    TerseErrors::UnsupportedMode("unsigned modes cannot encode signed input")
                )
            };
        }
        Ok(match mode {
            TerseMode::Signed => FrameMode::Signed,
            TerseMode::Unsigned => FrameMode::Unsigned,
            TerseMode::SmallUnsigned => FrameMode::SmallUnsigned,
            TerseMode::Default if self.small => FrameMode::SmallUnsigned,
            TerseMode::Default => FrameMode::Unsigned
        })
    }

    fn validate_insert<T: TerseSample>(
        &mut self, pos: usize, len: usize
    ) -> Result<(), TerseErrors> {
        if pos > self.frames.len() {
            return Err(TerseErrors::OutOfRange(pos, self.frames.len()));
        }
        if self.frames.is_empty() {
            if !self.dim.is_empty() && self.dim.iter().product::<usize>() != len {
                return Err(TerseErrors::IncompatibleFrame(format!(
                    "{len} values do not fill the configured dimensions {:?}",
                    self.dim
                )));
            }
            self.size = len;
            self.signed = T::SIGNED;
            self.prolix_bits = T::BITS;
            return Ok(());
        }
        if self.size != len {
            return Err(TerseErrors::IncompatibleFrame(format!(
                "frame holds {len} values, the container holds frames of {}",
                self.size
            )));
        }
        if self.signed != T::SIGNED || self.prolix_bits != T::BITS {
            return Err(TerseErrors::IncompatibleFrame(format!(
                "frame type is {} bits (signed: {}), the container stores {} bits (signed: {})",
                T::BITS,
                T::SIGNED,
                self.prolix_bits,
                self.signed
            )));
        }
        Ok(())
    }

    fn check_output<T: TerseSample>(&self) -> Result<(), TerseErrors> {
        if self.signed && !T::SIGNED {
            return Err(TerseErrors::IncompatibleFrame(
                "signed data cannot be decoded into an unsigned type".to_string()
            ));
        }
        if T::BITS < self.prolix_bits {
            return Err(TerseErrors::IncompatibleFrame(format!(
                "{} bit values cannot hold {} bit data",
                T::BITS,
                self.prolix_bits
            )));
        }
        Ok(())
    }

    fn ensure_pool_id(&mut self) -> u64 {
        match self.pool_id {
            Some(id) => id,
            None => {
                let id = global_pool().unique_id();
                self.pool_id = Some(id);
                id
            }
        }
    }

    fn frame_bytes(&mut self, index: usize) -> Result<&Vec<u8>, TerseErrors> {
        let count = self.frames.len();
        match self.frames.get_mut(index) {
            Some(slot) => slot.materialize(),
            None => Err(TerseErrors::OutOfRange(index, count))
        }
    }

    fn join_all(&mut self) -> Result<(), TerseErrors> {
        for index in 0..self.frames.len() {
            self.frames[index].materialize()?;
        }
        Ok(())
    }

    /// Byte size of each frame; only valid after [`join_all`](Self::join_all)
    fn ready_sizes(&self) -> Vec<usize> {
        self.frames
            .iter()
            .map(|slot| match slot {
                FrameSlot::Ready(bytes) => bytes.len(),
                _ => 0
            })
            .collect()
    }

    /// The `<Terse …/>` tag; frames must already be joined
    fn header_string(&self) -> String {
        let sizes = self.ready_sizes();
        let memory_size: usize = sizes.iter().sum();
        let mut header = format!(
            "<Terse prolix_bits=\"{}\" signed=\"{}\" block=\"{}\" number_of_values=\"{}\"",
            self.prolix_bits,
            u8::from(self.signed),
            self.block,
            self.size
        );
        if !self.dim.is_empty() {
            header.push_str(&format!(" dimensions=\"{}\"", join_numbers(&self.dim)));
        }
        header.push_str(&format!(" number_of_frames=\"{}\"", self.frames.len()));
        header.push_str(&format!(
            " memory_sizes_of_frames=\"{}\"",
            join_numbers(&sizes)
        ));
        header.push_str(&format!(" memory_size=\"{memory_size}\""));
        if !self.metadata.is_empty() {
            let lengths: Vec<usize> = self.metadata.iter().map(Vec::len).collect();
            header.push_str(&format!(
                " metadata_string_sizes=\"{}\"",
                join_numbers(&lengths)
            ));
        }
        header.push_str("/>");
        header
    }
}

fn join_numbers(numbers: &[usize]) -> String {
    let mut joined = String::new();
    for (index, number) in numbers.iter().enumerate() {
        if index > 0 {
            joined.push(' ');
        }
        joined.push_str(&number.to_string());
    }
    joined
}

/// Scan forward to the `<Terse` opening and return the tag's attribute
/// text (everything up to the closing `/>`)
fn scan_for_tag<R: Read>(reader: &mut R) -> Result<String, TerseErrors> {
    const OPENING: &[u8] = b"<Terse";
    let mut byte = [0_u8; 1];
    let mut matched = 0;
    let mut scanned = 0_usize;
    while matched < OPENING.len() {
        if let Err(error) = reader.read_exact(&mut byte) {
            return if error.kind() == std::io::ErrorKind::UnexpectedEof {
                Err(TerseErrors::MalformedHeader(
                    "no <Terse header tag in the stream".to_string()
                ))
            } else {
                Err(TerseErrors::IoErrors(error))
            };
        }
        scanned += 1;
        if scanned > MAX_HEADER_BYTES {
            return Err(TerseErrors::MalformedHeader(
                "no <Terse header tag in the stream".to_string()
            ));
        }
        if byte[0] == OPENING[matched] {
            matched += 1;
        } else if byte[0] == b'<' {
            matched = 1;
        } else {
            matched = 0;
        }
    }

    let mut tag = Vec::new();
    loop {
        reader
            .read_exact(&mut byte)
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    TerseErrors::MalformedHeader("unterminated <Terse header tag".to_string())
                }
                _ => TerseErrors::IoErrors(error)
            })?;
        tag.push(byte[0]);
        if tag.ends_with(b"/>") {
            tag.truncate(tag.len() - 2);
            break;
        }
        if tag.len() > MAX_HEADER_BYTES {
            return Err(TerseErrors::MalformedHeader(
                "unterminated <Terse header tag".to_string()
            ));
        }
    }
    String::from_utf8(tag)
        .map_err(|_| TerseErrors::MalformedHeader("header tag is not valid ASCII".to_string()))
}

/// Find `name="…"` inside the tag text
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!(" {name}=\"");
    let start = tag.find(&pattern)? + pattern.len();
    let end = tag[start..].find('"')? + start;
    Some(&tag[start..end])
}

fn required<N: std::str::FromStr>(tag: &str, name: &str) -> Result<N, TerseErrors> {
    let raw = attribute(tag, name).ok_or_else(|| {
        TerseErrors::MalformedHeader(format!("required attribute {name} is missing"))
    })?;
    raw.trim().parse().map_err(|_| {
        TerseErrors::MalformedHeader(format!("attribute {name}=\"{raw}\" is not a valid number"))
    })
}

fn number_list(tag: &str, name: &str) -> Result<Option<Vec<usize>>, TerseErrors> {
    let Some(raw) = attribute(tag, name) else {
        return Ok(None);
    };
    let mut numbers = Vec::new();
    for word in raw.split_whitespace() {
        numbers.push(word.parse().map_err(|_| {
            TerseErrors::MalformedHeader(format!(
                "attribute {name} holds {word:?}, expected numbers"
            ))
        })?);
    }
    Ok(Some(numbers))
}

fn read_exact_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, TerseErrors> {
    let mut bytes = vec![0_u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|error| TerseErrors::from_io(error, len))?;
    Ok(bytes)
}
