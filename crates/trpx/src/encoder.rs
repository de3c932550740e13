/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-frame encoders for the three bit-stream modes
//!
//! Each encoder walks one frame in blocks of `block` values, carrying
//! its header state in locals. The output of every encoder is trimmed
//! to the written bits and padded to a multiple of 8 bytes.

use log::trace;
use trpx_core::bitqueue::BitWriter;
use trpx_core::sample::TerseSample;

use crate::block::{
    put_strong_literal, put_weak_body, write_significant_bits, write_strong_header,
    write_weak_header, FrameMode, SMALL_BLOCK_LIMIT, SMALL_SENTINEL, SENTINEL_WIDTH,
    STRONG_STATE_RESET, UNSIGNED_SENTINEL, WEAK_LIMIT, WEAK_STATE_RESET
};

/// Compress one frame in the resolved `mode`
pub(crate) fn compress_frame<T: TerseSample>(mode: FrameMode, block: usize, data: &[T]) -> Vec<u8> {
    let frame = match mode {
        FrameMode::Signed => compress_signed(data, block),
        FrameMode::Unsigned => compress_unsigned(data, block),
        FrameMode::SmallUnsigned => compress_small(data, block)
    };
    trace!(
        "compressed {} values into {} bytes ({:?})",
        data.len(),
        frame.len(),
        mode
    );
    frame
}

/// Scratch buffer start size: about 1% of the raw frame plus two blocks
fn initial_capacity<T: TerseSample>(values: usize, block: usize) -> usize {
    let value_size = usize::from(T::BITS) / 8;
    values * value_size / 100 + 2 * block * value_size + 16
}

/// Width of the widest value in a block of unsigned samples
#[inline]
fn block_width_unsigned<T: TerseSample>(chunk: &[T]) -> u32 {
    let mut set_bits = 0_u64;
    for value in chunk {
        set_bits |= value.to_bits();
    }
    64 - set_bits.leading_zeros()
}

/// Width of the widest value in a block of signed samples, sign bit
/// included
#[inline]
fn block_width_signed<T: TerseSample>(chunk: &[T]) -> u32 {
    let mut width = 0_u8;
    for value in chunk {
        width = width.max(value.code_width());
    }
    u32::from(width)
}

/// Legacy-compatible mode: no prefix, two's-complement payloads
fn compress_signed<T: TerseSample>(data: &[T], block: usize) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(initial_capacity::<T>(data.len(), block));
    let mut prev_bits = 0_u32;
    for chunk in data.chunks(block) {
        let bits = if T::SIGNED {
            block_width_signed(chunk)
        } else {
            block_width_unsigned(chunk)
        };
        write_significant_bits(&mut writer, &mut prev_bits, bits);
        writer.put_span(bits as u8, chunk);
    }
    writer.finish()
}

/// Unsigned mode: overloaded blocks are shifted by one and re-coded
/// against a separate masked-width state
fn compress_unsigned<T: TerseSample>(data: &[T], block: usize) -> Vec<u8> {
    debug_assert!(!T::SIGNED);
    let mut writer = BitWriter::with_capacity(initial_capacity::<T>(data.len(), block));
    writer.put_bits(SENTINEL_WIDTH, UNSIGNED_SENTINEL);

    let mut prev_bits = 0_u32;
    let mut prev_masked_bits = 0_u32;
    let mut shifted = vec![T::default(); block];

    for chunk in data.chunks(block) {
        let bits = block_width_unsigned(chunk);
        write_significant_bits(&mut writer, &mut prev_bits, bits);
        if bits < u32::from(T::BITS) {
            writer.put_span(bits as u8, chunk);
        } else {
            // overload present: shift by one, wrapping the all-ones
            // value to zero, and code the shifted block
            let buffer = &mut shifted[..chunk.len()];
            for (slot, value) in buffer.iter_mut().zip(chunk) {
                *slot = T::from_bits(value.to_bits().wrapping_add(1));
            }
            let masked_bits = block_width_unsigned(buffer);
            write_significant_bits(&mut writer, &mut prev_masked_bits, masked_bits);
            writer.put_span(masked_bits as u8, buffer);
        }
    }
    writer.finish()
}

/// Small-unsigned mode: weak blocks pack into a radix, strong blocks
/// into fixed widths, and runs of overloaded blocks are masked
fn compress_small<T: TerseSample>(data: &[T], block: usize) -> Vec<u8> {
    debug_assert!(!T::SIGNED);
    let block = block.min(SMALL_BLOCK_LIMIT);
    let mut writer = BitWriter::with_capacity(initial_capacity::<T>(data.len(), block));
    writer.put_bits(SENTINEL_WIDTH, SMALL_SENTINEL);

    let mut prev_max = 0_u64;
    let mut prev_bits = 0_u32;
    let mut from = 0;
    while from < data.len() {
        let to = (from + block).min(data.len());
        let chunk = &data[from..to];
        let max = chunk_max(chunk);
        if max < WEAK_LIMIT {
            write_weak_header(&mut writer, &mut prev_max, &mut prev_bits, max);
            put_weak_body(&mut writer, max, chunk);
        } else {
            let bits = 64 - max.leading_zeros();
            if bits == u32::from(T::BITS) {
                from = compress_small_masked(
                    &mut writer,
                    data,
                    from,
                    block,
                    &mut prev_max,
                    &mut prev_bits
                );
                continue;
            }
            write_strong_header(&mut writer, &mut prev_bits, &mut prev_max, bits);
            writer.put_span(bits as u8, chunk);
        }
        from = to;
    }
    writer.finish()
}

/// Encode a run of masked blocks starting at `from`, returning the
/// index of the first value after the run.
///
/// The run opens with a literal full-width header; each block is
/// shifted by one and re-coded through the weak or strong grammar on
/// the shifted values; a continuation bit after each block (except one
/// ending the frame) says whether the next block is also overloaded.
fn compress_small_masked<T: TerseSample>(
    writer: &mut BitWriter, data: &[T], mut from: usize, block: usize, prev_max: &mut u64,
    prev_bits: &mut u32
) -> usize {
    put_strong_literal(writer, u32::from(T::BITS));
    *prev_max = WEAK_STATE_RESET;
    *prev_bits = STRONG_STATE_RESET;

    let all_ones = T::from_bits(u64::MAX).to_bits();
    let mut shifted = vec![T::default(); block];
    loop {
        let to = (from + block).min(data.len());
        let buffer = &mut shifted[..to - from];
        for (slot, value) in buffer.iter_mut().zip(&data[from..to]) {
            *slot = T::from_bits(value.to_bits().wrapping_add(1));
        }
        let max = chunk_max(buffer);
        if max < WEAK_LIMIT {
            write_weak_header(writer, prev_max, prev_bits, max);
            put_weak_body(writer, max, buffer);
        } else {
            let bits = 64 - max.leading_zeros();
            write_strong_header(writer, prev_bits, prev_max, bits);
            writer.put_span(bits as u8, buffer);
        }
        from = to;
        if from == data.len() {
            break;
        }
        let next_to = (from + block).min(data.len());
        if chunk_max(&data[from..next_to]) == all_ones {
            writer.put_bits(1, 1);
        } else {
            writer.put_bits(1, 0);
            break;
        }
    }
    from
}

#[inline]
fn chunk_max<T: TerseSample>(chunk: &[T]) -> u64 {
    let mut max = 0_u64;
    for value in chunk {
        max = max.max(value.to_bits());
    }
    max
}

#[cfg(test)]
mod tests {
    use trpx_core::bitqueue::BitReader;

    use super::*;

    #[test]
    fn all_zero_blocks_cost_one_bit_each() {
        // 64 zeros in blocks of 12: six blocks, one reuse bit per block
        let data = [0_i32; 64];
        let frame = compress_signed(&data, 12);
        assert_eq!(frame.len(), 8);
        let mut reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(6), 0b11_1111);
        assert_eq!(reader.get_bits(58), 0);
    }

    #[test]
    fn unsigned_frames_start_with_the_sentinel() {
        let data = [1_u16; 24];
        let frame = compress_unsigned(&data, 12);
        let mut reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(SENTINEL_WIDTH), UNSIGNED_SENTINEL);
    }

    #[test]
    fn small_frames_start_with_the_sentinel() {
        let data = [1_u16; 24];
        let frame = compress_small(&data, 12);
        let mut reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(SENTINEL_WIDTH), SMALL_SENTINEL);
    }

    #[test]
    fn frames_are_padded_to_words() {
        for count in [1, 5, 12, 13, 100] {
            let data: Vec<u16> = (0..count as u16).collect();
            assert_eq!(compress_signed(&data, 12).len() % 8, 0);
            assert_eq!(compress_unsigned(&data, 12).len() % 8, 0);
            assert_eq!(compress_small(&data, 12).len() % 8, 0);
        }
    }

    #[test]
    fn overload_block_takes_the_masked_path() {
        // S3 shape: eleven zeros and an overload in the first block
        let mut data = [0_u16; 24];
        data[11] = u16::MAX;
        let frame = compress_unsigned(&data, 12);
        let mut reader = BitReader::new(&frame);
        assert_eq!(reader.get_bits(SENTINEL_WIDTH), UNSIGNED_SENTINEL);
        // literal width-16 header: 0 + 111 + 11 + 6-bit (16 - 10)
        assert_eq!(reader.get_bits(1), 0);
        assert_eq!(reader.get_bits(3), 7);
        assert_eq!(reader.get_bits(2), 3);
        assert_eq!(reader.get_bits(6), 6);
        // masked header: width 1 (shifted block is eleven ones and a zero)
        assert_eq!(reader.get_bits(1), 0);
        assert_eq!(reader.get_bits(3), 1);
        // payload: eleven ones then the wrapped zero
        assert_eq!(reader.get_bits(11), 0b111_1111_1111);
        assert_eq!(reader.get_bits(1), 0);
    }
}
