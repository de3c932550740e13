/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Per-frame decoders and the header-only frame walk
//!
//! A frame's mode is sniffed from its first 18 bits unless the
//! container is signed, in which case only Signed mode is legal and the
//! sentinel check is skipped (a signed payload may collide with a
//! sentinel pattern; an unsigned one cannot).

use trpx_core::bitqueue::BitReader;
use trpx_core::sample::TerseSample;

use crate::block::{
    get_weak_body, read_max, read_significant_bits, weak_body_bits, SMALL_BLOCK_LIMIT,
    SMALL_SENTINEL, SENTINEL_WIDTH, STRONG_STATE_RESET, UNSIGNED_SENTINEL, WEAK_LIMIT,
    WEAK_STATE_RESET
};
use crate::errors::TerseErrors;

/// Mask selecting the low `prolix_bits` of a value
#[inline]
fn depth_mask(prolix_bits: u8) -> u64 {
    if prolix_bits >= 64 {
        u64::MAX
    } else {
        (1_u64 << prolix_bits) - 1
    }
}

#[inline]
fn check_width(bits: u32, prolix_bits: u8) -> Result<(), TerseErrors> {
    if bits > u32::from(prolix_bits) {
        return Err(TerseErrors::InternalCodecInvariant(format!(
            "block header declares {bits} bits per value, container depth is {prolix_bits}"
        )));
    }
    Ok(())
}

#[inline]
fn check_payload(reader: &BitReader, payload_bits: usize) -> Result<(), TerseErrors> {
    if reader.bits_consumed() + payload_bits > reader.total_bits() {
        return Err(TerseErrors::InternalCodecInvariant(
            "block payload would read past the end of the frame".into()
        ));
    }
    Ok(())
}

/// Decompress one frame into `out`.
///
/// `out.len()` must equal the frame's value count; sign extension of
/// payloads follows the container's signedness, so unsigned frames can
/// be decoded into wider signed types without picking up sign bits.
pub(crate) fn decompress_into<T: TerseSample>(
    bytes: &[u8], out: &mut [T], block: usize, prolix_bits: u8, signed: bool
) -> Result<(), TerseErrors> {
    if signed {
        return decode_signed(BitReader::new(bytes), out, block, prolix_bits, true);
    }
    let mut reader = BitReader::new(bytes);
    match reader.get_bits(SENTINEL_WIDTH) {
        UNSIGNED_SENTINEL => decode_unsigned(reader, out, block, prolix_bits),
        SMALL_SENTINEL => decode_small(reader, out, block, prolix_bits),
        _ => decode_signed(BitReader::new(bytes), out, block, prolix_bits, false)
    }
}

fn decode_signed<T: TerseSample>(
    mut reader: BitReader, out: &mut [T], block: usize, prolix_bits: u8, sign_extend: bool
) -> Result<(), TerseErrors> {
    let mut prev_bits = 0_u32;
    for chunk in out.chunks_mut(block) {
        let bits = read_significant_bits(&mut reader, &mut prev_bits);
        check_width(bits, prolix_bits)?;
        check_payload(&reader, bits as usize * chunk.len())?;
        if sign_extend {
            reader.get_span_signed(bits as u8, chunk);
        } else {
            reader.get_span_unsigned(bits as u8, chunk);
        }
    }
    Ok(())
}

fn decode_unsigned<T: TerseSample>(
    mut reader: BitReader, out: &mut [T], block: usize, prolix_bits: u8
) -> Result<(), TerseErrors> {
    let mask = depth_mask(prolix_bits);
    let mut prev_bits = 0_u32;
    let mut prev_masked_bits = 0_u32;
    for chunk in out.chunks_mut(block) {
        let bits = read_significant_bits(&mut reader, &mut prev_bits);
        check_width(bits, prolix_bits)?;
        if bits < u32::from(prolix_bits) {
            check_payload(&reader, bits as usize * chunk.len())?;
            reader.get_span_unsigned(bits as u8, chunk);
        } else {
            // masked block: the payload is the block shifted by one
            let masked_bits = read_significant_bits(&mut reader, &mut prev_masked_bits);
            check_width(masked_bits, prolix_bits)?;
            check_payload(&reader, masked_bits as usize * chunk.len())?;
            for slot in chunk {
                let shifted = reader.get_bits(masked_bits as u8);
                *slot = T::from_bits(shifted.wrapping_sub(1) & mask);
            }
        }
    }
    Ok(())
}

fn decode_small<T: TerseSample>(
    mut reader: BitReader, out: &mut [T], block: usize, prolix_bits: u8
) -> Result<(), TerseErrors> {
    let block = block.min(SMALL_BLOCK_LIMIT);
    let total = out.len();
    let mut max = 0_u64;
    let mut bits = 0_u32;
    let mut from = 0;
    while from < total {
        let to = (from + block).min(total);
        read_max(&mut reader, &mut max, &mut bits);
        if max < WEAK_LIMIT {
            check_payload(&reader, weak_body_bits(max, to - from))?;
            get_weak_body(&mut reader, max, &mut out[from..to]);
            from = to;
        } else if bits == u32::from(prolix_bits) {
            from = decode_small_masked(
                &mut reader,
                out,
                from,
                block,
                prolix_bits,
                &mut max,
                &mut bits
            )?;
        } else {
            check_width(bits, prolix_bits)?;
            check_payload(&reader, bits as usize * (to - from))?;
            reader.get_span_unsigned(bits as u8, &mut out[from..to]);
            from = to;
        }
    }
    Ok(())
}

/// Decode a masked run. Returns the index of the first value after the
/// run; the carried state is left where the run's last block put it.
fn decode_small_masked<T: TerseSample>(
    reader: &mut BitReader, out: &mut [T], mut from: usize, block: usize, prolix_bits: u8,
    max: &mut u64, bits: &mut u32
) -> Result<usize, TerseErrors> {
    *max = WEAK_STATE_RESET;
    *bits = STRONG_STATE_RESET;
    let mask = depth_mask(prolix_bits);
    let total = out.len();
    loop {
        let to = (from + block).min(total);
        read_max(reader, max, bits);
        let chunk = &mut out[from..to];
        if *max < WEAK_LIMIT {
            check_payload(reader, weak_body_bits(*max, chunk.len()))?;
            get_weak_body(reader, *max, chunk);
        } else {
            check_width(*bits, prolix_bits)?;
            check_payload(reader, *bits as usize * chunk.len())?;
            reader.get_span_unsigned(*bits as u8, chunk);
        }
        // undo the encoder's shift in the container's bit depth
        for slot in chunk {
            *slot = T::from_bits(slot.to_bits().wrapping_sub(1) & mask);
        }
        from = to;
        if from == total {
            // the final block of a frame carries no continuation bit
            break;
        }
        if reader.get_bits(1) == 0 {
            break;
        }
    }
    Ok(from)
}

/// Byte length of the frame starting at the beginning of `blob`,
/// derived by walking block headers only. Used to split files that
/// predate the `memory_sizes_of_frames` attribute. The length is the
/// walked bit position rounded up to the next multiple of 8 bytes.
pub(crate) fn frame_byte_len(
    blob: &[u8], values: usize, block: usize, prolix_bits: u8, signed: bool
) -> Result<usize, TerseErrors> {
    let mut reader = BitReader::new(blob);
    if signed {
        walk_signed(&mut reader, values, block, prolix_bits)?;
    } else {
        match reader.get_bits(SENTINEL_WIDTH) {
            UNSIGNED_SENTINEL => walk_unsigned(&mut reader, values, block, prolix_bits)?,
            SMALL_SENTINEL => walk_small(&mut reader, values, block, prolix_bits)?,
            _ => {
                reader = BitReader::new(blob);
                walk_signed(&mut reader, values, block, prolix_bits)?;
            }
        }
    }
    let length = reader.byte_position().next_multiple_of(8);
    if length > blob.len() {
        return Err(TerseErrors::TruncatedStream(length - blob.len()));
    }
    Ok(length)
}

fn walk_signed(
    reader: &mut BitReader, values: usize, block: usize, prolix_bits: u8
) -> Result<(), TerseErrors> {
    let mut prev_bits = 0_u32;
    let mut from = 0;
    while from < values {
        let len = block.min(values - from);
        let bits = read_significant_bits(reader, &mut prev_bits);
        check_width(bits, prolix_bits)?;
        reader.skip_bits(bits as usize * len);
        from += len;
    }
    Ok(())
}

fn walk_unsigned(
    reader: &mut BitReader, values: usize, block: usize, prolix_bits: u8
) -> Result<(), TerseErrors> {
    let mut prev_bits = 0_u32;
    let mut prev_masked_bits = 0_u32;
    let mut from = 0;
    while from < values {
        let len = block.min(values - from);
        let bits = read_significant_bits(reader, &mut prev_bits);
        check_width(bits, prolix_bits)?;
        if bits < u32::from(prolix_bits) {
            reader.skip_bits(bits as usize * len);
        } else {
            let masked_bits = read_significant_bits(reader, &mut prev_masked_bits);
            check_width(masked_bits, prolix_bits)?;
            reader.skip_bits(masked_bits as usize * len);
        }
        from += len;
    }
    Ok(())
}

fn walk_small(
    reader: &mut BitReader, values: usize, block: usize, prolix_bits: u8
) -> Result<(), TerseErrors> {
    let block = block.min(SMALL_BLOCK_LIMIT);
    let mut max = 0_u64;
    let mut bits = 0_u32;
    let mut from = 0;
    while from < values {
        let len = block.min(values - from);
        read_max(reader, &mut max, &mut bits);
        if max < WEAK_LIMIT {
            reader.skip_bits(weak_body_bits(max, len));
            from += len;
        } else if bits == u32::from(prolix_bits) {
            from = walk_small_masked(reader, values, from, block, prolix_bits, &mut max, &mut bits)?;
        } else {
            check_width(bits, prolix_bits)?;
            reader.skip_bits(bits as usize * len);
            from += len;
        }
    }
    Ok(())
}

fn walk_small_masked(
    reader: &mut BitReader, values: usize, mut from: usize, block: usize, prolix_bits: u8,
    max: &mut u64, bits: &mut u32
) -> Result<usize, TerseErrors> {
    *max = WEAK_STATE_RESET;
    *bits = STRONG_STATE_RESET;
    loop {
        let len = block.min(values - from);
        read_max(reader, max, bits);
        if *max < WEAK_LIMIT {
            reader.skip_bits(weak_body_bits(*max, len));
        } else {
            check_width(*bits, prolix_bits)?;
            reader.skip_bits(*bits as usize * len);
        }
        from += len;
        if from == values {
            break;
        }
        if reader.get_bits(1) == 0 {
            break;
        }
    }
    Ok(from)
}
