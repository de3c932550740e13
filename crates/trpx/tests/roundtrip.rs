/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Round-trip and wire-format properties of the codec

use nanorand::{Rng, WyRand};
use trpx::{Terse, TerseMode};

fn write_read_cycle(terse: &mut Terse) -> Terse {
    let mut stream = Vec::new();
    terse.write(&mut stream).unwrap();
    Terse::from_stream(&mut std::io::Cursor::new(stream)).unwrap()
}

/// S1: the signed legacy mode on a -500..500 ramp, with the expected
/// compression rate
#[test]
fn signed_ramp_writes_and_reads_identically() {
    let numbers: Vec<i32> = (-500..500).collect();
    let mut terse = Terse::from_values(&numbers, TerseMode::Signed).unwrap();

    let compressed = terse.terse_size().unwrap();
    assert!(
        compressed * 100 < numbers.len() * 4 * 35,
        "compressed {compressed} bytes from {}",
        numbers.len() * 4
    );

    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = vec![0_i32; 1000];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded, numbers);
}

/// S2: an all-zero frame costs one header bit per block, so 64 values
/// in blocks of 12 land in a single padded word
#[test]
fn all_zero_frame_is_eight_bytes() {
    let zeros = [0_i32; 64];
    let mut terse = Terse::from_values(&zeros, TerseMode::Signed).unwrap();
    assert_eq!(terse.terse_size().unwrap(), 8);

    let mut stream = Vec::new();
    terse.write(&mut stream).unwrap();
    // six reuse bits, then padding: the frame bytes are 0x3F 0x00 ...
    let frame = &stream[stream.len() - 8..];
    assert_eq!(frame, [0x3F, 0, 0, 0, 0, 0, 0, 0]);

    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = vec![1_i32; 64];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded, zeros);
}

/// S3: an overloaded pixel in an otherwise empty unsigned block takes
/// the masked escape and still round-trips exactly
#[test]
fn unsigned_overload_round_trips() {
    let mut values = [0_u16; 24];
    values[11] = u16::MAX;
    let mut terse = Terse::from_values(&values, TerseMode::Unsigned).unwrap();

    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = [1_u16; 24];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded, values);
}

/// S4: a small-unsigned ramp over block maxima 0, 1, 2, 3
#[test]
fn small_unsigned_ramp_round_trips() {
    let mut values = [0_u16; 48];
    for (index, value) in values.iter_mut().enumerate() {
        *value = ((index / 12) as u16).min((index % 12) as u16);
    }
    let mut terse = Terse::from_values(&values, TerseMode::SmallUnsigned).unwrap();

    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = [9_u16; 48];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded[..], values[..]);
}

/// Diffraction-like data: mostly small counts with scattered overloads
#[test]
fn noisy_frames_round_trip_in_every_unsigned_mode() {
    let mut rng = WyRand::new_seed(0x7E25E);
    let mut values = vec![0_u16; 4096];
    for value in values.iter_mut() {
        *value = match rng.generate_range(0_u32..100) {
            0..=79 => rng.generate_range(0_u16..7),
            80..=94 => rng.generate_range(0_u16..2000),
            95..=98 => rng.generate_range(0_u16..40000),
            _ => u16::MAX
        };
    }
    for mode in [TerseMode::Signed, TerseMode::Unsigned, TerseMode::SmallUnsigned] {
        let mut terse = Terse::from_values(&values, mode).unwrap();
        let mut read_back = write_read_cycle(&mut terse);
        let mut decoded = vec![0_u16; 4096];
        read_back.prolix_into(&mut decoded, 0).unwrap();
        assert_eq!(decoded, values, "mode {mode:?}");
    }
}

#[test]
fn random_signed_data_round_trips() {
    let mut rng = WyRand::new_seed(0xD1FF);
    let values: Vec<i32> = (0..3000)
        .map(|_| rng.generate::<i32>() >> rng.generate_range(0_u32..31))
        .collect();
    let mut terse = Terse::from_values(&values, TerseMode::Signed).unwrap();
    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = vec![0_i32; 3000];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded, values);
}

/// An uncommon block size exercises the wide radix packing of
/// small-unsigned mode (radix 7 over 24 values needs 68 bits)
#[test]
fn small_unsigned_with_block_24_round_trips() {
    let mut rng = WyRand::new_seed(0xB10C);
    let values: Vec<u8> = (0..480).map(|_| rng.generate_range(0_u8..7)).collect();

    let mut terse = Terse::new();
    terse.set_block_size(24).unwrap();
    terse.push_back(&values, TerseMode::SmallUnsigned).unwrap();

    let mut read_back = write_read_cycle(&mut terse);
    assert_eq!(read_back.block_size(), 24);
    let mut decoded = vec![0_u8; 480];
    read_back.prolix_into(&mut decoded, 0).unwrap();
    assert_eq!(decoded, values);
}

/// Property 3: frames are independent, a container assembled from
/// separately compressed containers decodes each frame exactly
#[test]
fn appended_containers_preserve_every_frame() {
    let first: Vec<u16> = (0..256).collect();
    let second: Vec<u16> = (0..256).map(|i| i % 3).collect();
    let third: Vec<u16> = vec![u16::MAX; 256];

    let mut terse = Terse::from_values(&first, TerseMode::Unsigned).unwrap();
    let mut other = Terse::from_values(&second, TerseMode::SmallUnsigned).unwrap();
    other.push_back(&third, TerseMode::Unsigned).unwrap();
    terse.append(&mut other).unwrap();
    assert_eq!(terse.number_of_frames(), 3);
    assert_eq!(other.number_of_frames(), 0);

    let mut read_back = write_read_cycle(&mut terse);
    let mut decoded = vec![0_u16; 256 * 3];
    read_back.prolix_all_into(&mut decoded).unwrap();
    assert_eq!(&decoded[..256], &first[..]);
    assert_eq!(&decoded[256..512], &second[..]);
    assert_eq!(&decoded[512..], &third[..]);
}

/// Property 4: every compressed frame is a whole number of 8-byte words
#[test]
fn frame_sizes_are_multiples_of_eight() {
    let mut rng = WyRand::new_seed(0x8A11);
    for count in [1_usize, 7, 12, 100, 1001] {
        let values: Vec<u32> = (0..count).map(|_| rng.generate_range(0_u32..5000)).collect();
        for mode in [TerseMode::Signed, TerseMode::Unsigned, TerseMode::SmallUnsigned] {
            let mut terse = Terse::from_values(&values, mode).unwrap();
            assert_eq!(terse.terse_size().unwrap() % 8, 0, "count {count} mode {mode:?}");
        }
    }
}

/// Property 6: the compressed bytes and the decoded pixels do not
/// depend on the degree of parallelism
#[test]
fn parallel_and_sequential_results_are_bit_identical() {
    let mut rng = WyRand::new_seed(0xDE7E);
    let frames: Vec<Vec<u16>> = (0..8)
        .map(|_| (0..512).map(|_| rng.generate_range(0_u16..300)).collect())
        .collect();

    let mut outputs = Vec::new();
    let mut pixel_runs = Vec::new();
    for dop in [0.0, 0.3, 1.0] {
        let mut terse = Terse::new();
        terse.set_dop(dop).unwrap();
        for frame in &frames {
            terse.push_back_vec(frame.clone(), TerseMode::Default).unwrap();
        }
        let mut stream = Vec::new();
        terse.write(&mut stream).unwrap();
        outputs.push(stream);

        let mut decoded = vec![0_u16; 512 * 8];
        terse.prolix_all_into(&mut decoded).unwrap();
        pixel_runs.push(decoded);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
    assert_eq!(pixel_runs[0], pixel_runs[1]);
    assert_eq!(pixel_runs[0], pixel_runs[2]);
}

/// Property 7 / S6: a file without `memory_sizes_of_frames` splits into
/// the same frames by walking the block headers
#[test]
fn header_walk_recovers_per_frame_lengths() {
    let mut rng = WyRand::new_seed(0x57EA);
    let mut frames: Vec<Vec<u16>> = Vec::new();
    // one frame per mode, plus one with overloads
    frames.push((0..300).collect());
    frames.push((0..300).map(|i| i % 6).collect());
    frames.push(
        (0..300)
            .map(|_| {
                if rng.generate_range(0_u32..10) == 0 {
                    u16::MAX
                } else {
                    rng.generate_range(0_u16..500)
                }
            })
            .collect()
    );

    let mut terse = Terse::new();
    terse.push_back(&frames[0], TerseMode::Unsigned).unwrap();
    terse.push_back(&frames[1], TerseMode::SmallUnsigned).unwrap();
    terse.push_back(&frames[2], TerseMode::Unsigned).unwrap();

    let mut stream = Vec::new();
    terse.write(&mut stream).unwrap();

    // strip the memory_sizes_of_frames attribute out of the header
    let header_end = stream.windows(2).position(|w| w == &b"/>"[..]).unwrap() + 2;
    let header = String::from_utf8(stream[..header_end].to_vec()).unwrap();
    let attribute_start = header.find(" memory_sizes_of_frames=\"").unwrap();
    let attribute_end = header[attribute_start + 25..].find('"').unwrap() + attribute_start + 26;
    let mut stripped = header[..attribute_start].to_string();
    stripped.push_str(&header[attribute_end..]);

    let mut reduced = stripped.into_bytes();
    reduced.extend_from_slice(&stream[header_end..]);

    let mut read_back = Terse::from_stream(&mut std::io::Cursor::new(reduced)).unwrap();
    assert_eq!(read_back.number_of_frames(), 3);
    for (index, frame) in frames.iter().enumerate() {
        let mut decoded = vec![0_u16; 300];
        read_back.prolix_into(&mut decoded, index).unwrap();
        assert_eq!(&decoded, frame, "frame {index}");
    }
}

/// Unsigned data written in any mode may be decoded into wider or
/// signed types; the overload value reads as -1 at the native width
#[test]
fn decoding_into_wider_types() {
    let mut values = vec![100_u16; 50];
    values[7] = u16::MAX;
    let mut terse = Terse::from_values(&values, TerseMode::Unsigned).unwrap();

    let mut wide = vec![0_u64; 50];
    terse.prolix_into(&mut wide, 0).unwrap();
    assert_eq!(wide[7], 65535);
    assert_eq!(wide[8], 100);

    let mut signed = vec![0_i16; 50];
    terse.prolix_into(&mut signed, 0).unwrap();
    assert_eq!(signed[7], -1);
    assert_eq!(signed[8], 100);
}
