/*
 * Copyright (c) 2023.
 *
 * This software is free software; You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */
//! Core routines shared by the trpx codec crates
//!
//! This crate provides the primitives the `trpx` codec is built on
//!
//! It currently contains
//!
//! - A bit queue writer and reader with little-endian bit order, the
//!   serialization layer every compressed frame goes through
//! - Bit depth information for the supported pixel widths
//! - A sample trait implemented for the integer pixel types the codec
//!   accepts
//!
//! The bit queue guarantees byte-identical output across host byte
//! orders: the scratch word is always spilled to memory in little-endian
//! order.

pub mod bit_depth;
pub mod bitqueue;
pub mod sample;
