// src/archive/mod.rs

//! Archive container encodings that have no suitable crate on the shelf.

pub mod cpio;
