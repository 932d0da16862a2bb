//! Integration test crate for Parallax.
//!
//! This crate exists solely to hold cross-crate integration tests. Every
//! conversion runs against the in-memory media backend, so no ffmpeg is
//! needed.

#[cfg(test)]
mod harness;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod cache;

#[cfg(test)]
mod failures;
