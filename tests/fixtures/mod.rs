//! Test fixtures
//!
//! - [`images`]: minimal well-formed (and deliberately broken) image buffers
//! - [`device`]: a running event loop behind a GATT server with a recording link

pub mod device;
pub mod images;

pub use device::{Device, PEER, Sent, Wire};
