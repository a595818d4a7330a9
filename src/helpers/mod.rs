pub mod coord_utils;
pub use coord_utils::*;

pub mod matrix;
pub use matrix::*;

pub mod frame_clock;
pub use frame_clock::*;

pub mod logging;
pub use logging::*;

pub mod hash;
pub use hash::*;
