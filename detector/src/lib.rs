//! Frame-difference motion detector.
//!
//! Each captured frame is decoded, reduced to a coarse luminance grid and
//! compared against the previous frame's grid. Cells whose weighted change
//! exceeds the threshold are reported as a fixed 71-byte record per frame on
//! stdout, or drawn as an ASCII heat map in the debug modes.

pub mod decode;
pub mod diff;
pub mod heatmap;
pub mod output;
pub mod reduce;
pub mod schedule;
pub mod session;
pub mod signals;
