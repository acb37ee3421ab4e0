//! Problem builders that translate calibration tasks into the IR.

pub mod network;
