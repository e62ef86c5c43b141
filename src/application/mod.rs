//! Application services layer: storage and rendering ports plus error mapping.

pub mod error;
pub mod render;
pub mod storage;
