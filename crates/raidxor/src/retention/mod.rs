//! File-backed member devices: memory-mapped disk images and the array that
//! serves them as a block transport.

pub mod array;
pub mod disk;

pub use array::DiskArray;
pub use disk::Disk;
