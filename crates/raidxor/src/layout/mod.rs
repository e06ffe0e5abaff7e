//! Static description of the array: units, equations and address geometry.

pub mod bits;
pub mod geometry;
pub mod model;
pub mod solver;
