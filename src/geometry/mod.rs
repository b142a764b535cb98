//! Cube geometry and query rectangles (spec.md §3.1, §4.A).
//!
//! `Interval` and `Cube3` are the algebraic primitives everything else in
//! the cache is built on: candidate scoring, remainder dissection, and
//! envelope enlargement all reduce to interval/cube arithmetic.

pub mod cube;
pub mod interval;
pub mod query;

pub use cube::Cube3;
pub use interval::Interval;
pub use query::{Epsg, QueryCube, QueryRectangle, ResolutionType, TimeType};
