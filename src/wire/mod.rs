//! Wire protocol: frame IO, command codes, and message bodies (spec.md §4.F, §6.1).

pub mod codes;
pub mod framing;
pub mod messages;

pub use framing::{read_frame, write_frame, write_message, Frame, HEADER_LEN};
pub use messages::*;
