//! Subscribes to pose telemetry published over TCP.
//!
//! ```text
//! +------------------+-----------------+---------+----------+
//! | Length (4B BE)   | Channel len (2B | Channel | Payload  |
//! | of what follows  | BE)             | (UTF-8) |          |
//! +------------------+-----------------+---------+----------+
//! ```

mod transport;

pub use transport::*;
