//! Parallel algorithms over [`DeviceInput`](crate::iterator::DeviceInput)s.

mod count;

pub use count::{count, count_if, count_if_with, Strategy, SERIAL_THRESHOLD};
