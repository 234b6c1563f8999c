//! Platform abstraction traits

pub mod flash;
pub mod time;

pub use flash::FlashInterface;
pub use time::{Clock, SystemClock};
