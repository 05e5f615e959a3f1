#[cfg(feature = "cpal_sink")]
mod cpal_sink;
mod rtrb_sink;
mod terminal;

#[cfg(feature = "cpal_sink")]
pub use cpal_sink::*;
pub use rtrb_sink::*;
pub(crate) use terminal::Terminal;
