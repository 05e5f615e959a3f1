mod capture;
mod oscillator;
mod player;

pub use capture::*;
pub use oscillator::*;
pub use player::*;
