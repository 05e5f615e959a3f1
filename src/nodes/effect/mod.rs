mod biquad;
mod delay;
mod envelope;
mod gain;
mod mixer;
mod pan;
mod reverb;
mod slew_limiter;
mod tap;
mod worklet;

pub use biquad::*;
pub use delay::*;
pub use envelope::*;
pub use gain::*;
pub use mixer::*;
pub use pan::*;
pub use reverb::*;
pub use slew_limiter::*;
pub use tap::*;
pub use worklet::*;
