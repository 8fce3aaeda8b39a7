//! Sample processors that run on the audio thread, plus the wet/dry
//! crossfade every effect unit ends in.

pub mod bit_crusher;
pub mod crossfade;
pub mod delay;
pub mod noise;
