pub mod resample;
pub mod tone;
pub mod vad;

pub use resample::{downsample_2x, resample, upsample_2x};
pub use tone::warning_tone_mulaw;
pub use vad::{compute_rms, VadState, VadVerdict};
