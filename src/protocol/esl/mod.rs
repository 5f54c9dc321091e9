pub mod frame;

pub use frame::{read_event_frame, write_event_frame, EventFrame, FrameError};
