pub mod stream;

pub use stream::{AsrCommand, RecognitionManager};
