use std::future::Future;
use std::pin::Pin;

pub mod call_control;
pub mod console;
pub mod recognizer;
pub mod synth;

pub use call_control::{CallControlPort, NoopCallControl};
pub use console::{ConsolePort, HttpConsolePort, NoopConsole, Role, UtteranceRecord};
pub use recognizer::{
    NoopRecognizer, RecognitionConfig, RecognizerEvent, RecognizerPort, RecognizerStream,
    StreamMessage,
};
pub use synth::{HttpSynthPort, NoopSynth, SynthPort};

pub type PortFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
