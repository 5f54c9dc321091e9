pub mod media;
pub mod protocol;
pub mod service;
pub mod session;
pub mod shared;

pub use protocol::{esl, rtp, transport};
pub use service::{asr, gateway};
pub use shared::{config, entities, error, logging, ports};
