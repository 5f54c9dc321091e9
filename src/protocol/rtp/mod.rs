pub mod builder;
pub mod codec;
pub mod demux;
pub mod packet;
pub mod parser;
pub mod payload;
pub mod tx;

pub use builder::build_rtp_packet;
pub use demux::{MediaDemux, ResolveOutcome};
pub use packet::{HeaderExtension, RtpPacket};
pub use parser::{parse_rtp_packet, RtpParseError};
pub use tx::{MediaTxCommand, MediaTxHandle};
