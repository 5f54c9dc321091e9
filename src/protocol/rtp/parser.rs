use thiserror::Error;

use crate::protocol::rtp::packet::{HeaderExtension, RtpPacket};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtpParseError {
    #[error("packet too short")]
    TooShort,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("invalid padding length")]
    InvalidPadding,
}

pub fn parse_rtp_packet(buf: &[u8]) -> Result<RtpPacket, RtpParseError> {
    if buf.len() < 12 {
        return Err(RtpParseError::TooShort);
    }

    let b0 = buf[0];
    let b1 = buf[1];

    let version = b0 >> 6;
    let padding = (b0 & 0b0010_0000) != 0;
    let has_extension = (b0 & 0b0001_0000) != 0;
    let csrc_count = b0 & 0b0000_1111;

    if version != 2 {
        return Err(RtpParseError::UnsupportedVersion(version));
    }

    let marker = (b1 & 0b1000_0000) != 0;
    let payload_type = b1 & 0b0111_1111;

    let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    let csrc_len = csrc_count as usize * 4;
    let mut offset = 12 + csrc_len;
    if buf.len() < offset {
        return Err(RtpParseError::TooShort);
    }
    let mut csrcs = Vec::with_capacity(csrc_count as usize);
    for i in 0..csrc_count as usize {
        let base = 12 + i * 4;
        csrcs.push(u32::from_be_bytes([
            buf[base],
            buf[base + 1],
            buf[base + 2],
            buf[base + 3],
        ]));
    }

    let mut extension = None;
    if has_extension {
        if buf.len() < offset + 4 {
            return Err(RtpParseError::TooShort);
        }
        let profile = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
        let ext_len_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
        let data_start = offset + 4;
        let data_end = data_start + ext_len_words * 4;
        if buf.len() < data_end {
            return Err(RtpParseError::TooShort);
        }
        extension = Some(HeaderExtension {
            profile,
            data: buf[data_start..data_end].to_vec(),
        });
        offset = data_end;
    }

    let mut payload_end = buf.len();
    if padding {
        if payload_end <= offset {
            return Err(RtpParseError::InvalidPadding);
        }
        let pad_len = buf[payload_end - 1] as usize;
        if pad_len == 0 || pad_len > payload_end - offset {
            return Err(RtpParseError::InvalidPadding);
        }
        payload_end -= pad_len;
    }

    let payload = buf[offset..payload_end].to_vec();

    Ok(RtpPacket {
        version,
        padding,
        marker,
        payload_type,
        sequence_number,
        timestamp,
        ssrc,
        csrcs,
        extension,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::rtp::builder::build_rtp_packet;

    fn sample_packet() -> RtpPacket {
        RtpPacket::new(0, 42, 16_000, 0x1234_5678, vec![0xFF; 160])
    }

    #[test]
    fn roundtrip_basic_packet() {
        let pkt = sample_packet();
        let bytes = build_rtp_packet(&pkt);
        let parsed = parse_rtp_packet(&bytes).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn rejects_short_buffer() {
        assert_eq!(parse_rtp_packet(&[0u8; 11]), Err(RtpParseError::TooShort));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = build_rtp_packet(&sample_packet());
        bytes[0] = 0b0100_0000; // version 1
        assert_eq!(
            parse_rtp_packet(&bytes),
            Err(RtpParseError::UnsupportedVersion(1))
        );
    }

    #[test]
    fn parses_csrc_list() {
        let mut pkt = sample_packet();
        pkt.csrcs = vec![0xAAAA_BBBB, 0xCCCC_DDDD];
        let bytes = build_rtp_packet(&pkt);
        let parsed = parse_rtp_packet(&bytes).unwrap();
        assert_eq!(parsed.csrcs, pkt.csrcs);
        assert_eq!(parsed.payload, pkt.payload);
    }

    #[test]
    fn parses_header_extension() {
        let mut pkt = sample_packet();
        pkt.extension = Some(HeaderExtension {
            profile: 0xBEDE,
            data: vec![1, 2, 3, 4],
        });
        let bytes = build_rtp_packet(&pkt);
        let parsed = parse_rtp_packet(&bytes).unwrap();
        assert_eq!(parsed.extension, pkt.extension);
        assert_eq!(parsed.payload, pkt.payload);
    }

    #[test]
    fn truncated_extension_is_error() {
        let mut pkt = sample_packet();
        pkt.extension = Some(HeaderExtension {
            profile: 0,
            data: vec![0; 8],
        });
        let bytes = build_rtp_packet(&pkt);
        // 拡張の途中で切る
        assert_eq!(
            parse_rtp_packet(&bytes[..14]),
            Err(RtpParseError::TooShort)
        );
    }

    #[test]
    fn strips_trailing_padding() {
        let pkt = sample_packet();
        let mut bytes = build_rtp_packet(&pkt);
        bytes[0] |= 0b0010_0000;
        bytes.extend_from_slice(&[0, 0, 0, 4]);
        let parsed = parse_rtp_packet(&bytes).unwrap();
        assert_eq!(parsed.payload, pkt.payload);
        assert!(parsed.padding);
    }

    #[test]
    fn zero_padding_length_is_error() {
        let pkt = sample_packet();
        let mut bytes = build_rtp_packet(&pkt);
        bytes[0] |= 0b0010_0000;
        bytes.push(0);
        assert_eq!(
            parse_rtp_packet(&bytes),
            Err(RtpParseError::InvalidPadding)
        );
    }
}
