use std::collections::HashMap;
use std::net::SocketAddr;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::protocol::rtp::builder::build_rtp_packet;
use crate::protocol::rtp::packet::RtpPacket;

const TX_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum MediaTxCommand {
    Start {
        key: String,
        dst: SocketAddr,
        payload_type: u8,
        ssrc: u32,
    },
    Stop {
        key: String,
    },
    SendFrame {
        key: String,
        payload: Vec<u8>,
    },
}

struct TxStream {
    dst: SocketAddr,
    payload_type: u8,
    ssrc: u32,
    seq: u16,
    ts: u32,
}

/// 送信側カウンタを一元管理するハンドル。呼ごとに Start で登録して使う。
#[derive(Clone)]
pub struct MediaTxHandle {
    tx: mpsc::Sender<MediaTxCommand>,
}

impl MediaTxHandle {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(TX_CHANNEL_CAPACITY);
        tokio::spawn(async move { run_tx(rx).await });
        Self { tx }
    }

    pub fn generate_ssrc() -> u32 {
        rand::thread_rng().gen()
    }

    pub fn start(&self, key: String, dst: SocketAddr, payload_type: u8, ssrc: u32) {
        if let Err(err) = self.tx.try_send(MediaTxCommand::Start {
            key,
            dst,
            payload_type,
            ssrc,
        }) {
            log::warn!("[media tx] drop Start command (channel full): {:?}", err);
        }
    }

    pub fn stop(&self, key: &str) {
        if let Err(err) = self.tx.try_send(MediaTxCommand::Stop {
            key: key.to_string(),
        }) {
            log::warn!("[media tx] drop Stop command (channel full): {:?}", err);
        }
    }

    pub fn send_frame(&self, key: &str, payload: Vec<u8>) {
        let _ = self.tx.try_send(MediaTxCommand::SendFrame {
            key: key.to_string(),
            payload,
        });
    }
}

impl Default for MediaTxHandle {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_tx(mut rx: mpsc::Receiver<MediaTxCommand>) {
    let mut sock: Option<UdpSocket> = None;
    let mut streams: HashMap<String, TxStream> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            MediaTxCommand::Start {
                key,
                dst,
                payload_type,
                ssrc,
            } => {
                streams.insert(
                    key,
                    TxStream {
                        dst,
                        payload_type,
                        ssrc,
                        seq: 0,
                        ts: 0,
                    },
                );
                if sock.is_none() {
                    match UdpSocket::bind("0.0.0.0:0").await {
                        Ok(s) => sock = Some(s),
                        Err(e) => {
                            log::warn!("[media tx] failed to bind socket: {e:?}");
                        }
                    }
                }
            }
            MediaTxCommand::Stop { key } => {
                streams.remove(&key);
                if streams.is_empty() {
                    sock = None;
                }
            }
            MediaTxCommand::SendFrame { key, payload } => {
                let Some(s) = sock.as_ref() else {
                    log::warn!("[media tx] send requested but no socket");
                    continue;
                };
                let Some(stream) = streams.get_mut(&key) else {
                    log::warn!("[media tx] send requested but stream key not found");
                    continue;
                };
                let sample_count = payload.len() as u32;
                let pkt = RtpPacket::new(
                    stream.payload_type,
                    stream.seq,
                    stream.ts,
                    stream.ssrc,
                    payload,
                );
                let bytes = build_rtp_packet(&pkt);
                // 送信後に進める（seq は 2^16、ts は 2^32 で wrap）
                stream.seq = stream.seq.wrapping_add(1);
                stream.ts = stream.ts.wrapping_add(sample_count);
                let _ = s.send_to(&bytes, stream.dst).await.ok();
            }
        }
    }
}
