use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::protocol::esl::{read_event_frame, write_event_frame, FrameError};
use crate::protocol::rtp::demux::{MediaDemux, ResolveOutcome};
use crate::protocol::rtp::parse_rtp_packet;
use crate::service::gateway::GatewayController;
use crate::session::{SessionIn, SessionRegistry};

const MEDIA_RECV_BUF: usize = 2_048;
const BINDING_IDLE_EVICT: Duration = Duration::from_secs(60);

/// メディアUDPループ。受信 → ヘッダ復号 → demux で呼を引いて session へ流す。
/// 復号失敗や束縛違反はそのフレームだけを捨てて続行する。
pub async fn run_media_loop(
    sock: UdpSocket,
    demux: MediaDemux,
    registry: SessionRegistry,
) -> std::io::Result<()> {
    let local = sock.local_addr()?;
    log::info!("[transport] media UDP on {}", local);
    let mut buf = vec![0u8; MEDIA_RECV_BUF];
    let mut evict_tick = interval(BINDING_IDLE_EVICT);
    evict_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            recv_res = sock.recv_from(&mut buf) => {
                let (len, src) = recv_res?;
                let data = &buf[..len];
                let pkt = match parse_rtp_packet(data) {
                    Ok(pkt) => pkt,
                    Err(e) => {
                        log::warn!("[transport] media decode error from {}: {}", src, e);
                        continue;
                    }
                };
                match demux.resolve(pkt.ssrc, src).await {
                    ResolveOutcome::Bound(call_id) => {
                        if !demux.accept_seq(&call_id, pkt.sequence_number).await {
                            log::debug!(
                                "[transport] drop late/dup seq={} call_id={}",
                                pkt.sequence_number,
                                call_id
                            );
                            continue;
                        }
                        if let Some(handle) = registry.get(&call_id).await {
                            let ev = SessionIn::MediaFrame {
                                seq: pkt.sequence_number,
                                payload_type: pkt.payload_type,
                                payload: pkt.payload,
                            };
                            if handle.control_tx.try_send(ev).is_err() {
                                log::warn!(
                                    "[transport] session channel full, frame dropped call_id={}",
                                    call_id
                                );
                            }
                        }
                    }
                    ResolveOutcome::Foreign => {
                        // demux 側で警告済み。処理しない。
                    }
                    ResolveOutcome::Unbound => {
                        demux.buffer_pending(src, data.to_vec()).await;
                    }
                }
            }
            _ = evict_tick.tick() => {
                demux.evict_idle(BINDING_IDLE_EVICT).await;
            }
        }
    }
}

/// チャネルA: 改行区切り JSON を受けて1行ステータスを返す。
pub async fn run_switch_event_loop(
    listener: TcpListener,
    controller: GatewayController,
) -> std::io::Result<()> {
    log::info!("[transport] switch event TCP on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("[transport] switch event conn from {}", peer);
        let controller = controller.clone();
        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let reply = controller.handle_switch_line(&line).await;
                        if write_half
                            .write_all(format!("{reply}\n").as_bytes())
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("[transport] switch event read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            log::info!("[transport] switch event conn closed {}", peer);
        });
    }
}

/// チャネルB: アプリ側ソケット。JSON 行 ⇄ JSON 行。
pub async fn run_app_event_loop(
    listener: TcpListener,
    controller: GatewayController,
) -> std::io::Result<()> {
    log::info!("[transport] app event TCP on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("[transport] app event conn from {}", peer);
        let controller = controller.clone();
        tokio::spawn(async move {
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let reply = controller.handle_app_line(&line).await;
                if write_half
                    .write_all(format!("{reply}\n").as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
            log::info!("[transport] app event conn closed {}", peer);
        });
    }
}

/// ESL 形式のイベントソケット。フレーム読取 → 制御イベント変換 → 応答フレーム。
/// フレーム途中での切断はその接続だけの致命エラーとして閉じる。
pub async fn run_esl_event_loop(
    listener: TcpListener,
    controller: GatewayController,
) -> std::io::Result<()> {
    log::info!("[transport] esl event TCP on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("[transport] esl conn from {}", peer);
        let controller = controller.clone();
        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut writer = BufWriter::new(write_half);
            loop {
                match read_event_frame(&mut reader).await {
                    Ok(frame) => {
                        let reply = controller.handle_esl_frame(&frame).await;
                        if write_event_frame(&mut writer, &reply).await.is_err() {
                            break;
                        }
                    }
                    Err(FrameError::Eof) => {
                        log::info!("[transport] esl conn closed {}", peer);
                        break;
                    }
                    Err(e) => {
                        log::warn!("[transport] esl frame error from {}: {}", peer, e);
                        break;
                    }
                }
            }
        });
    }
}
