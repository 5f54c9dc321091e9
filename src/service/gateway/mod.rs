use std::net::SocketAddr;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::protocol::esl::EventFrame;
use crate::protocol::rtp::demux::MediaDemux;
use crate::protocol::rtp::parse_rtp_packet;
use crate::protocol::rtp::tx::MediaTxHandle;
use crate::session::{
    spawn_session, CallId, ClientId, SessionDeps, SessionIn, SessionOut, SessionRegistry,
};

const OUTBOUND_PAYLOAD_TYPE: u8 = 0; // PCMU

/// 制御プレーン（チャネルA/B・ESLイベント）のメッセージを
/// セッションのライフサイクル操作へ写す。
#[derive(Clone)]
pub struct GatewayController {
    registry: SessionRegistry,
    demux: MediaDemux,
    deps: SessionDeps,
    session_out_tx: mpsc::Sender<SessionOut>,
}

/// チャネルA: 改行区切り JSON のイベント
#[derive(Debug, Deserialize)]
struct SwitchEvent {
    event: String,
    uuid: String,
    call_id: Option<String>,
    client_id: Option<String>,
    media_host: Option<String>,
    media_port: Option<u16>,
    ssrc: Option<u32>,
}

/// チャネルB: アプリ側のメッセージ
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AppMessage {
    #[serde(rename = "init")]
    Init {
        client_id: String,
        call_id: Option<String>,
        caller_number: Option<String>,
    },
    #[serde(rename = "call_end")]
    CallEnd { call_id: String },
}

impl GatewayController {
    pub fn new(
        registry: SessionRegistry,
        demux: MediaDemux,
        deps: SessionDeps,
        session_out_tx: mpsc::Sender<SessionOut>,
    ) -> Self {
        Self {
            registry,
            demux,
            deps,
            session_out_tx,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn demux(&self) -> &MediaDemux {
        &self.demux
    }

    /// チャネルAの1行を処理して1行のステータス応答を返す。
    /// プロトコル違反はその行だけを拒否し、接続は維持される。
    pub async fn handle_switch_line(&self, line: &str) -> String {
        let ev: SwitchEvent = match serde_json::from_str(line.trim()) {
            Ok(ev) => ev,
            Err(e) => {
                log::warn!("[gateway] bad switch event json: {}", e);
                return "-ERR invalid json".to_string();
            }
        };
        self.handle_switch_event(ev).await
    }

    async fn handle_switch_event(&self, ev: SwitchEvent) -> String {
        match ev.event.as_str() {
            "call_start" => {
                let call_id = match ev.call_id {
                    Some(id) => match CallId::new(id) {
                        Ok(id) => id,
                        Err(_) => return "-ERR empty call_id".to_string(),
                    },
                    None => CallId::generate(),
                };
                if self.registry.get(&call_id).await.is_some() {
                    return format!("-ERR call {call_id} already active");
                }
                let client_id = ev.client_id.map(ClientId::new);
                let handle = spawn_session(
                    call_id.clone(),
                    client_id,
                    Some(ev.uuid),
                    &self.registry,
                    self.deps.clone(),
                    self.session_out_tx.clone(),
                )
                .await;

                if let (Some(host), Some(port)) = (ev.media_host, ev.media_port) {
                    match format!("{host}:{port}").parse::<SocketAddr>() {
                        Ok(addr) => {
                            self.bind_media(&call_id, ev.ssrc, addr, &handle).await;
                        }
                        Err(e) => {
                            log::warn!(
                                "[gateway] invalid media addr for call_id={}: {}",
                                call_id,
                                e
                            );
                        }
                    }
                }
                format!("+OK {call_id}")
            }
            "call_end" => {
                let Some(call_id) = ev.call_id.and_then(|id| CallId::new(id).ok()) else {
                    return "-ERR missing call_id".to_string();
                };
                // 既に終了済みの呼への call_end は no-op（冪等）
                if let Some(handle) = self.registry.get(&call_id).await {
                    let _ = handle.control_tx.send(SessionIn::End).await;
                }
                format!("+OK {call_id}")
            }
            other => {
                // 汎用のチャネル/アプリケーションイベント転送
                if let Some(call_id) = ev.call_id.and_then(|id| CallId::new(id).ok()) {
                    if let Some(handle) = self.registry.get(&call_id).await {
                        let _ = handle
                            .control_tx
                            .send(SessionIn::SwitchUuidChanged {
                                switch_uuid: ev.uuid,
                            })
                            .await;
                        return format!("+OK {other}");
                    }
                }
                log::debug!("[gateway] forwarded event {} without session", other);
                format!("+OK {other}")
            }
        }
    }

    /// メディア束縛を確定し、溜まっていた未割り当てフレームを順に流し込む。
    async fn bind_media(
        &self,
        call_id: &CallId,
        ssrc: Option<u32>,
        addr: SocketAddr,
        handle: &crate::session::SessionHandle,
    ) {
        let pending = self.demux.bind(call_id.clone(), ssrc, addr).await;
        self.deps.media_tx.start(
            call_id.to_string(),
            addr,
            OUTBOUND_PAYLOAD_TYPE,
            MediaTxHandle::generate_ssrc(),
        );
        for raw in pending {
            match parse_rtp_packet(&raw) {
                Ok(pkt) => {
                    if !self.demux.accept_seq(call_id, pkt.sequence_number).await {
                        continue;
                    }
                    let _ = handle
                        .control_tx
                        .send(SessionIn::MediaFrame {
                            seq: pkt.sequence_number,
                            payload_type: pkt.payload_type,
                            payload: pkt.payload,
                        })
                        .await;
                }
                Err(e) => {
                    log::warn!(
                        "[gateway] pending frame parse error for call_id={}: {}",
                        call_id,
                        e
                    );
                }
            }
        }
    }

    /// チャネルBの1行を処理してJSON応答を返す。
    pub async fn handle_app_line(&self, line: &str) -> String {
        let msg: AppMessage = match serde_json::from_str(line.trim()) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("[gateway] bad app message json: {}", e);
                return r#"{"ok":false,"error":"invalid json"}"#.to_string();
            }
        };
        match msg {
            AppMessage::Init {
                client_id,
                call_id,
                caller_number,
            } => {
                let Some(call_id) = call_id.and_then(|id| CallId::new(id).ok()) else {
                    return r#"{"ok":false,"error":"missing call_id"}"#.to_string();
                };
                let Some(handle) = self.registry.get(&call_id).await else {
                    return r#"{"ok":false,"error":"unknown call"}"#.to_string();
                };
                let _ = handle
                    .control_tx
                    .send(SessionIn::AppInit {
                        client_id: ClientId::new(client_id),
                        caller_number,
                    })
                    .await;
                r#"{"ok":true}"#.to_string()
            }
            AppMessage::CallEnd { call_id } => {
                let Some(call_id) = CallId::new(call_id).ok() else {
                    return r#"{"ok":false,"error":"missing call_id"}"#.to_string();
                };
                // アプリ起点の終了は交換機側の切断も必要なので Hangup 経路
                if let Some(handle) = self.registry.get(&call_id).await {
                    let _ = handle.control_tx.send(SessionIn::Hangup).await;
                }
                r#"{"ok":true}"#.to_string()
            }
        }
    }

    /// ESL イベントソケットからの1フレームを処理し、応答フレームを返す。
    /// Event-Name を制御イベントへ写し替える。
    pub async fn handle_esl_frame(&self, frame: &EventFrame) -> EventFrame {
        let event = frame.get("event-name").unwrap_or_default().to_string();
        let uuid = frame.get("unique-id").unwrap_or_default().to_string();
        let ev = SwitchEvent {
            event: event.to_ascii_lowercase(),
            uuid,
            call_id: frame.get("call-id").map(str::to_string),
            client_id: frame.get("client-id").map(str::to_string),
            media_host: frame.get("media-host").map(str::to_string),
            media_port: frame.get("media-port").and_then(|v| v.parse().ok()),
            ssrc: frame.get("ssrc").and_then(|v| v.parse().ok()),
        };
        let status = if ev.event.is_empty() {
            "-ERR missing event-name".to_string()
        } else {
            self.handle_switch_event(ev).await
        };
        let mut reply = EventFrame::new();
        reply.insert("content-type", "command/reply");
        reply.insert("reply-text", status);
        reply
    }
}
