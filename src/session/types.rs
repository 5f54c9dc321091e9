use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

pub use crate::shared::entities::{CallId, ClientId, SwitchUuid};

/// session へ入るイベント（transport・ASR・timer・制御プレーンからの入力）
#[derive(Debug)]
pub enum SessionIn {
    /// 復号前のメディアペイロード（demux 通過済み）
    MediaFrame {
        seq: u16,
        payload_type: u8,
        payload: Vec<u8>,
    },
    /// 認識器の中間結果
    RecogInterim { text: String, confidence: f32 },
    /// 認識器の確定結果
    RecogFinal { text: String, confidence: f32 },
    /// 認識ストリームの回復不能な停止（再試行枯渇または恒久エラー）
    RecogUnavailable { reason: String },
    /// 非同期合成の完了（8kHz μ-law）。low_latency は相槌などの即時再生用。
    SynthDone {
        text: String,
        audio: Vec<u8>,
        low_latency: bool,
    },
    SynthFailed { text: String, reason: String },
    /// アプリ側からのテナント束縛
    AppInit {
        client_id: ClientId,
        caller_number: Option<String>,
    },
    /// 交換機チャネルIDの差し替え（park/bridge 間の移動）
    SwitchUuidChanged { switch_uuid: SwitchUuid },
    NoInputTimeout,
    AutoHangupTimeout,
    /// 明示的な切断要求（制御プレーン・アプリのどちらからでも）
    Hangup,
    /// call_end イベントによる終了
    End,
}

/// session → orchestrator への通知
#[derive(Debug)]
pub enum SessionOut {
    /// teardown 完了。registry / demux からの除去はこれを受けて行う。
    Ended { call_id: CallId },
    Metrics { name: &'static str, value: i64 },
}

#[derive(Clone)]
pub struct SessionHandle {
    pub control_tx: mpsc::Sender<SessionIn>,
}

/// プロセス全体で唯一の可変構造。main で一度だけ作り参照で配る。
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<CallId, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call_id: CallId, handle: SessionHandle) -> Option<SessionHandle> {
        self.inner.lock().await.insert(call_id, handle)
    }

    pub async fn get(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.inner.lock().await.get(call_id).cloned()
    }

    pub async fn remove(&self, call_id: &CallId) -> Option<SessionHandle> {
        self.inner.lock().await.remove(call_id)
    }

    pub async fn list(&self) -> Vec<CallId> {
        self.inner.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_insert_get_remove() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let call_id = CallId::new("c1").unwrap();
        registry
            .insert(call_id.clone(), SessionHandle { control_tx: tx })
            .await;
        assert!(registry.get(&call_id).await.is_some());
        assert_eq!(registry.len().await, 1);
        registry.remove(&call_id).await;
        assert!(registry.get(&call_id).await.is_none());
        assert!(registry.is_empty().await);
    }
}
