use tokio::sync::mpsc;

use crate::shared::error::RecognitionError;

use super::PortFuture;

/// ストリーム開始時に一度だけ送る認識設定。
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionConfig {
    pub language: String,
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
    pub phrase_hints: Vec<String>,
    pub interim_results: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    Linear16,
}

/// ストリームに流すメッセージ。設定は必ず先頭の一度だけ、以降は音声のみ。
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Config(RecognitionConfig),
    Audio(Vec<u8>),
}

impl StreamMessage {
    pub fn is_config(&self) -> bool {
        matches!(self, StreamMessage::Config(_))
    }
}

/// 認識側から届くイベント。
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    Interim { text: String, confidence: f32 },
    Final { text: String, confidence: f32 },
    /// ストリームが相手側から閉じられた。エラーなしは正常終了。
    Closed { error: Option<String> },
}

/// 開いた双方向ストリームの両端。audio_tx を drop すると half-close になる。
pub struct RecognizerStream {
    pub audio_tx: mpsc::Sender<StreamMessage>,
    pub events: mpsc::Receiver<RecognizerEvent>,
}

pub trait RecognizerPort: Send + Sync {
    fn open_stream(
        &self,
        config: RecognitionConfig,
    ) -> PortFuture<Result<RecognizerStream, RecognitionError>>;
}

/// 認識バックエンド未設定の環境向け。開けないので上位は再試行の後
/// 警告トーン経路へフォールバックする。
pub struct NoopRecognizer;

impl RecognizerPort for NoopRecognizer {
    fn open_stream(
        &self,
        _config: RecognitionConfig,
    ) -> PortFuture<Result<RecognizerStream, RecognitionError>> {
        Box::pin(async {
            Err(RecognitionError::OpenFailed(
                "recognizer backend not configured".to_string(),
            ))
        })
    }
}
