use std::time::Duration;

use crate::shared::error::SynthError;

use super::PortFuture;

const SYNTH_TEXT_MAX_CHARS: usize = 500;

/// 合成結果は 8kHz μ-law バイト列（そのままトランスポートフレームに刻める形）。
pub trait SynthPort: Send + Sync {
    fn synthesize(&self, call_id: String, text: String)
        -> PortFuture<Result<Vec<u8>, SynthError>>;
}

pub struct HttpSynthPort {
    base_url: String,
    timeout: Duration,
}

impl HttpSynthPort {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self { base_url, timeout }
    }
}

impl SynthPort for HttpSynthPort {
    fn synthesize(
        &self,
        call_id: String,
        text: String,
    ) -> PortFuture<Result<Vec<u8>, SynthError>> {
        let url = self.base_url.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            if text.chars().count() > SYNTH_TEXT_MAX_CHARS {
                return Err(SynthError::TextTooLong);
            }
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| SynthError::SynthesisFailed(e.to_string()))?;
            let payload = serde_json::json!({
                "callId": call_id,
                "text": text,
                "sampleRate": 8000,
                "encoding": "mulaw",
            });
            let resp = client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| SynthError::SynthesisFailed(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(SynthError::ServiceUnavailable);
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| SynthError::SynthesisFailed(e.to_string()))?;
            Ok(bytes.to_vec())
        })
    }
}

/// TTS未設定の環境向け。呼び出しは常に失敗し、上位で警告トーンにフォールバックする。
pub struct NoopSynth;

impl SynthPort for NoopSynth {
    fn synthesize(
        &self,
        _call_id: String,
        _text: String,
    ) -> PortFuture<Result<Vec<u8>, SynthError>> {
        Box::pin(async { Err(SynthError::ServiceUnavailable) })
    }
}
