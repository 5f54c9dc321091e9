use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::types::{CallId, SessionIn};
use crate::shared::config::AsrConfig;
use crate::shared::error::{FailureClass, RecognitionError};
use crate::shared::ports::recognizer::{
    AudioEncoding, RecognitionConfig, RecognizerEvent, RecognizerPort, RecognizerStream,
    StreamMessage,
};

const FEED_CHANNEL_CAPACITY: usize = 64;
const FEED_SEND_TIMEOUT: Duration = Duration::from_millis(100);
const BACKOFF_TABLE: &[Duration] = &[
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// 2文字未満でもノイズ扱いしない相槌・言い淀みの類。
/// これらは「聞こえなかった」扱いで対話側へ渡す。
const AMBIGUOUS_UTTERANCES: &[&str] = &["あ", "え", "ん", "は", "と"];

#[derive(Debug)]
pub enum AsrCommand {
    Feed(StreamMessage),
    End,
}

/// worker の生存状態
struct WorkerHandle {
    feed_tx: mpsc::Sender<AsrCommand>,
    join: JoinHandle<()>,
}

/// 呼ごとの認識セッション管理。IDLE → CONNECTING → STREAMING →
/// (ENDING|FAILED) → IDLE を worker タスクが辿る。生きている worker は
/// 常に最大ひとつで、生存中の enable は no-op。
pub struct RecognitionManager {
    call_id: CallId,
    recognizer: Arc<dyn RecognizerPort>,
    session_tx: mpsc::Sender<SessionIn>,
    cfg: AsrConfig,
    worker: Option<WorkerHandle>,
}

impl RecognitionManager {
    pub fn new(
        call_id: CallId,
        recognizer: Arc<dyn RecognizerPort>,
        session_tx: mpsc::Sender<SessionIn>,
        cfg: AsrConfig,
    ) -> Self {
        Self {
            call_id,
            recognizer,
            session_tx,
            cfg,
            worker: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.worker.is_some()
    }

    /// worker を起動する。既に生きていれば何もしない。
    pub fn enable(&mut self) {
        if let Some(handle) = &self.worker {
            if !handle.join.is_finished() {
                log::debug!("[asr {}] enable ignored, worker alive", self.call_id);
                return;
            }
        }
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let worker = StreamWorker {
            call_id: self.call_id.clone(),
            recognizer: self.recognizer.clone(),
            session_tx: self.session_tx.clone(),
            cfg: self.cfg.clone(),
        };
        let join = tokio::spawn(async move { worker.run(feed_rx).await });
        self.worker = Some(WorkerHandle { feed_tx, join });
        log::info!("[asr {}] recognition enabled", self.call_id);
    }

    /// 16kHz linear16 のチャンクを流す。未接続分は worker 側で
    /// プリストリームバッファに積まれ、開通後に時系列順で吐き出される。
    pub async fn feed(&mut self, pcm: &[i16]) {
        let Some(handle) = &self.worker else {
            log::debug!("[asr {}] feed dropped, not enabled", self.call_id);
            return;
        };
        let mut bytes = Vec::with_capacity(pcm.len() * 2);
        for &s in pcm {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        // 背圧は短いタイムアウト付き送信で受ける。詰まったら1チャンク落とす。
        if let Err(err) = handle
            .feed_tx
            .send_timeout(
                AsrCommand::Feed(StreamMessage::Audio(bytes)),
                FEED_SEND_TIMEOUT,
            )
            .await
        {
            log::warn!("[asr {}] feed dropped (backpressure): {:?}", self.call_id, err);
        }
    }

    /// half-close を送り、worker をタイムアウト付きで join する。
    /// 二重呼び出しは no-op。
    pub async fn end(&mut self, join_timeout: Duration) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let _ = handle.feed_tx.send(AsrCommand::End).await;
        match tokio::time::timeout(join_timeout, handle.join).await {
            Ok(Ok(())) => {
                log::debug!("[asr {}] worker joined", self.call_id);
            }
            Ok(Err(e)) => {
                log::warn!("[asr {}] worker join error: {:?}", self.call_id, e);
            }
            Err(_) => {
                log::warn!("[asr {}] worker join timed out", self.call_id);
            }
        }
    }
}

struct StreamWorker {
    call_id: CallId,
    recognizer: Arc<dyn RecognizerPort>,
    session_tx: mpsc::Sender<SessionIn>,
    cfg: AsrConfig,
}

enum AttemptEnd {
    /// half-close 済みで正常終了
    Ended,
    /// 一時エラー。再試行対象。
    Transient(String),
    /// 再試行しない
    Permanent(String),
}

impl StreamWorker {
    fn recognition_config(&self) -> RecognitionConfig {
        RecognitionConfig {
            language: self.cfg.language.clone(),
            sample_rate: self.cfg.sample_rate,
            encoding: AudioEncoding::Linear16,
            phrase_hints: Vec::new(),
            interim_results: true,
        }
    }

    async fn run(self, mut feed_rx: mpsc::Receiver<AsrCommand>) {
        let mut capture = CaptureSink::open(&self.cfg, &self.call_id);
        let mut prestream: VecDeque<StreamMessage> = VecDeque::new();
        let mut prestream_bytes = 0usize;
        let mut attempts: u32 = 0;
        let mut ended = false;

        'supervise: loop {
            // CONNECTING
            let stream = match self.recognizer.open_stream(self.recognition_config()).await {
                Ok(stream) => stream,
                Err(err) => {
                    match err.classify() {
                        FailureClass::Permanent => {
                            self.notify_unavailable(format!("open failed: {err}")).await;
                            break 'supervise;
                        }
                        FailureClass::Transient => {
                            attempts += 1;
                            if attempts > self.cfg.max_recovery_attempts {
                                self.notify_unavailable(format!(
                                    "retries exhausted after {attempts} attempts: {err}"
                                ))
                                .await;
                                break 'supervise;
                            }
                            let delay = backoff_delay(attempts);
                            log::warn!(
                                "[asr {}] open failed (attempt {}), retrying in {:?}: {}",
                                self.call_id,
                                attempts,
                                delay,
                                err
                            );
                            if self
                                .buffer_during_backoff(
                                    &mut feed_rx,
                                    &mut prestream,
                                    &mut prestream_bytes,
                                    delay,
                                )
                                .await
                            {
                                break 'supervise;
                            }
                            continue 'supervise;
                        }
                    }
                }
            };

            // STREAMING
            match self
                .pump_stream(
                    stream,
                    &mut feed_rx,
                    &mut prestream,
                    &mut prestream_bytes,
                    &mut capture,
                )
                .await
            {
                AttemptEnd::Ended => {
                    ended = true;
                    break 'supervise;
                }
                AttemptEnd::Permanent(reason) => {
                    self.notify_unavailable(reason).await;
                    break 'supervise;
                }
                AttemptEnd::Transient(reason) => {
                    attempts += 1;
                    if attempts > self.cfg.max_recovery_attempts {
                        self.notify_unavailable(format!(
                            "retries exhausted after {attempts} attempts: {reason}"
                        ))
                        .await;
                        break 'supervise;
                    }
                    let delay = backoff_delay(attempts);
                    log::warn!(
                        "[asr {}] stream failed (attempt {}), restart in {:?}: {}",
                        self.call_id,
                        attempts,
                        delay,
                        reason
                    );
                    if self
                        .buffer_during_backoff(
                            &mut feed_rx,
                            &mut prestream,
                            &mut prestream_bytes,
                            delay,
                        )
                        .await
                    {
                        break 'supervise;
                    }
                }
            }
        }

        // 終了経路に関わらず必ず finalize する
        capture.finalize(&self.call_id);
        if ended {
            log::info!("[asr {}] worker ended", self.call_id);
        }
    }

    /// ストリーム1世代分のポンプ。設定が先頭、その後は音声のみという
    /// プロトコル不変条件はここで守る。
    async fn pump_stream(
        &self,
        mut stream: RecognizerStream,
        feed_rx: &mut mpsc::Receiver<AsrCommand>,
        prestream: &mut VecDeque<StreamMessage>,
        prestream_bytes: &mut usize,
        capture: &mut CaptureSink,
    ) -> AttemptEnd {
        // 設定メッセージは必ず最初の一度だけ
        if stream
            .audio_tx
            .send(StreamMessage::Config(self.recognition_config()))
            .await
            .is_err()
        {
            return AttemptEnd::Transient("stream closed before config".to_string());
        }

        // プリストリームバッファを時系列順でフラッシュ。
        // 設定型のメッセージが紛れていても再送せず捨てる。
        while let Some(msg) = prestream.pop_front() {
            if msg.is_config() {
                log::warn!(
                    "[asr {}] dropping buffered config-shaped message",
                    self.call_id
                );
                continue;
            }
            if let StreamMessage::Audio(bytes) = &msg {
                *prestream_bytes = prestream_bytes.saturating_sub(bytes.len());
                capture.push(bytes);
            }
            if stream.audio_tx.send(msg).await.is_err() {
                return AttemptEnd::Transient("stream closed during prestream flush".to_string());
            }
        }

        let mut partial = String::new();
        loop {
            tokio::select! {
                cmd = feed_rx.recv() => {
                    match cmd {
                        Some(AsrCommand::Feed(msg)) => {
                            if msg.is_config() {
                                log::warn!(
                                    "[asr {}] dropping late config-shaped message",
                                    self.call_id
                                );
                                continue;
                            }
                            if let StreamMessage::Audio(bytes) = &msg {
                                capture.push(bytes);
                            }
                            if stream.audio_tx.send(msg).await.is_err() {
                                return AttemptEnd::Transient(
                                    "stream closed while feeding".to_string(),
                                );
                            }
                        }
                        Some(AsrCommand::End) | None => {
                            // half-close して残イベントを引き切る
                            drop(stream.audio_tx);
                            return self.drain_after_half_close(stream.events, &mut partial).await;
                        }
                    }
                }
                ev = stream.events.recv() => {
                    match ev {
                        Some(RecognizerEvent::Interim { text, confidence }) => {
                            partial = text.clone();
                            let _ = self
                                .session_tx
                                .send(SessionIn::RecogInterim { text, confidence })
                                .await;
                        }
                        Some(RecognizerEvent::Final { text, confidence }) => {
                            self.deliver_final(&mut partial, text, confidence).await;
                        }
                        Some(RecognizerEvent::Closed { error }) => {
                            return match error {
                                None => AttemptEnd::Transient(
                                    "stream closed by remote".to_string(),
                                ),
                                Some(reason) => self.classify_close(reason),
                            };
                        }
                        None => {
                            return AttemptEnd::Transient("event channel closed".to_string());
                        }
                    }
                }
            }
        }
    }

    async fn drain_after_half_close(
        &self,
        mut events: mpsc::Receiver<RecognizerEvent>,
        partial: &mut String,
    ) -> AttemptEnd {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(RecognizerEvent::Final { text, confidence })) => {
                    self.deliver_final(partial, text, confidence).await;
                }
                Ok(Some(RecognizerEvent::Interim { text, .. })) => {
                    *partial = text;
                }
                Ok(Some(RecognizerEvent::Closed { .. })) | Ok(None) => break,
                Err(_) => {
                    log::warn!("[asr {}] drain timed out after half-close", self.call_id);
                    break;
                }
            }
        }
        AttemptEnd::Ended
    }

    /// 確定結果を溜まっていた中間結果とマージし、整形して一度だけ渡す。
    async fn deliver_final(&self, partial: &mut String, text: String, confidence: f32) {
        let merged = if text.trim().is_empty() {
            partial.trim().to_string()
        } else {
            text.trim().to_string()
        };
        partial.clear();

        if merged.chars().count() < 2 {
            if AMBIGUOUS_UTTERANCES.contains(&merged.as_str()) {
                // 曖昧発話は破棄せず「聞こえなかった」として渡す
                let _ = self
                    .session_tx
                    .send(SessionIn::RecogFinal {
                        text: String::new(),
                        confidence,
                    })
                    .await;
            } else {
                log::debug!("[asr {}] noise final dropped: {:?}", self.call_id, merged);
            }
            return;
        }

        let _ = self
            .session_tx
            .send(SessionIn::RecogFinal {
                text: merged,
                confidence,
            })
            .await;
    }

    fn classify_close(&self, reason: String) -> AttemptEnd {
        let err = RecognitionError::StreamClosed(reason.clone());
        match err.classify() {
            FailureClass::Permanent => AttemptEnd::Permanent(reason),
            FailureClass::Transient => AttemptEnd::Transient(reason),
        }
    }

    /// バックオフ待機中も feed は受け続け、プリストリームに積む。
    /// End を受けたら true を返して監督ループを抜けさせる。
    async fn buffer_during_backoff(
        &self,
        feed_rx: &mut mpsc::Receiver<AsrCommand>,
        prestream: &mut VecDeque<StreamMessage>,
        prestream_bytes: &mut usize,
        delay: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            match tokio::time::timeout_at(deadline, feed_rx.recv()).await {
                Ok(Some(AsrCommand::Feed(msg))) => {
                    push_prestream(prestream, prestream_bytes, msg, self.cfg.prestream_buffer_max);
                }
                Ok(Some(AsrCommand::End)) | Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    async fn notify_unavailable(&self, reason: String) {
        log::warn!("[asr {}] recognition unavailable: {}", self.call_id, reason);
        let _ = self
            .session_tx
            .send(SessionIn::RecogUnavailable { reason })
            .await;
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let idx = (attempt.saturating_sub(1) as usize).min(BACKOFF_TABLE.len() - 1);
    BACKOFF_TABLE[idx]
}

/// プリストリームは時間上限（バイト換算）付き。溢れたら古い方から捨てる。
fn push_prestream(
    prestream: &mut VecDeque<StreamMessage>,
    prestream_bytes: &mut usize,
    msg: StreamMessage,
    max_bytes: usize,
) {
    if let StreamMessage::Audio(bytes) = &msg {
        *prestream_bytes += bytes.len();
    }
    prestream.push_back(msg);
    while *prestream_bytes > max_bytes {
        match prestream.pop_front() {
            Some(StreamMessage::Audio(bytes)) => {
                *prestream_bytes = prestream_bytes.saturating_sub(bytes.len());
            }
            Some(_) => {}
            None => break,
        }
    }
}

/// 認識器へ送った音声のデバッグ用キャプチャ（有効時のみWAVに残す）。
struct CaptureSink {
    writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>>,
}

impl CaptureSink {
    fn open(cfg: &AsrConfig, call_id: &CallId) -> Self {
        if !cfg.capture_enabled {
            return Self { writer: None };
        }
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: cfg.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = format!("{}/asr_capture_{}.wav", cfg.capture_dir, call_id);
        match hound::WavWriter::create(&path, spec) {
            Ok(writer) => Self {
                writer: Some(writer),
            },
            Err(e) => {
                log::warn!("[asr {}] capture open failed ({}): {:?}", call_id, path, e);
                Self { writer: None }
            }
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for pair in bytes.chunks_exact(2) {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            if writer.write_sample(sample).is_err() {
                self.writer = None;
                return;
            }
        }
    }

    fn finalize(&mut self, call_id: &CallId) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                log::warn!("[asr {}] capture finalize failed: {:?}", call_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::shared::ports::PortFuture;

    fn test_cfg() -> AsrConfig {
        AsrConfig {
            language: "ja-JP".to_string(),
            sample_rate: 16_000,
            max_recovery_attempts: 2,
            prestream_buffer_max: 9_600,
            capture_enabled: false,
            capture_dir: "/tmp".to_string(),
        }
    }

    fn call(id: &str) -> CallId {
        CallId::new(id).unwrap()
    }

    /// スクリプト駆動のダミー認識器。開いたストリームの送信側を記録する。
    struct ScriptedRecognizer {
        open_failures: AtomicU32,
        fail_with: String,
        received: Arc<Mutex<Vec<StreamMessage>>>,
        event_feeders: Mutex<Vec<mpsc::Sender<RecognizerEvent>>>,
    }

    impl ScriptedRecognizer {
        fn new() -> Self {
            Self {
                open_failures: AtomicU32::new(0),
                fail_with: String::new(),
                received: Arc::new(Mutex::new(Vec::new())),
                event_feeders: Mutex::new(Vec::new()),
            }
        }

        fn failing(times: u32, message: &str) -> Self {
            let s = Self::new();
            s.open_failures.store(times, Ordering::SeqCst);
            Self {
                fail_with: message.to_string(),
                ..s
            }
        }

        async fn event_tx(&self) -> mpsc::Sender<RecognizerEvent> {
            loop {
                if let Some(tx) = self.event_feeders.lock().unwrap().last().cloned() {
                    return tx;
                }
                tokio::task::yield_now().await;
            }
        }
    }

    impl RecognizerPort for ScriptedRecognizer {
        fn open_stream(
            &self,
            _config: RecognitionConfig,
        ) -> PortFuture<Result<RecognizerStream, RecognitionError>> {
            let remaining = self.open_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.open_failures.store(remaining - 1, Ordering::SeqCst);
                let msg = self.fail_with.clone();
                return Box::pin(async move { Err(RecognitionError::OpenFailed(msg)) });
            }
            let (audio_tx, mut audio_rx) = mpsc::channel::<StreamMessage>(64);
            let (event_tx, event_rx) = mpsc::channel(64);
            self.event_feeders.lock().unwrap().push(event_tx.clone());
            let received = self.received.clone();
            tokio::spawn(async move {
                while let Some(msg) = audio_rx.recv().await {
                    received.lock().unwrap().push(msg);
                }
                // half-close されたら正常クローズを流す
                let _ = event_tx.send(RecognizerEvent::Closed { error: None }).await;
            });
            Box::pin(async move {
                Ok(RecognizerStream {
                    audio_tx,
                    events: event_rx,
                })
            })
        }
    }

    async fn recv_final(rx: &mut mpsc::Receiver<SessionIn>) -> Option<(String, f32)> {
        while let Some(ev) = rx.recv().await {
            if let SessionIn::RecogFinal { text, confidence } = ev {
                return Some((text, confidence));
            }
        }
        None
    }

    #[tokio::test]
    async fn config_is_first_message_then_audio_only() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, _session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        mgr.feed(&[1i16, 2, 3]).await;
        mgr.feed(&[4i16, 5, 6]).await;
        mgr.end(Duration::from_secs(1)).await;

        let received = recognizer.received.lock().unwrap();
        assert!(received.len() >= 3);
        assert!(received[0].is_config());
        assert!(received[1..].iter().all(|m| !m.is_config()));
    }

    #[tokio::test]
    async fn enable_twice_keeps_single_worker() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, _session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        mgr.enable();
        mgr.feed(&[0i16; 160]).await;
        mgr.end(Duration::from_secs(1)).await;

        let received = recognizer.received.lock().unwrap();
        let configs = received.iter().filter(|m| m.is_config()).count();
        assert_eq!(configs, 1);
    }

    #[tokio::test]
    async fn final_results_are_forwarded_trimmed() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, mut session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        mgr.feed(&[0i16; 160]).await;
        tokio::task::yield_now().await;
        recognizer
            .event_tx()
            .await
            .send(RecognizerEvent::Final {
                text: "  こんにちは  ".to_string(),
                confidence: 0.9,
            })
            .await
            .unwrap();
        let (text, confidence) = recv_final(&mut session_rx).await.unwrap();
        assert_eq!(text, "こんにちは");
        assert!((confidence - 0.9).abs() < f32::EPSILON);
        mgr.end(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn empty_final_merges_pending_partial() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, mut session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        mgr.feed(&[0i16; 160]).await;
        tokio::task::yield_now().await;
        let tx = recognizer.event_tx().await;
        tx.send(RecognizerEvent::Interim {
            text: "営業時間".to_string(),
            confidence: 0.5,
        })
        .await
        .unwrap();
        tx.send(RecognizerEvent::Final {
            text: "".to_string(),
            confidence: 0.8,
        })
        .await
        .unwrap();
        loop {
            match session_rx.recv().await {
                Some(SessionIn::RecogFinal { text, .. }) => {
                    assert_eq!(text, "営業時間");
                    break;
                }
                Some(_) => continue,
                None => panic!("final not delivered"),
            }
        }
        mgr.end(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn short_noise_final_is_dropped_but_ambiguous_maps_to_not_heard() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, mut session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        mgr.feed(&[0i16; 160]).await;
        tokio::task::yield_now().await;
        let tx = recognizer.event_tx().await;
        // 1文字のノイズ → 捨てられる
        tx.send(RecognizerEvent::Final {
            text: "x".to_string(),
            confidence: 0.2,
        })
        .await
        .unwrap();
        // 曖昧発話 → 空文字の final（= 聞こえなかった）として届く
        tx.send(RecognizerEvent::Final {
            text: "え".to_string(),
            confidence: 0.3,
        })
        .await
        .unwrap();
        let (text, _) = recv_final(&mut session_rx).await.unwrap();
        assert_eq!(text, "");
        mgr.end(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn transient_open_failure_retries_with_backoff() {
        tokio::time::pause();
        let recognizer = Arc::new(ScriptedRecognizer::failing(1, "connection refused"));
        let (session_tx, _session_rx) = mpsc::channel(16);
        let mut mgr =
            RecognitionManager::new(call("c1"), recognizer.clone(), session_tx, test_cfg());
        mgr.enable();
        // バックオフを跨いで開通するまで時間を進める
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        mgr.feed(&[0i16; 16]).await;
        mgr.end(Duration::from_secs(1)).await;
        let received = recognizer.received.lock().unwrap();
        assert!(received.iter().any(|m| m.is_config()));
    }

    #[tokio::test]
    async fn permanent_failure_notifies_and_does_not_retry() {
        let recognizer = Arc::new(ScriptedRecognizer::failing(10, "PERMISSION_DENIED"));
        let (session_tx, mut session_rx) = mpsc::channel(16);
        let mut mgr = RecognitionManager::new(call("c1"), recognizer, session_tx, test_cfg());
        mgr.enable();
        match session_rx.recv().await {
            Some(SessionIn::RecogUnavailable { reason }) => {
                assert!(reason.contains("PERMISSION_DENIED"));
            }
            other => panic!("expected RecogUnavailable, got {:?}", other),
        }
        mgr.end(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn retries_exhaust_then_unavailable() {
        tokio::time::pause();
        let recognizer = Arc::new(ScriptedRecognizer::failing(10, "connection refused"));
        let (session_tx, mut session_rx) = mpsc::channel(16);
        let mut mgr = RecognitionManager::new(call("c1"), recognizer, session_tx, test_cfg());
        mgr.enable();
        // max 2 回の再試行バックオフ（0.5s + 1s）を越えて進める
        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }
        match session_rx.recv().await {
            Some(SessionIn::RecogUnavailable { reason }) => {
                assert!(reason.contains("retries exhausted"));
            }
            other => panic!("expected RecogUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, _session_rx) = mpsc::channel(16);
        let mut mgr = RecognitionManager::new(call("c1"), recognizer, session_tx, test_cfg());
        mgr.enable();
        mgr.end(Duration::from_secs(1)).await;
        mgr.end(Duration::from_secs(1)).await;
        assert!(!mgr.is_enabled());
    }

    #[tokio::test]
    async fn capture_is_finalized_on_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg();
        cfg.capture_enabled = true;
        cfg.capture_dir = dir.path().to_string_lossy().to_string();

        let recognizer = Arc::new(ScriptedRecognizer::new());
        let (session_tx, _session_rx) = mpsc::channel(16);
        let mut mgr = RecognitionManager::new(call("cap1"), recognizer, session_tx, cfg);
        mgr.enable();
        mgr.feed(&[100i16; 320]).await;
        tokio::task::yield_now().await;
        mgr.end(Duration::from_secs(1)).await;

        let path = dir.path().join("asr_capture_cap1.wav");
        let reader = hound::WavReader::open(&path).expect("capture wav missing");
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.len(), 320);
    }

    #[test]
    fn backoff_table_is_bounded() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(5), Duration::from_secs(8));
        assert_eq!(backoff_delay(100), Duration::from_secs(8));
    }

    #[test]
    fn prestream_drops_oldest_beyond_cap() {
        let mut q = VecDeque::new();
        let mut bytes = 0usize;
        for i in 0..10u8 {
            push_prestream(
                &mut q,
                &mut bytes,
                StreamMessage::Audio(vec![i; 100]),
                500,
            );
        }
        assert!(bytes <= 500);
        // 最初のチャンクは押し出されている
        match q.front().unwrap() {
            StreamMessage::Audio(data) => assert!(data[0] > 0),
            _ => panic!("unexpected message"),
        }
    }
}
