use std::collections::VecDeque;

/// 1トランスポートティック分のフレーム長（20ms @ 8kHz μ-law）
pub const FRAME_BYTES: usize = 160;
/// μ-law の無音
pub const MULAW_SILENCE: u8 = 0xFF;

/// 呼ごとの送出キュー。coordinator のタスク上でのみ触るため
/// barge-in のクリアは drain と直列化される。
pub struct OutputPacer {
    queue: VecDeque<Vec<u8>>,
    is_speaking_output: bool,
    last_spoken_text: Option<String>,
    first_reply_sent: bool,
}

impl OutputPacer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            is_speaking_output: false,
            last_spoken_text: None,
            first_reply_sent: false,
        }
    }

    /// 合成音声を固定長フレームに刻んで積む。端数は無音で詰める。
    pub fn enqueue_audio(&mut self, audio: &[u8]) {
        if audio.is_empty() {
            return;
        }
        for chunk in audio.chunks(FRAME_BYTES) {
            let mut frame = chunk.to_vec();
            if frame.len() < FRAME_BYTES {
                frame.resize(FRAME_BYTES, MULAW_SILENCE);
            }
            self.queue.push_back(frame);
        }
        self.is_speaking_output = true;
    }

    /// 応答テキスト付きの enqueue。直前と同一テキストは再生しない
    /// （再接続起因のリピート防止）。初回応答だけは必ず流す。
    pub fn enqueue_reply(&mut self, text: &str, audio: &[u8]) -> bool {
        if self.first_reply_sent && self.last_spoken_text.as_deref() == Some(text) {
            log::debug!("[pacer] duplicate reply suppressed: {}", text);
            return false;
        }
        self.first_reply_sent = true;
        self.last_spoken_text = Some(text.to_string());
        self.enqueue_audio(audio);
        true
    }

    /// ティックごとに1フレームだけ取り出す。空になったら発話フラグを落とす。
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        let frame = self.queue.pop_front();
        if self.queue.is_empty() {
            self.is_speaking_output = false;
        }
        frame
    }

    /// 低遅延再生用。ティック上限なしで全フレームを吐き出す。
    pub fn drain_all(&mut self) -> Vec<Vec<u8>> {
        let frames: Vec<Vec<u8>> = self.queue.drain(..).collect();
        self.is_speaking_output = false;
        frames
    }

    /// barge-in / 明示切断専用。キューを原子的に捨てる。
    pub fn interrupt(&mut self) {
        self.queue.clear();
        self.is_speaking_output = false;
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking_output
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// 発話していない間にジッタバッファを温めておくための無音フレーム
    pub fn comfort_frame() -> Vec<u8> {
        vec![MULAW_SILENCE; FRAME_BYTES]
    }
}

impl Default for OutputPacer {
    fn default() -> Self {
        Self::new()
    }
}
