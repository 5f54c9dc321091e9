use std::collections::VecDeque;
use std::time::Duration;

use crate::shared::config::VadConfig;

/// 正規化 RMS（0.0〜1.0）。
pub fn compute_rms(pcm: &[i16]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = pcm
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum_sq / pcm.len() as f64).sqrt() as f32
}

#[derive(Debug)]
pub struct VadVerdict {
    pub is_voice: bool,
    pub rms: f32,
    /// 無音区間明けの最初の有声チャンクで、直前のプリロール内容が入る。
    /// 認識器へはこの内容を当該チャンクの前に連結して渡す。
    pub preroll_flush: Option<Vec<i16>>,
    /// 連続無音がしきい値を超えた（この無音区間で一度だけ立つ）。
    pub backchannel_due: bool,
}

pub struct VadState {
    rms_threshold: f32,
    barge_in_rms_threshold: f32,
    sample_rate: u32,
    preroll_max_samples: usize,
    backchannel_silence_samples: u64,
    preroll: VecDeque<i16>,
    is_user_speaking: bool,
    silence_samples: u64,
    backchannel_fired: bool,
}

impl VadState {
    pub fn new(cfg: &VadConfig, sample_rate: u32) -> Self {
        let preroll_max_samples =
            (cfg.preroll.as_millis() as usize * sample_rate as usize) / 1_000;
        let backchannel_silence_samples =
            (cfg.backchannel_silence.as_millis() as u64 * sample_rate as u64) / 1_000;
        Self {
            rms_threshold: cfg.rms_threshold,
            barge_in_rms_threshold: cfg.barge_in_rms_threshold,
            sample_rate,
            preroll_max_samples,
            backchannel_silence_samples,
            preroll: VecDeque::with_capacity(preroll_max_samples),
            is_user_speaking: false,
            silence_samples: 0,
            backchannel_fired: false,
        }
    }

    /// チャンクを分類してプリロールを更新する。有声/無声に関わらず
    /// 全チャンクがプリロールに積まれる。
    pub fn update(&mut self, pcm: &[i16]) -> VadVerdict {
        let rms = compute_rms(pcm);
        let is_voice = rms >= self.rms_threshold;

        let preroll_flush = if is_voice && !self.is_user_speaking {
            // 現チャンクを積む前の内容が語頭の欠けを補う
            Some(self.preroll.iter().copied().collect())
        } else {
            None
        };

        for &s in pcm {
            if self.preroll.len() == self.preroll_max_samples {
                self.preroll.pop_front();
            }
            self.preroll.push_back(s);
        }

        let mut backchannel_due = false;
        if is_voice {
            self.is_user_speaking = true;
            self.silence_samples = 0;
            self.backchannel_fired = false;
        } else {
            self.is_user_speaking = false;
            self.silence_samples = self.silence_samples.saturating_add(pcm.len() as u64);
            if self.silence_samples >= self.backchannel_silence_samples
                && !self.backchannel_fired
            {
                self.backchannel_fired = true;
                backchannel_due = true;
            }
        }

        VadVerdict {
            is_voice,
            rms,
            preroll_flush,
            backchannel_due,
        }
    }

    pub fn is_user_speaking(&self) -> bool {
        self.is_user_speaking
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_samples * 1_000 / self.sample_rate as u64)
    }

    /// システム音声再生中に割り込みと見なすか。
    pub fn is_barge_in(&self, rms: f32, system_playing: bool) -> bool {
        system_playing && rms >= self.barge_in_rms_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> VadConfig {
        VadConfig {
            rms_threshold: 0.02,
            barge_in_rms_threshold: 0.05,
            preroll: Duration::from_millis(1_000),
            backchannel_silence: Duration::from_millis(2_000),
        }
    }

    fn voice_chunk(len: usize) -> Vec<i16> {
        vec![8_000i16; len]
    }

    fn silence_chunk(len: usize) -> Vec<i16> {
        vec![0i16; len]
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(compute_rms(&silence_chunk(320)), 0.0);
        assert_eq!(compute_rms(&[]), 0.0);
    }

    #[test]
    fn rms_is_normalized() {
        let full = vec![i16::MAX; 160];
        let rms = compute_rms(&full);
        assert!(rms > 0.99 && rms <= 1.0);
    }

    #[test]
    fn voice_detected_above_threshold() {
        let mut vad = VadState::new(&test_cfg(), 16_000);
        let verdict = vad.update(&voice_chunk(320));
        assert!(verdict.is_voice);
        assert!(vad.is_user_speaking());
    }

    #[test]
    fn preroll_flushed_on_first_voice_after_silence() {
        let mut vad = VadState::new(&test_cfg(), 16_000);
        vad.update(&silence_chunk(320));
        vad.update(&silence_chunk(320));
        let verdict = vad.update(&voice_chunk(320));
        let flush = verdict.preroll_flush.expect("preroll expected");
        assert_eq!(flush.len(), 640);
        // 有声継続中は再フラッシュしない
        let verdict = vad.update(&voice_chunk(320));
        assert!(verdict.preroll_flush.is_none());
    }

    #[test]
    fn preroll_is_bounded_to_window() {
        let mut vad = VadState::new(&test_cfg(), 16_000);
        // 2秒分の無音を流しても保持は1秒分
        for _ in 0..100 {
            vad.update(&silence_chunk(320));
        }
        let verdict = vad.update(&voice_chunk(320));
        assert_eq!(verdict.preroll_flush.unwrap().len(), 16_000);
    }

    #[test]
    fn backchannel_fires_once_per_silence_run() {
        let mut vad = VadState::new(&test_cfg(), 16_000);
        let mut fired = 0;
        // 4秒の無音
        for _ in 0..200 {
            if vad.update(&silence_chunk(320)).backchannel_due {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);

        // 有声でリセットされ、次の無音区間でまた一度だけ
        vad.update(&voice_chunk(320));
        fired = 0;
        for _ in 0..200 {
            if vad.update(&silence_chunk(320)).backchannel_due {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn silence_duration_accumulates() {
        let mut vad = VadState::new(&test_cfg(), 16_000);
        for _ in 0..50 {
            vad.update(&silence_chunk(320));
        }
        assert_eq!(vad.silence_duration(), Duration::from_millis(1_000));
        vad.update(&voice_chunk(320));
        assert_eq!(vad.silence_duration(), Duration::ZERO);
    }

    #[test]
    fn barge_in_requires_system_playing_and_level() {
        let vad = VadState::new(&test_cfg(), 16_000);
        assert!(vad.is_barge_in(0.1, true));
        assert!(!vad.is_barge_in(0.1, false));
        assert!(!vad.is_barge_in(0.03, true));
    }
}
