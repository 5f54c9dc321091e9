use crate::protocol::rtp::codec::linear16_to_mulaw;

const TONE_FREQ_HZ: f64 = 440.0;
const TONE_SAMPLE_RATE: f64 = 8_000.0;
const TONE_AMPLITUDE: f64 = 8_000.0;

/// 合成が使えないときに流す警告トーン（8kHz μ-law）。
/// 固定パラメータの正弦波なので同じ長さなら常に同じバイト列になる。
pub fn warning_tone_mulaw(duration_ms: u64) -> Vec<u8> {
    let samples = (TONE_SAMPLE_RATE as u64 * duration_ms / 1_000) as usize;
    (0..samples)
        .map(|n| {
            let t = n as f64 / TONE_SAMPLE_RATE;
            let s = (TONE_AMPLITUDE * (2.0 * std::f64::consts::PI * TONE_FREQ_HZ * t).sin()) as i16;
            linear16_to_mulaw(s)
        })
        .collect()
}
