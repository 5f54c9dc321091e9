use thiserror::Error;

// 半帯域補間の固定係数 [-1, 9, 9, -1]/16。整数演算のみで入力に対して決定的。
const HB_OUTER: i32 = -1;
const HB_INNER: i32 = 9;
const HB_SHIFT: i32 = 4;
const HB_ROUND: i32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported resample ratio {from}->{to}")]
pub struct UnsupportedRate {
    pub from: u32,
    pub to: u32,
}

/// 8k⇄16k の有理比リサンプリング。同一レートは素通し。
pub fn resample(pcm: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, UnsupportedRate> {
    match (from_rate, to_rate) {
        (a, b) if a == b => Ok(pcm.to_vec()),
        (8_000, 16_000) => Ok(upsample_2x(pcm)),
        (16_000, 8_000) => Ok(downsample_2x(pcm)),
        (from, to) => Err(UnsupportedRate { from, to }),
    }
}

/// 2倍アップサンプリング。偶数位相は入力そのまま、奇数位相は4タップ補間。
pub fn upsample_2x(pcm: &[i16]) -> Vec<i16> {
    let n = pcm.len();
    let mut out = Vec::with_capacity(n * 2);
    let at = |i: isize| -> i32 {
        let idx = i.clamp(0, n.saturating_sub(1) as isize);
        if n == 0 {
            0
        } else {
            pcm[idx as usize] as i32
        }
    };
    for i in 0..n as isize {
        out.push(pcm[i as usize]);
        let acc = HB_OUTER * at(i - 1)
            + HB_INNER * at(i)
            + HB_INNER * at(i + 1)
            + HB_OUTER * at(i + 2)
            + HB_ROUND;
        out.push(clamp_i16(acc >> HB_SHIFT));
    }
    out
}

/// 1/2 ダウンサンプリング。三角窓の低域通過後に間引く。
pub fn downsample_2x(pcm: &[i16]) -> Vec<i16> {
    let n = pcm.len();
    let mut out = Vec::with_capacity(n / 2 + 1);
    let at = |i: isize| -> i32 {
        let idx = i.clamp(0, n.saturating_sub(1) as isize);
        if n == 0 {
            0
        } else {
            pcm[idx as usize] as i32
        }
    };
    let mut i = 0isize;
    while (i as usize) < n {
        let acc = at(i - 1) + 2 * at(i) + at(i + 1) + 2;
        out.push(clamp_i16(acc >> 2));
        i += 2;
    }
    out
}

fn clamp_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsample_doubles_length() {
        let pcm: Vec<i16> = (0..160).map(|i| (i * 7) as i16).collect();
        assert_eq!(upsample_2x(&pcm).len(), 320);
    }

    #[test]
    fn silence_stays_silent() {
        let silence = vec![0i16; 160];
        assert!(upsample_2x(&silence).iter().all(|&s| s == 0));
        assert!(downsample_2x(&silence).iter().all(|&s| s == 0));
    }

    #[test]
    fn roundtrip_preserves_length_within_one() {
        for len in [0usize, 1, 2, 159, 160, 161] {
            let pcm: Vec<i16> = (0..len).map(|i| (i as i16).wrapping_mul(3)).collect();
            let up = upsample_2x(&pcm);
            let back = downsample_2x(&up);
            let diff = (back.len() as i64 - len as i64).abs();
            assert!(diff <= 1, "len {} -> {} -> {}", len, up.len(), back.len());
        }
    }

    #[test]
    fn resample_is_deterministic() {
        let pcm: Vec<i16> = (0..320).map(|i| ((i * 31) % 5000) as i16).collect();
        let a = resample(&pcm, 8_000, 16_000).unwrap();
        let b = resample(&pcm, 8_000, 16_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn same_rate_passthrough() {
        let pcm = vec![5i16, -5, 7];
        assert_eq!(resample(&pcm, 8_000, 8_000).unwrap(), pcm);
    }

    #[test]
    fn unsupported_ratio_is_error() {
        assert_eq!(
            resample(&[], 8_000, 44_100),
            Err(UnsupportedRate {
                from: 8_000,
                to: 44_100
            })
        );
    }

    #[test]
    fn dc_signal_is_roughly_preserved() {
        let pcm = vec![1000i16; 100];
        let up = upsample_2x(&pcm);
        // 端以外は直流が保存される
        for &s in &up[4..up.len() - 4] {
            assert_eq!(s, 1000);
        }
    }
}
