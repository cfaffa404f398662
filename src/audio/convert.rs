//! Sample-Konvertierung für den Capture-Pfad
//!
//! Beide Funktionen schreiben in einen vom Aufrufer gehaltenen Puffer,
//! damit der Audio-Callback nach dem ersten Durchlauf nicht mehr alloziert.

/// Mischt interleaved Multi-Channel-Samples auf Mono herunter
pub fn downmix_into(data: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }

    let scale = 1.0 / channels as f32;
    out.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Einfaches Linear-Resampling von `from_rate` auf `to_rate`
pub fn resample_into(input: &[f32], from_rate: u32, to_rate: u32, out: &mut Vec<f32>) {
    out.clear();
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        out.extend_from_slice(input);
        return;
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (input.len() as f64 * ratio) as usize;

    out.extend((0..new_len).map(|i| {
        let src_idx = i as f64 / ratio;
        let idx = src_idx as usize;
        let frac = (src_idx - idx as f64) as f32;
        let s1 = input.get(idx).copied().unwrap_or(0.0);
        let s2 = input.get(idx + 1).copied().unwrap_or(s1);
        s1 + (s2 - s1) * frac
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);

        downmix_into(&[0.25, 0.75], 1, &mut out);
        assert_eq!(out, vec![0.25, 0.75]);
    }

    #[test]
    fn test_resample_halves_length() {
        let input: Vec<f32> = (0..960).map(|i| i as f32 / 960.0).collect();
        let mut out = Vec::new();
        resample_into(&input, 48_000, 16_000, &mut out);
        assert_eq!(out.len(), 320);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 3.0 / 960.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate_is_copy() {
        let mut out = vec![9.0; 3];
        resample_into(&[0.1, 0.2], 16_000, 16_000, &mut out);
        assert_eq!(out, vec![0.1, 0.2]);
    }
}
