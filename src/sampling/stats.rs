//! Sample statistics for the analog pipeline.

/// Arithmetic mean. Zero for an empty slice.
pub fn mean(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}

/// Sample standard deviation (n−1 denominator). Zero below 2 samples.
pub fn sample_std_dev(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let sum_sq: f32 = samples.iter().map(|v| (v - m) * (v - m)).sum();
    (sum_sq / (samples.len() - 1) as f32).sqrt()
}

/// Z-score outlier stripping.
///
/// Returns the surviving samples and the number removed. Rules:
///
/// - fewer than 3 samples: outlier detection is statistically
///   meaningless and is skipped entirely;
/// - zero deviation: nothing to strip;
/// - if stripping would empty the set, the original samples are kept —
///   a non-empty input never yields an empty result.
pub fn strip_outliers(samples: &[f32], z_threshold: f32) -> (Vec<f32>, usize) {
    if samples.len() < 3 {
        return (samples.to_vec(), 0);
    }

    let m = mean(samples);
    let sd = sample_std_dev(samples);
    if sd <= 0.0 {
        return (samples.to_vec(), 0);
    }

    let kept: Vec<f32> = samples
        .iter()
        .copied()
        .filter(|v| ((v - m) / sd).abs() <= z_threshold)
        .collect();

    if kept.is_empty() {
        return (samples.to_vec(), 0);
    }

    let removed = samples.len() - kept.len();
    (kept, removed)
}
