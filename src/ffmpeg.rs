use crate::alignment::estimate_duration_s;
use crate::{logi, logw};
use anyhow::{Context, Result};
use std::path::Path;
use tokio::process::Command;

const MIN_AUDIO_SECONDS: f64 = 0.1;

fn parse_duration(stdout: &str) -> Result<f64> {
    let duration = stdout.trim().parse::<f64>().unwrap_or(-1.0);
    if !duration.is_finite() || duration <= MIN_AUDIO_SECONDS {
        return Err(anyhow::anyhow!("Invalid duration: {:?}", stdout.trim()));
    }
    Ok(duration)
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Real audio length when the file can be probed, otherwise the
/// words-per-second estimate.
pub async fn narration_duration_s(audio: Option<&Path>, word_count: usize, words_per_second: f64) -> f64 {
    let estimate = estimate_duration_s(word_count, words_per_second);
    let Some(path) = audio else {
        return estimate;
    };
    match ffprobe_duration_seconds(path).await {
        Ok(d) => {
            logi(format!("Narration audio: {:.2}s ({})", d, path.display()));
            d
        }
        Err(e) => {
            logw(format!("Audio probe failed ({e:#}); estimating {:.1}s from word count", estimate));
            estimate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_output() {
        assert_eq!(parse_duration("123.456000\n").unwrap(), 123.456);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("0.05").is_err());
    }

    #[tokio::test]
    async fn missing_audio_falls_back_to_estimate() {
        let d = narration_duration_s(Some(Path::new("/no/such/narration.mp3")), 300, 2.5).await;
        assert!((d - 120.0).abs() < 1e-9);
        assert!((narration_duration_s(None, 25, 2.5).await - 10.0).abs() < 1e-9);
    }
}
