use crate::logi;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

pub const IMAGES_DIR: &str = "images";

/// Creates the run output directory and its image subdirectory.
pub async fn ensure_directories(out_dir: &Path) -> Result<()> {
    for dir in [out_dir.to_path_buf(), out_dir.join(IMAGES_DIR)] {
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

pub async fn check_ffprobe() -> bool {
    match tokio::process::Command::new("ffprobe")
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_nested_output_dirs() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("runs").join("001");
        ensure_directories(&out).await.unwrap();
        assert!(out.join(IMAGES_DIR).is_dir());
        ensure_directories(&out).await.unwrap();
    }
}
