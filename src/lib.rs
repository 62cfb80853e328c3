use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

pub mod alignment;
pub mod api;
pub mod artifacts;
pub mod beat_planner;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod normalizer;
pub mod pipeline;
pub mod plan;
pub mod prompt_builder;
pub mod qa;
pub mod seed;
pub mod synth;
pub mod timeline;

pub type PlannerLogHook = Arc<Mutex<dyn Fn(&str) + Send + Sync + 'static>>;

static LOG_HOOK: Lazy<Mutex<Option<PlannerLogHook>>> = Lazy::new(|| Mutex::new(None));

/// Installs a process-wide callback that receives every tagged log line.
pub fn set_log_hook(hook: Option<PlannerLogHook>) {
    if let Ok(mut guard) = LOG_HOOK.lock() {
        *guard = hook;
    }
}

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!(target: "ai_doc_visuals", "{}", message),
        _ => tracing::info!(target: "ai_doc_visuals", tag, "{}", message),
    }

    if let Ok(guard) = LOG_HOOK.lock() {
        if let Some(hook) = guard.as_ref() {
            if let Ok(callback) = hook.lock() {
                let line = format!("[{}] {}", tag, message);
                callback(&line);
            }
        }
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_hook_receives_tagged_lines() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set_log_hook(Some(Arc::new(Mutex::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }))));

        logw("fallback plan engaged");
        set_log_hook(None);
        logi("not captured");

        let lines = seen.lock().unwrap();
        assert!(lines.iter().any(|l| l == "[WARN] fallback plan engaged"));
        assert!(!lines.iter().any(|l| l.contains("not captured")));
    }
}
