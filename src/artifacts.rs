use crate::plan::VisualPlan;
use crate::prompt_builder::PromptSpec;
use crate::qa::{QaRecord, QaReport};
use crate::timeline::Timeline;
use crate::logok;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const PLAN_FILE: &str = "plan.json";
pub const PROMPTS_CSV_FILE: &str = "prompts.csv";
pub const PROMPTS_JSON_FILE: &str = "prompts.json";
pub const QA_REPORT_FILE: &str = "qa_report.json";
pub const TIMELINE_FILE: &str = "timeline.json";

const PROMPT_COLUMNS: [&str; 9] = [
    "beat_id",
    "shot_type",
    "prompt",
    "negatives",
    "seed",
    "start_s",
    "end_s",
    "status",
    "similarity",
];

/// One line of the flattened prompt table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRow {
    pub beat_id: String,
    pub shot_type: String,
    pub prompt: String,
    pub negatives: String,
    pub seed: u32,
    pub start_s: f64,
    pub end_s: f64,
    pub status: String,
    pub similarity: f64,
}

/// Flattens prompts, filling status and similarity from the first QA record of
/// each beat. Beats without a record stay `pending`.
pub fn prompt_rows(prompts: &[PromptSpec], records: &[QaRecord]) -> Vec<PromptRow> {
    let mut by_beat: HashMap<&str, &QaRecord> = HashMap::new();
    for r in records {
        by_beat.entry(r.beat_id.as_str()).or_insert(r);
    }

    prompts
        .iter()
        .map(|p| {
            let record = by_beat.get(p.beat_id.as_str());
            PromptRow {
                beat_id: p.beat_id.clone(),
                shot_type: p.shot_type.to_string(),
                prompt: p.prompt.clone(),
                negatives: p.negative_prompt(),
                seed: p.seed,
                start_s: p.start_s.unwrap_or(0.0),
                end_s: p.end_s.unwrap_or(0.0),
                status: record.map_or("pending", |r| r.final_status.as_str()).to_string(),
                similarity: record.map_or(0.0, |r| r.best_similarity()),
            }
        })
        .collect()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn prompts_csv(rows: &[PromptRow]) -> String {
    let mut out = PROMPT_COLUMNS.join(",");
    out.push('\n');
    for r in rows {
        let fields = [
            csv_field(&r.beat_id),
            csv_field(&r.shot_type),
            csv_field(&r.prompt),
            csv_field(&r.negatives),
            r.seed.to_string(),
            format!("{:.3}", r.start_s),
            format!("{:.3}", r.end_s),
            csv_field(&r.status),
            format!("{:.3}", r.similarity),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    generated_at: String,
    #[serde(flatten)]
    body: &'a T,
}

fn stamped<T: Serialize>(body: &T) -> Stamped<'_, T> {
    Stamped {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        body,
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Writes the five run artifacts into `out_dir` and returns their paths.
pub async fn write_artifacts(
    out_dir: &Path,
    plan: &VisualPlan,
    prompts: &[PromptSpec],
    qa: &QaReport,
    timeline: &Timeline,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let rows = prompt_rows(prompts, &qa.details);
    let paths: Vec<PathBuf> = [PLAN_FILE, PROMPTS_CSV_FILE, PROMPTS_JSON_FILE, QA_REPORT_FILE, TIMELINE_FILE]
        .iter()
        .map(|f| out_dir.join(f))
        .collect();

    write_json(&paths[0], &stamped(plan)).await?;
    fs::write(&paths[1], prompts_csv(&rows))
        .await
        .with_context(|| format!("Failed to write {}", paths[1].display()))?;
    write_json(&paths[2], &rows).await?;
    write_json(&paths[3], qa).await?;
    write_json(&paths[4], &stamped(timeline)).await?;

    logok(format!("Artifacts written to {}", out_dir.display()));
    Ok(paths)
}
