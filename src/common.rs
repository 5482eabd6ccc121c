use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs,
    io::IsTerminal,
    path::{Path, PathBuf},
    time::Duration,
};

pub fn delete_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("Failed deleting {}", path.display()))?;
    }
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed creating {}", parent.display()))?;
    }
    Ok(())
}

/// Sibling path used while an output is being written; renamed into place on success.
pub fn tmp_path_for(output_path: &Path, fallback_name: &str) -> PathBuf {
    let file_name = output_path
        .file_name()
        .and_then(|x| x.to_str())
        .unwrap_or(fallback_name);
    output_path.with_file_name(format!("{file_name}.tmp"))
}

pub fn move_into_place(tmp_path: &Path, output_path: &Path) -> Result<()> {
    fs::rename(tmp_path, output_path).with_context(|| {
        format!(
            "Failed moving {} to {}",
            tmp_path.display(),
            output_path.display()
        )
    })
}

pub fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .and_then(|x| x.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Progress bar for a bulk stage. Hidden when stderr is not a terminal so logs stay clean.
pub fn stage_progress(prefix: &str, total: usize) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(total as u64);
    progress.set_prefix(prefix.to_string());
    apply_stage_progress_style(&progress);
    progress.enable_steady_tick(Duration::from_millis(250));
    progress
}

/// Spinner for work whose total is unknown up front (streaming the raw CSV).
pub fn scan_progress(prefix: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new_spinner();
    progress.set_prefix(prefix.to_string());
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] {pos} rows {per_sec} {msg}",
    ) {
        progress.set_style(style);
    }
    progress.enable_steady_tick(Duration::from_millis(250));
    progress
}

fn apply_stage_progress_style(progress: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) {per_sec} eta {eta_precise} {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
}
