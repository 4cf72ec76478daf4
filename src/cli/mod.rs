//! CLI command implementations.

pub mod instance;
pub mod parsers;
pub mod profiles;

use aiidalab_launch::{AppState, Config, DockerEngine, Naming};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// Context
// ============================================================================

/// Resolve the configuration path, falling back to the platform default.
pub fn config_path(explicit: Option<&Path>) -> aiidalab_launch::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::default_path(),
    }
}

/// Connect to the engine and load the migrated application state.
pub async fn connect(config: Option<&Path>) -> aiidalab_launch::Result<AppState> {
    let path = config_path(config)?;
    tracing::info!(path = %path.display(), "using configuration file");

    let engine = Arc::new(DockerEngine::connect().await?);
    let mut state = AppState::new(path, engine, Naming::default())?;
    state.apply_migrations().await?;
    Ok(state)
}

// ============================================================================
// Display Helpers
// ============================================================================

/// Render rows as a plain-text table with a header underline.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let mut lines = vec![
        render(headers.to_vec()),
        render(separator.iter().map(String::as_str).collect()),
    ];
    for row in rows {
        lines.push(render(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

/// Flush stdout and stderr, ignoring errors.
///
/// Used to ensure output is visible before blocking operations.
pub fn flush_output() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
