use log::{debug, info};
use crate::candidate::{CandidateSet, MediaKind};
use crate::config::ShrinkConfig;
use crate::encoder::execute_tool;
use crate::error::ShrinkError;

/// Verify that every external tool this run needs can be executed.
///
/// Only kinds with at least one candidate are checked, and dry runs need no
/// tools at all.
pub async fn check_tools(cfg: &ShrinkConfig, candidates: &CandidateSet) -> Result<(), ShrinkError> {
    if cfg.dry_run {
        debug!("Dry run: skipping tool checks");
        return Ok(());
    }

    for kind in MediaKind::ALL {
        if candidates.of_kind(kind).is_empty() {
            continue;
        }
        let bin = &cfg.tool_for(kind).bin;
        let output = execute_tool(bin, &["-version".to_string()])
            .await
            .map_err(|e| ShrinkError::MissingTool {
                bin: bin.display().to_string(),
                reason: format!("{:#}", e),
            })?;

        if output.exit_code != Some(0) {
            return Err(ShrinkError::MissingTool {
                bin: bin.display().to_string(),
                reason: format!("`-version` exited with {:?}", output.exit_code),
            });
        }

        let banner = output.stdout.lines().next().unwrap_or("").trim().to_string();
        info!("Using {} tool: {} ({})", kind, bin.display(), banner);
    }

    Ok(())
}
