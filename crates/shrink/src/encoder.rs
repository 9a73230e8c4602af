use std::path::Path;
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use crate::candidate::MediaKind;
use crate::config::{ShrinkConfig, ToolCommand};

/// Black-box compressor: reads `input`, writes `output`, succeeds or fails.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, kind: MediaKind, input: &Path, output: &Path) -> Result<()>;
}

/// Captured result of one external tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the configured image tool or video transcoder as a child process
#[derive(Debug, Clone)]
pub struct CommandEncoder {
    image: ToolCommand,
    video: ToolCommand,
}

impl CommandEncoder {
    pub fn new(image: ToolCommand, video: ToolCommand) -> Self {
        Self { image, video }
    }

    pub fn from_config(cfg: &ShrinkConfig) -> Self {
        Self::new(cfg.image_tool.clone(), cfg.video_tool.clone())
    }

    fn tool(&self, kind: MediaKind) -> &ToolCommand {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Video => &self.video,
        }
    }
}

#[async_trait]
impl Encoder for CommandEncoder {
    async fn encode(&self, kind: MediaKind, input: &Path, output: &Path) -> Result<()> {
        let tool = self.tool(kind);
        let args = tool.render_args(input, output);
        let result = execute_tool(tool.bin.as_path(), &args).await?;

        match result.exit_code {
            Some(0) => Ok(()),
            code => Err(anyhow!(
                "{} exited with {}: {}",
                tool.bin.display(),
                code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                last_line(&result.stderr).unwrap_or("no error output")
            )),
        }
    }
}

/// Spawn a tool, capture both output streams, and wait for it without a timeout.
///
/// The child is placed in its own process group so that a terminal Ctrl+C
/// reaches only this process; running encodes are allowed to finish.
pub async fn execute_tool(bin: &Path, args: &[String]) -> Result<ToolOutput> {
    debug!("Executing: {} {}", bin.display(), args.join(" "));

    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}. Ensure it is installed and accessible.", bin.display()))?;

    let stdout = child.stdout.take()
        .ok_or_else(|| anyhow!("Failed to capture stdout of {}", bin.display()))?;
    let stderr = child.stderr.take()
        .ok_or_else(|| anyhow!("Failed to capture stderr of {}", bin.display()))?;

    let stdout_handle = tokio::spawn(collect_lines(stdout));
    let stderr_handle = tokio::spawn(collect_lines(stderr));

    let status = child
        .wait()
        .await
        .with_context(|| format!("Failed to wait for {}", bin.display()))?;

    let stdout = stdout_handle.await.context("Failed to read tool stdout")?;
    let stderr = stderr_handle.await.context("Failed to read tool stderr")?;

    Ok(ToolOutput {
        exit_code: status.code(),
        stdout,
        stderr,
    })
}

async fn collect_lines<R>(stream: R) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        lines.push(line);
    }
    lines.join("\n")
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}
