// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use shardhost_runtime::error::{ConfigurationError, TransferError};

use super::{ModelLocation, ModelSource, TransferReport, tally_dir};

const SRC_PLACEHOLDER: &str = "{src}";
const DST_PLACEHOLDER: &str = "{dst}";

/// Keep at most this much of the tool's stderr in the error.
const STDERR_LIMIT: usize = 4096;

/// Delegates the copy to an external bulk-transfer tool such as `s5cmd`.
///
/// The report is computed by walking `dest` after the tool exits, so files
/// that were already present count as copied.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    /// `command[0]` is the program; `{src}` and `{dst}` are substituted in
    /// every argument.
    pub fn new(command: Vec<String>) -> Result<Self, ConfigurationError> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ConfigurationError::Unsupported("transfer command is empty".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn render_args(&self, location: &ModelLocation, dest: &Path) -> Vec<String> {
        let src = location.as_command_arg();
        let dst = dest.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SRC_PLACEHOLDER, src.trim_end_matches('/'))
                    .replace(DST_PLACEHOLDER, dst.trim_end_matches('/'))
            })
            .collect()
    }
}

#[async_trait]
impl ModelSource for CommandSource {
    async fn copy_to(
        &self,
        location: &ModelLocation,
        dest: &Path,
    ) -> Result<TransferReport, TransferError> {
        let args = self.render_args(location, dest);
        tracing::info!(program = %self.program, ?args, "running transfer command");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let start = stderr
                .char_indices()
                .map(|(i, _)| i)
                .find(|i| stderr.len() - i <= STDERR_LIMIT)
                .unwrap_or(stderr.len());
            return Err(TransferError::CommandFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr: stderr[start..].to_string(),
            });
        }

        let report = tally_dir(dest).await?;
        tracing::info!(files = report.files, bytes = report.bytes, "transfer command finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn command(parts: &[&str]) -> CommandSource {
        CommandSource::new(parts.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_default_s5cmd_rendering() {
        let source = CommandSource::new(
            shardhost_runtime::config::TransferConfig::default().command,
        )
        .unwrap();
        let location: ModelLocation = "s3://bucket/models/tiny/".parse().unwrap();
        assert_eq!(source.program, "s5cmd");
        assert_eq!(
            source.render_args(&location, Path::new("/cache/model/")),
            vec!["sync", "s3://bucket/models/tiny/*", "/cache/model/"]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandSource::new(vec![]).is_err());
        assert!(CommandSource::new(vec![" ".into()]).is_err());
    }

    #[tokio::test]
    async fn test_copy_with_cp() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("config.json"), "{}").unwrap();
        std::fs::write(src.path().join("model.bin"), "abcd").unwrap();
        let dest = TempDir::new().unwrap();

        let location = ModelLocation::Local {
            path: src.path().to_path_buf(),
        };
        let report = command(&["cp", "-R", "{src}/.", "{dst}/"])
            .copy_to(&location, dest.path())
            .await
            .unwrap();
        assert_eq!(report, TransferReport { files: 2, bytes: 6 });
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dest = TempDir::new().unwrap();
        let location: ModelLocation = "s3://bucket/model".parse().unwrap();

        let err = command(&["sh", "-c", "echo 'access denied' >&2; exit 3"])
            .copy_to(&location, dest.path())
            .await
            .unwrap_err();
        match err {
            TransferError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dest = TempDir::new().unwrap();
        let location: ModelLocation = "s3://bucket/model".parse().unwrap();

        let err = command(&["shardhost-no-such-tool"])
            .copy_to(&location, dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Spawn { .. }), "{err}");
    }
}
