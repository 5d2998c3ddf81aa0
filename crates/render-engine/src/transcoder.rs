//! The transcoding seam.
//!
//! Workers never touch media themselves. They hand a source file, an
//! edit-decision list and a quality profile to a [`Transcoder`] and expect a
//! finished file at the requested output path.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use cutlog_common::config::QualityProfile;
use cutlog_common::error::{CutlogError, CutlogResult};
use cutlog_project_model::edit::EditOperation;

/// One render handed to a transcoder.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Absolute path of the source media.
    pub source: PathBuf,

    /// Edit-decision list to apply, in order.
    pub operations: Vec<EditOperation>,

    /// Output quality.
    pub profile: QualityProfile,

    /// Where the rendered file must be written.
    pub output: PathBuf,
}

/// Something that can turn a source plus an EDL into a rendered file.
#[async_trait]
pub trait Transcoder: Send + Sync + std::fmt::Debug {
    /// Render `request.output`. Any error is a transcoding failure.
    async fn render(&self, request: &RenderRequest) -> CutlogResult<()>;

    /// Check if this transcoder can run on this system.
    fn is_available(&self) -> bool;

    /// Transcoder name.
    fn name(&self) -> &str;
}

/// Runs an external program once per render.
///
/// ```text
/// <program> --source <path> --profile <name> --width <w> --height <h> --output <path>
/// ```
///
/// The operation list is written to the program's stdin as a JSON array.
#[derive(Debug, Clone)]
pub struct CommandTranscoder {
    program: PathBuf,
    name: String,
}

impl CommandTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self { program, name }
    }
}

#[async_trait]
impl Transcoder for CommandTranscoder {
    async fn render(&self, request: &RenderRequest) -> CutlogResult<()> {
        let operations = serde_json::to_vec(&request.operations)?;

        tracing::debug!(
            program = %self.program.display(),
            source = %request.source.display(),
            output = %request.output.display(),
            profile = %request.profile.name,
            "Running transcoder"
        );
        let mut child = Command::new(&self.program)
            .arg("--source")
            .arg(&request.source)
            .arg("--profile")
            .arg(&request.profile.name)
            .arg("--width")
            .arg(request.profile.width.to_string())
            .arg("--height")
            .arg(request.profile.height.to_string())
            .arg("--output")
            .arg(&request.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CutlogError::transcoding(format!("failed to start {}: {e}", self.name))
            })?;

        // Feed stdin while stderr is drained so neither pipe can stall the child.
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(&operations).await,
                None => Ok(()),
            }
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CutlogError::transcoding(format!("failed to wait on {}: {e}", self.name)))?;

        match writer.await {
            Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                tracing::warn!(error = %e, "Failed to write operations to transcoder");
            }
            Err(e) => tracing::warn!(error = %e, "Transcoder stdin writer panicked"),
            _ => {}
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CutlogError::transcoding(format!(
                "{} failed ({}): {}",
                self.name,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        if self.program.components().count() > 1 {
            return self.program.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(&self.program).is_file()))
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn request(dir: &Path) -> RenderRequest {
        RenderRequest {
            source: dir.join("source.mp4"),
            operations: vec![EditOperation::new("trim", json!({ "start": 1.5 }))],
            profile: QualityProfile::proxy(),
            output: dir.join("out.partial"),
        }
    }

    // Scripts are written and executed from one test so no concurrent fork
    // holds a writable handle to them.
    #[tokio::test]
    async fn test_command_transcoder_contract() {
        let dir = tempfile::tempdir().unwrap();

        let echo = script(
            dir.path(),
            "echo-transcode",
            r#"out=""; args="$*"
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
cat > "$out"
echo "$args" > "$out.args""#,
        );
        let transcoder = CommandTranscoder::new(&echo);
        assert!(transcoder.is_available());
        assert_eq!(transcoder.name(), "echo-transcode");

        let req = request(dir.path());
        transcoder.render(&req).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&req.output).unwrap()).unwrap();
        assert_eq!(written[0]["type"], "trim");
        assert_eq!(written[0]["parameters"]["start"], 1.5);
        let args = std::fs::read_to_string(dir.path().join("out.partial.args")).unwrap();
        assert!(args.contains("--profile proxy --width 640 --height 360"));

        let failing = script(dir.path(), "fail-transcode", "echo 'codec exploded' >&2\nexit 3");
        let err = CommandTranscoder::new(&failing)
            .render(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, CutlogError::Transcoding { .. }));
        assert!(err.to_string().contains("codec exploded"));

        let missing = CommandTranscoder::new(dir.path().join("does-not-exist"));
        assert!(!missing.is_available());
        assert!(matches!(
            missing.render(&request(dir.path())).await,
            Err(CutlogError::Transcoding { .. })
        ));
    }
}
