//! Transcoding through external commands.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use shadow_config::EncoderProfile;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::instrument;

/// Produces `dest` from `source` according to an encoder profile.
///
/// `dest` always carries the profile's extension and is overwritten if it
/// exists.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, source: &Path, dest: &Path, profile: &EncoderProfile) -> Result<()>;
}

pub type EncoderHandle = Arc<dyn Encoder>;

/// Runs the profile's command through `sh -c`, with `source` and `dest`
/// exported to its environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandEncoder;

#[async_trait]
impl Encoder for CommandEncoder {
    #[instrument(level = "debug", skip(self, profile), fields(source = %source.display()))]
    async fn encode(&self, source: &Path, dest: &Path, profile: &EncoderProfile) -> Result<()> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&profile.command)
            .env("source", source)
            .env("dest", dest)
            .stdin(Stdio::null())
            .output()
            .await
            .or_raise(|| ErrorKind::Encode)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or_default();
            tracing::warn!(status = %output.status, stderr = last, "Encoder failed");
            exn::bail!(ErrorKind::Encode);
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_sees_source_and_dest() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in put.flac");
        let dest = dir.path().join("out put.mp3");
        std::fs::write(&source, b"audio").unwrap();
        let profile = EncoderProfile::new(r#"cp "$source" "$dest""#, "mp3");
        CommandEncoder.encode(&source, &dest, &profile).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn test_failing_command_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let profile = EncoderProfile::new("echo broken >&2; exit 3", "mp3");
        let err = CommandEncoder
            .encode(&dir.path().join("a.flac"), &dir.path().join("a.mp3"), &profile)
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Encode));
    }
}
