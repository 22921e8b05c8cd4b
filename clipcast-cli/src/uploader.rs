//! An [`Uploader`] that delegates to an external command.
//!
//! Lets the daemon drive real uploads without linking browser automation into
//! this binary: each platform is configured with a command line, e.g.
//!
//! ```text
//! clipcast run --uploader instagram="upload-reel {clip} {caption}"
//! ```
//!
//! `{clip}`, `{caption}`, and `{platform}` in the arguments are substituted
//! before the command runs. Credentials are passed via the child's
//! environment (`CLIPCAST_UPLOAD_USERNAME`/`CLIPCAST_UPLOAD_PASSWORD`), never
//! on the command line.
//!
//! The exit status carries the failure classification, following the
//! `sysexits.h` convention where one exists:
//!
//! | exit code | meaning                                   |
//! |-----------|-------------------------------------------|
//! | 0         | success                                   |
//! | 65, 77, 78| fatal (bad content, rejected, bad config) |
//! | 80        | needs manual intervention (e.g. CAPTCHA)  |
//! | any other | transient, retried with backoff           |

use std::path::Path;

use async_trait::async_trait;
use clipcast::credentials::Credentials;
use clipcast::metadata::ClipMetadata;
use clipcast::platform::Platform;
use clipcast::uploader::{UploadOutcome, Uploader};

const EXIT_FATAL: [i32; 3] = [65, 77, 78];
const EXIT_NEEDS_INTERVENTION: i32 = 80;

pub struct CommandUploader {
    platform: Platform,
    program: String,
    args: Vec<String>,
}

impl CommandUploader {
    pub fn new(platform: Platform, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            platform,
            program: program.into(),
            args,
        }
    }

    /// Parses a `platform=command arg arg...` specification.
    pub fn parse_spec(spec: &str) -> anyhow::Result<(Platform, Self)> {
        let (platform, command) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected <platform>=<command>, got {spec:?}"))?;
        let platform: Platform = platform
            .trim()
            .parse()
            .map_err(|err| anyhow::anyhow!("{err}"))?;
        let mut words = command.split_whitespace().map(str::to_owned);
        let program = words
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty command for {platform}"))?;
        Ok((platform, Self::new(platform, program, words.collect())))
    }

    fn render(&self, template: &str, clip_path: &Path, metadata: &ClipMetadata) -> String {
        template
            .replace("{clip}", &clip_path.display().to_string())
            .replace("{caption}", &metadata.formatted_caption())
            .replace("{platform}", self.platform.as_str())
    }
}

#[async_trait]
impl Uploader for CommandUploader {
    async fn upload(
        &self,
        clip_path: &Path,
        metadata: &ClipMetadata,
        credentials: &Credentials,
    ) -> UploadOutcome {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| self.render(arg, clip_path, metadata))
            .collect();
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .env("CLIPCAST_UPLOAD_USERNAME", &credentials.username)
            .env("CLIPCAST_UPLOAD_PASSWORD", &credentials.password)
            .env("CLIPCAST_UPLOAD_PLATFORM", self.platform.as_str())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            // A missing or unrunnable command will fail every retry the same
            // way.
            Err(err) => {
                return UploadOutcome::fatal(format!("failed to run {}: {err}", self.program))
            }
        };

        if output.status.success() {
            return UploadOutcome::Success;
        }
        let detail = match output.status.code() {
            Some(code) => format!(
                "{} exited with status {code}: {}",
                self.program,
                stderr_tail(&output.stderr)
            ),
            None => format!("{} was killed by a signal", self.program),
        };
        match output.status.code() {
            Some(code) if EXIT_FATAL.contains(&code) => UploadOutcome::fatal(detail),
            Some(EXIT_NEEDS_INTERVENTION) => UploadOutcome::needs_intervention(detail),
            _ => UploadOutcome::transient(detail),
        }
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let tail: Vec<_> = text.lines().rev().take(3).collect();
    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
}

#[cfg(test)]
mod test {
    use super::*;

    fn metadata() -> ClipMetadata {
        ClipMetadata::new("caption").with_hashtags(vec!["tag"])
    }

    fn credentials() -> Credentials {
        Credentials::new("creator", "hunter2")
    }

    #[test]
    fn parse_spec_splits_platform_and_command() {
        let (platform, uploader) =
            CommandUploader::parse_spec("tiktok=upload-clip --fast {clip}").unwrap();
        assert_eq!(platform, Platform::TikTok);
        assert_eq!(uploader.program, "upload-clip");
        assert_eq!(uploader.args, vec!["--fast", "{clip}"]);

        assert!(CommandUploader::parse_spec("no-equals-sign").is_err());
        assert!(CommandUploader::parse_spec("myspace=upload").is_err());
        assert!(CommandUploader::parse_spec("tiktok=").is_err());
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let uploader = CommandUploader::new(Platform::TikTok, "true", vec![]);
        let outcome = uploader
            .upload(Path::new("clip.mp4"), &metadata(), &credentials())
            .await;
        assert_eq!(outcome, UploadOutcome::Success);
    }

    #[tokio::test]
    async fn nonzero_exit_is_transient_by_default() {
        let uploader = CommandUploader::new(Platform::TikTok, "false", vec![]);
        let outcome = uploader
            .upload(Path::new("clip.mp4"), &metadata(), &credentials())
            .await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failure(failure)
                if failure.kind == clipcast::uploader::FailureKind::Transient
        ));
    }

    #[tokio::test]
    async fn classified_exit_codes_map_to_failure_kinds() {
        for (code, kind) in [
            (77, clipcast::uploader::FailureKind::Fatal),
            (80, clipcast::uploader::FailureKind::NeedsIntervention),
            (75, clipcast::uploader::FailureKind::Transient),
        ] {
            let uploader = CommandUploader::new(
                Platform::Instagram,
                "sh",
                vec!["-c".to_owned(), format!("exit {code}")],
            );
            let outcome = uploader
                .upload(Path::new("clip.mp4"), &metadata(), &credentials())
                .await;
            assert!(
                matches!(outcome, UploadOutcome::Failure(ref failure) if failure.kind == kind),
                "exit {code} should classify as {kind:?}, got {outcome:?}"
            );
        }
    }

    #[tokio::test]
    async fn missing_program_is_fatal() {
        let uploader = CommandUploader::new(Platform::TikTok, "clipcast-no-such-binary", vec![]);
        let outcome = uploader
            .upload(Path::new("clip.mp4"), &metadata(), &credentials())
            .await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failure(failure)
                if failure.kind == clipcast::uploader::FailureKind::Fatal
        ));
    }

    #[test]
    fn render_substitutes_placeholders() {
        let uploader = CommandUploader::new(Platform::Instagram, "upload", vec![]);
        let rendered = uploader.render("{platform}:{clip}", Path::new("a.mp4"), &metadata());
        assert_eq!(rendered, "instagram:a.mp4");
    }
}
