use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Browser-like request headers passed to yt-dlp so extraction looks like a
/// regular Chrome session.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Error surface of the resolver boundary.
///
/// yt-dlp reports everything as free text on stderr; the two phrases that get
/// their own variant are the ones callers map to distinct HTTP statuses.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("YouTube bot detection triggered")]
    BotDetected(String),

    #[error("Video is private or unavailable")]
    Unavailable(String),

    #[error("{0}")]
    Extraction(String),

    #[error("failed to run yt-dlp: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// The raw text yt-dlp reported, regardless of classification.
    pub fn detail(&self) -> String {
        match self {
            ResolverError::BotDetected(text)
            | ResolverError::Unavailable(text)
            | ResolverError::Extraction(text) => text.clone(),
            ResolverError::Io(e) => e.to_string(),
        }
    }

    /// Classify yt-dlp's stderr text by substring.
    pub fn classify(stderr: &str) -> Self {
        let text = stderr.trim().to_string();
        if text.contains("Sign in to confirm") {
            ResolverError::BotDetected(text)
        } else if text.contains("Private video") {
            ResolverError::Unavailable(text)
        } else {
            ResolverError::Extraction(text)
        }
    }
}

/// Metadata projection of yt-dlp's `--dump-single-json` output.
///
/// Every field is optional: whatever the extractor omits stays absent rather
/// than being defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaMetadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    #[serde(default)]
    pub formats: Vec<serde_json::Value>,
}

impl MediaMetadata {
    pub fn formats_available(&self) -> usize {
        self.formats.len()
    }
}

/// Per-request retrieval parameters.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// yt-dlp format selector (e.g. "bestaudio")
    pub format: String,

    /// Ask yt-dlp to post-process into 16 kHz mono WAV for speech recognition
    pub convert_wav: bool,

    /// Directory the artifact is written into; owned by the caller
    pub output_dir: PathBuf,
}

/// The external-capability seam: URL in, metadata or downloaded files out.
///
/// Handlers depend only on this trait, never on the yt-dlp CLI surface.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve descriptive metadata without retrieving media bytes.
    async fn resolve_metadata(&self, url: &str) -> Result<MediaMetadata, ResolverError>;

    /// Retrieve (and optionally transcode) the media into
    /// `options.output_dir`, returning the produced file paths in
    /// lexicographic order.
    async fn retrieve(&self, url: &str, options: &RetrieveOptions)
        -> Result<Vec<PathBuf>, ResolverError>;
}

/// Configuration for the yt-dlp subprocess resolver
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary
    pub binary: String,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: "yt-dlp".to_string(),
        }
    }
}

impl YtDlpConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            binary: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
        }
    }
}

/// Production resolver that shells out to the yt-dlp binary.
pub struct YtDlpResolver {
    config: YtDlpConfig,
}

impl YtDlpResolver {
    pub fn new(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn build_metadata_args(url: &str) -> Vec<String> {
        vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            url.to_string(),
        ]
    }

    fn build_retrieve_args(url: &str, options: &RetrieveOptions) -> Vec<String> {
        let output_template = options
            .output_dir
            .join("%(id)s.%(ext)s")
            .to_string_lossy()
            .into_owned();

        let mut args = vec![
            "-f".to_string(),
            options.format.clone(),
            "-o".to_string(),
            output_template,
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "--user-agent".to_string(),
            USER_AGENT.to_string(),
            "--add-header".to_string(),
            format!("Accept-Language:{ACCEPT_LANGUAGE}"),
            "--add-header".to_string(),
            format!("Accept:{ACCEPT}"),
        ];

        if options.convert_wav {
            // yt-dlp drives ffmpeg itself; 16 kHz mono is what the
            // downstream speech recognizer expects.
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "wav".to_string(),
                "--postprocessor-args".to_string(),
                "ffmpeg:-ar 16000 -ac 1".to_string(),
            ]);
        }

        args.push(url.to_string());
        args
    }

    async fn run(&self, args: &[String]) -> Result<Vec<u8>, ResolverError> {
        debug!("yt-dlp command: {} {}", self.config.binary, args.join(" "));

        let output = Command::new(&self.config.binary).args(args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp exited with {}: {}", output.status, stderr.trim());
            return Err(ResolverError::classify(&stderr));
        }

        Ok(output.stdout)
    }

    /// List the files yt-dlp left in the output directory, sorted by name so
    /// artifact selection is deterministic.
    async fn list_output_dir(dir: &Path) -> Result<Vec<PathBuf>, ResolverError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve_metadata(&self, url: &str) -> Result<MediaMetadata, ResolverError> {
        let args = Self::build_metadata_args(url);
        let stdout = self.run(&args).await?;

        serde_json::from_slice(&stdout).map_err(|e| {
            ResolverError::Extraction(format!("unexpected yt-dlp metadata output: {e}"))
        })
    }

    async fn retrieve(
        &self,
        url: &str,
        options: &RetrieveOptions,
    ) -> Result<Vec<PathBuf>, ResolverError> {
        let args = Self::build_retrieve_args(url, options);

        info!(
            "Retrieving {} (format={}, convert_wav={})",
            url, options.format, options.convert_wav
        );
        self.run(&args).await?;

        Self::list_output_dir(&options.output_dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_bot_detection() {
        let err = ResolverError::classify(
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot.",
        );
        assert!(matches!(err, ResolverError::BotDetected(_)));
    }

    #[test]
    fn classify_private_video() {
        let err = ResolverError::classify("ERROR: [youtube] abc: Private video");
        assert!(matches!(err, ResolverError::Unavailable(_)));
    }

    #[test]
    fn classify_other_errors_as_extraction() {
        let err = ResolverError::classify("ERROR: Unsupported URL: https://example.com");
        assert!(matches!(err, ResolverError::Extraction(_)));
        assert_eq!(
            err.to_string(),
            "ERROR: Unsupported URL: https://example.com"
        );
    }

    #[test]
    fn metadata_ignores_undeclared_fields() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Test",
            "duration": 212.5,
            "uploader": "Channel",
            "view_count": 42,
            "upload_date": "20091025",
            "formats": [{"format_id": "251"}, {"format_id": "140"}],
            "thumbnails": [{"url": "https://example.com/t.jpg"}],
            "webpage_url": "https://youtube.com/watch?v=dQw4w9WgXcQ"
        }"#;

        let meta: MediaMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(meta.formats_available(), 2);
    }

    #[test]
    fn metadata_missing_fields_stay_absent() {
        let meta: MediaMetadata = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert!(meta.title.is_none());
        assert!(meta.view_count.is_none());
        assert_eq!(meta.formats_available(), 0);
    }

    #[test]
    fn retrieve_args_include_anti_detection_headers() {
        let options = RetrieveOptions {
            format: "bestaudio".to_string(),
            convert_wav: false,
            output_dir: PathBuf::from("/tmp/work"),
        };
        let args = YtDlpResolver::build_retrieve_args("https://youtu.be/x", &options);

        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.iter().any(|a| a.contains("Chrome/120.0.0.0")));
        assert!(args.contains(&format!("Accept-Language:{ACCEPT_LANGUAGE}")));
        assert!(!args.contains(&"-x".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }

    #[test]
    fn retrieve_args_add_wav_postprocessing_when_requested() {
        let options = RetrieveOptions {
            format: "bestaudio".to_string(),
            convert_wav: true,
            output_dir: PathBuf::from("/tmp/work"),
        };
        let args = YtDlpResolver::build_retrieve_args("https://youtu.be/x", &options);

        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"wav".to_string()));
        assert!(args.contains(&"ffmpeg:-ar 16000 -ac 1".to_string()));
    }

    #[test]
    fn output_template_is_rooted_in_output_dir() {
        let options = RetrieveOptions {
            format: "bestaudio".to_string(),
            convert_wav: false,
            output_dir: PathBuf::from("/tmp/work"),
        };
        let args = YtDlpResolver::build_retrieve_args("https://youtu.be/x", &options);
        let idx = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[idx + 1], "/tmp/work/%(id)s.%(ext)s");
    }
}
