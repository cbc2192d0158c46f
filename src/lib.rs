//! HTTP gateway around the yt-dlp extraction binary
//!
//! Accepts a source URL, delegates extraction and format negotiation to
//! yt-dlp (which drives ffmpeg for optional WAV conversion), and streams the
//! resulting audio file back to the caller.

pub mod auth;
pub mod metrics;
pub mod resolver;
pub mod server;

// Re-export main types for convenience
pub use auth::AuthConfig;
pub use resolver::{MediaMetadata, MediaResolver, ResolverError, RetrieveOptions, YtDlpResolver};
pub use server::AppState;
