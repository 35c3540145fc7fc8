//! # Marketplace Configuration & Constants
//!
//! Every limit and default the marketplace relies on lives here. Runtime
//! settings (ports, data directory, secrets) come from the server's CLI and
//! environment; these are the values that shape behavior and persisted data.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// Version of the persisted record layout. Bump when a stored type changes
/// shape, since records are bincode-encoded and not self-describing.
pub const STORAGE_FORMAT_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Default lifetime of a session token.
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Length of the HMAC key used to sign session tokens, in bytes.
pub const SESSION_KEY_LENGTH: usize = 32;

/// Scheme prefix expected in the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

// ---------------------------------------------------------------------------
// Transaction limits
// ---------------------------------------------------------------------------

/// Maximum length of the buyer's initial message, in characters.
pub const MAX_INITIAL_MESSAGE_CHARS: usize = 1000;

/// Maximum length of shipment tracking information, in characters.
pub const MAX_TRACKING_INFO_CHARS: usize = 255;

/// Prefix of the chat message forwarded to the seller on initiation.
pub const INITIAL_MESSAGE_PREFIX: &str = "Message about your listing: ";

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

/// Lowest accepted rating score.
pub const MIN_RATING_SCORE: u8 = 1;

/// Highest accepted rating score.
pub const MAX_RATING_SCORE: u8 = 5;

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Upload size cap. Payment proofs are photos or PDFs; 10 MiB is plenty.
pub const MAX_ARTIFACT_BYTES: usize = 10 * 1024 * 1024;

/// File extensions accepted for uploaded artifacts.
pub const ALLOWED_ARTIFACT_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "pdf"];

/// Public path prefix under which artifact references are issued.
pub const ARTIFACT_URL_PREFIX: &str = "/uploads";

/// Directory, relative to the data directory, holding artifact files.
pub const ARTIFACT_DIR_NAME: &str = "uploads";

// ---------------------------------------------------------------------------
// Server defaults
// ---------------------------------------------------------------------------

/// Default HTTP API port.
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 5001;

/// Capacity of the live event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How often queued notification mail is handed to the deliverer.
pub const OUTBOX_DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// File name of the session key inside the data directory.
pub const SESSION_KEY_FILE: &str = "session.key";

/// Directory, relative to the data directory, holding the sled database.
pub const DB_DIR_NAME: &str = "db";
