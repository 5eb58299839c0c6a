use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64_opt(key: &str) -> Option<u64> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub aws: AwsConfig,
    pub wheel: WheelConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            storage: StorageConfig::from_env(),
            aws: AwsConfig::from_env(),
            wheel: WheelConfig::from_env(),
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!(
            "  storage:  data_dir={}, restore_on_start={}",
            self.storage.data_dir.display(),
            self.storage.restore_on_start
        );
        tracing::info!(
            "  aws:      region={}, bucket={} ({})",
            self.aws.region.as_deref().unwrap_or("(none)"),
            self.aws.bucket.as_deref().unwrap_or("(none)"),
            if self.aws.is_configured() { "s3 snapshots" } else { "local snapshots" }
        );
        tracing::info!(
            "  wheel:    spoke_span_ms={}, max_memory_bytes={}",
            self.wheel.spoke_span_ms,
            self.wheel
                .max_memory_bytes
                .map(|b| b.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("SPINDLE_HOST", "0.0.0.0"),
            port: env_u16("SPINDLE_PORT", 8811),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Replay the latest snapshot into the hub at startup.
    pub restore_on_start: bool,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(env_or("SPINDLE_DATA_DIR", "./data")),
            restore_on_start: env_bool("SPINDLE_RESTORE_ON_START", true),
        }
    }
}

// ── AWS / S3 ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub bucket: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Key prefix snapshots live under inside the bucket.
    pub snapshot_prefix: String,
}

impl AwsConfig {
    fn from_env() -> Self {
        Self {
            region: env_opt("AWS_REGION"),
            bucket: env_opt("S3_BUCKET"),
            endpoint: env_opt("S3_ENDPOINT"),
            access_key_id: env_opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: env_opt("AWS_SECRET_ACCESS_KEY"),
            snapshot_prefix: env_or("SPINDLE_SNAPSHOT_PREFIX", "spindle/snapshots"),
        }
    }

    /// S3 snapshots are active only when both region and bucket are set.
    pub fn is_configured(&self) -> bool {
        self.region.is_some() && self.bucket.is_some()
    }
}

// ── Wheel ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Width of one future bucket in milliseconds. Smaller spans give
    /// tighter cross-bucket ordering at the cost of more buckets.
    pub spoke_span_ms: i64,
    /// High watermark for accounted payload bytes; unset disables the
    /// producer fence entirely.
    pub max_memory_bytes: Option<u64>,
    /// Usage must fall below this before fenced producers wake. Defaults
    /// to 90% of the high watermark.
    pub recovery_memory_bytes: Option<u64>,
}

impl WheelConfig {
    fn from_env() -> Self {
        Self {
            spoke_span_ms: env_i64("SPINDLE_SPOKE_SPAN_MS", 1_000),
            max_memory_bytes: env_u64_opt("SPINDLE_MAX_MEMORY_BYTES"),
            recovery_memory_bytes: env_u64_opt("SPINDLE_RECOVERY_MEMORY_BYTES"),
        }
    }

    /// Resolved (high, recovery) watermarks, or None when the fence is off.
    pub fn watermarks(&self) -> Option<(u64, u64)> {
        let high = self.max_memory_bytes?;
        let recovery = self
            .recovery_memory_bytes
            .unwrap_or_else(|| high.saturating_mul(9) / 10)
            .min(high);
        Some((high, recovery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermarks_default_recovery_to_ninety_percent() {
        let wheel = WheelConfig {
            spoke_span_ms: 1_000,
            max_memory_bytes: Some(1_000),
            recovery_memory_bytes: None,
        };
        assert_eq!(wheel.watermarks(), Some((1_000, 900)));
    }

    #[test]
    fn watermarks_clamp_recovery_below_high() {
        let wheel = WheelConfig {
            spoke_span_ms: 1_000,
            max_memory_bytes: Some(100),
            recovery_memory_bytes: Some(500),
        };
        assert_eq!(wheel.watermarks(), Some((100, 100)));
    }

    #[test]
    fn watermarks_absent_without_high() {
        let wheel = WheelConfig {
            spoke_span_ms: 1_000,
            max_memory_bytes: None,
            recovery_memory_bytes: Some(500),
        };
        assert_eq!(wheel.watermarks(), None);
    }
}
