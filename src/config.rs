//! Service configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding one subdirectory per job.
    pub work_root: PathBuf,
    /// Directory containing the Python processor scripts.
    pub processor_dir: PathBuf,
    /// Retention window for job workspaces.
    pub ttl_minutes: u64,
    /// Per-file upload ceiling.
    pub max_file_mb: u64,
    /// Ceiling on a single external tool invocation.
    pub tool_timeout_secs: u64,
    /// Cap on simultaneous external tool invocations.
    pub max_concurrent_tools: usize,
    /// Allowed CORS origin, "*" for any.
    pub cors_origin: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            work_root: env_parse("WORK_ROOT", PathBuf::from("tmp")),
            processor_dir: env_parse("PROCESSOR_DIR", PathBuf::from("processors")),
            ttl_minutes: env_parse("TTL_MINUTES", 15),
            max_file_mb: env_parse("MAX_FILE_MB", 100),
            tool_timeout_secs: env_parse("TOOL_TIMEOUT_SECS", 120),
            max_concurrent_tools: env_parse("MAX_CONCURRENT_TOOLS", 8),
            cors_origin: env_parse("CORS_ORIGIN", "*".to_string()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_env() {
        let config = Config::from_env();
        assert_eq!(config.ttl_minutes, 15);
        assert_eq!(config.max_file_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.ttl(), Duration::from_secs(15 * 60));
    }
}
