use crate::image_ops::operations::DEFAULT_JPEG_QUALITY;
use envconfig::Envconfig;
use log::info;
use std::collections::HashSet;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Named resize target. A zero side keeps the source aspect ratio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
    pub name: String,
}

/// Ordered, validated list of resize targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimensions(Vec<Dimension>);

impl Dimensions {
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self, ParseDimensionsError> {
        if dimensions.is_empty() {
            return Err(ParseDimensionsError::new("at least one dimension is required"));
        }
        {
            let mut seen = HashSet::new();
            for dimension in &dimensions {
                if dimension.name.is_empty()
                    || !dimension
                        .name
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                {
                    return Err(ParseDimensionsError::new(format!(
                        "invalid size label {:?}, expected [a-z0-9-]+",
                        dimension.name
                    )));
                }
                if dimension.width == 0 && dimension.height == 0 {
                    return Err(ParseDimensionsError::new(format!(
                        "{}: width and height can't both be 0",
                        dimension.name
                    )));
                }
                if !seen.insert(dimension.name.as_str()) {
                    return Err(ParseDimensionsError::new(format!(
                        "duplicated size label {}",
                        dimension.name
                    )));
                }
            }
        }
        Ok(Dimensions(dimensions))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Dimension] {
        &self.0
    }

    /// Empty label is always allowed, it stands for the unscaled copy
    pub fn is_allowed_label(&self, label: &str) -> bool {
        label.is_empty() || self.0.iter().any(|d| d.name == label)
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Dimensions(vec![
            Dimension {
                width: 0,
                height: 120,
                name: "small".to_string(),
            },
            Dimension {
                width: 0,
                height: 600,
                name: "medium".to_string(),
            },
            Dimension {
                width: 0,
                height: 800,
                name: "large".to_string(),
            },
        ])
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{msg}")]
pub struct ParseDimensionsError {
    msg: String,
}

impl ParseDimensionsError {
    fn new(msg: impl Into<String>) -> Self {
        ParseDimensionsError { msg: msg.into() }
    }
}

impl FromStr for Dimensions {
    type Err = ParseDimensionsError;

    /// `small=0x120,medium=0x600,exact=640x480`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut dimensions = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, size) = entry.split_once('=').ok_or_else(|| {
                ParseDimensionsError::new(format!("Expected \"name=WIDTHxHEIGHT\", got {}", entry))
            })?;
            let (width, height) = size.split_once('x').ok_or_else(|| {
                ParseDimensionsError::new(format!("Expected \"WIDTHxHEIGHT\", got {}", size))
            })?;
            let parse = |v: &str| {
                v.trim().parse::<u32>().map_err(|_| {
                    ParseDimensionsError::new(format!("Invalid size {:?} in {}", v, entry))
                })
            };
            dimensions.push(Dimension {
                width: parse(width)?,
                height: parse(height)?,
                name: name.trim().to_string(),
            });
        }
        Dimensions::new(dimensions)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .iter()
            .map(|d| format!("{}={}x{}", d.name, d.width, d.height))
            .collect();
        write!(f, "{}", entries.join(","))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(String),
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
    #[error("JPEG_QUALITY must be within 1..=100, got {0}")]
    Quality(u8),
    #[error("WORKER_COUNT + MAX_ABANDONED_RESIZES must not exceed {max}")]
    InFlightLimit { max: usize },
}

#[derive(Envconfig)]
struct EnvConfig {
    #[envconfig(from = "HOST", default = "0.0.0.0")]
    pub host: String,
    #[envconfig(from = "PORT", default = "8080")]
    pub port: u32,

    // ------------------
    // Storage layout
    /// Originals, stored as `<owner>#<receipt_id>.jpg`
    #[envconfig(from = "UPLOADS_DIR", default = "receipts/uploads")]
    pub uploads_dir: String,
    /// Resized variants, stored under `<owner>/`
    #[envconfig(from = "RESIZED_DIR", default = "receipts/resized")]
    pub resized_dir: String,

    // ------------------
    // Resize queue
    #[envconfig(from = "QUEUE_CAPACITY", default = "100")]
    pub queue_capacity: NonZeroUsize,
    #[envconfig(from = "WORKER_COUNT", default = "4")]
    pub worker_count: NonZeroUsize,
    #[envconfig(from = "RESIZE_TIMEOUT_MS", default = "2000")]
    pub resize_timeout_ms: u64,
    /// Timed out resizes keep running in background, this caps how many of them may pile up
    #[envconfig(from = "MAX_ABANDONED_RESIZES", default = "4")]
    pub max_abandoned_resizes: usize,

    // ------------------
    // Processing settings
    #[envconfig(from = "DIMENSIONS", default = "small=0x120,medium=0x600,large=0x800")]
    pub dimensions: Dimensions,
    #[envconfig(from = "JPEG_QUALITY", default = "75")]
    pub jpeg_quality: u8,

    // ------------------
    // Upload validation
    #[envconfig(from = "MAX_UPLOAD_SIZE", default = "10485760")]
    pub max_upload_size: usize,
    #[envconfig(from = "MIN_IMAGE_WIDTH", default = "600")]
    pub min_image_width: u32,
    #[envconfig(from = "MIN_IMAGE_HEIGHT", default = "800")]
    pub min_image_height: u32,

    /// Client cache (in browser) duration (in seconds) for served images
    #[envconfig(from = "CLIENT_CACHE_TTL", default = "31536000")]
    pub client_cache_ttl: usize,
    #[envconfig(from = "REQUEST_TIMEOUT_SECS", default = "30")]
    pub request_timeout_secs: u64,
}

/// Settings of the resize worker pool, fixed for the lifetime of the pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub queue_capacity: NonZeroUsize,
    pub worker_count: NonZeroUsize,
    pub resize_timeout: Duration,
    pub max_abandoned_resizes: usize,
}

impl PoolConfig {
    /// Operations allowed to run at once, running and abandoned ones together
    pub fn in_flight_permits(&self) -> Result<usize, ConfigError> {
        self.worker_count
            .get()
            .checked_add(self.max_abandoned_resizes)
            .filter(|permits| *permits <= Semaphore::MAX_PERMITS)
            .ok_or(ConfigError::InFlightLimit {
                max: Semaphore::MAX_PERMITS,
            })
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            queue_capacity: NonZeroUsize::new(100).unwrap(),
            worker_count: NonZeroUsize::new(4).unwrap(),
            resize_timeout: Duration::from_secs(2),
            max_abandoned_resizes: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u32,
    pub uploads_dir: PathBuf,
    pub resized_dir: PathBuf,
    pub pool: PoolConfig,
    pub dimensions: Dimensions,
    pub jpeg_quality: u8,

    pub max_upload_size: usize,
    pub min_image_width: u32,
    pub min_image_height: u32,
    pub client_cache_ttl: usize,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            uploads_dir: PathBuf::from("receipts/uploads"),
            resized_dir: PathBuf::from("receipts/resized"),
            pool: PoolConfig::default(),
            dimensions: Dimensions::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_upload_size: 10 * 1024 * 1024,
            min_image_width: 600,
            min_image_height: 800,
            client_cache_ttl: 31536000,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let env_conf = EnvConfig::init_from_env().map_err(|e| ConfigError::Env(e.to_string()))?;
        Self::from_env_config(env_conf)
    }

    fn from_env_config(env_conf: EnvConfig) -> Result<Config, ConfigError> {
        if env_conf.resize_timeout_ms == 0 {
            return Err(ConfigError::Zero("RESIZE_TIMEOUT_MS"));
        }
        if env_conf.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("REQUEST_TIMEOUT_SECS"));
        }
        if !(1..=100).contains(&env_conf.jpeg_quality) {
            return Err(ConfigError::Quality(env_conf.jpeg_quality));
        }

        let pool = PoolConfig {
            queue_capacity: env_conf.queue_capacity,
            worker_count: env_conf.worker_count,
            resize_timeout: Duration::from_millis(env_conf.resize_timeout_ms),
            max_abandoned_resizes: env_conf.max_abandoned_resizes,
        };
        pool.in_flight_permits()?;

        info!(
            "Resize queue: capacity {}, {} workers, timeout {}ms",
            env_conf.queue_capacity, env_conf.worker_count, env_conf.resize_timeout_ms
        );
        info!("Using dimensions {}", env_conf.dimensions);

        Ok(Config {
            host: env_conf.host,
            port: env_conf.port,
            uploads_dir: PathBuf::from(env_conf.uploads_dir),
            resized_dir: PathBuf::from(env_conf.resized_dir),
            pool,
            dimensions: env_conf.dimensions,
            jpeg_quality: env_conf.jpeg_quality,
            max_upload_size: env_conf.max_upload_size,
            min_image_width: env_conf.min_image_width,
            min_image_height: env_conf.min_image_height,
            client_cache_ttl: env_conf.client_cache_ttl,
            request_timeout: Duration::from_secs(env_conf.request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env_conf =
            EnvConfig::init_from_hashmap(&vars).map_err(|e| ConfigError::Env(e.to_string()))?;
        Config::from_env_config(env_conf)
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.uploads_dir, PathBuf::from("receipts/uploads"));
        assert_eq!(config.pool.queue_capacity.get(), 100);
        assert_eq!(config.pool.resize_timeout, Duration::from_secs(2));
        assert_eq!(config.dimensions, Dimensions::default());
        assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn rejects_invalid_environment() {
        assert!(matches!(
            config_from(&[("RESIZE_TIMEOUT_MS", "0")]),
            Err(ConfigError::Zero("RESIZE_TIMEOUT_MS"))
        ));
        assert!(matches!(
            config_from(&[("REQUEST_TIMEOUT_SECS", "0")]),
            Err(ConfigError::Zero("REQUEST_TIMEOUT_SECS"))
        ));
        for quality in ["0", "101"] {
            assert!(matches!(
                config_from(&[("JPEG_QUALITY", quality)]),
                Err(ConfigError::Quality(_))
            ));
        }
        for vars in [
            [("QUEUE_CAPACITY", "0")],
            [("WORKER_COUNT", "0")],
            [("DIMENSIONS", "small=0x0")],
        ] {
            assert!(matches!(config_from(&vars), Err(ConfigError::Env(_))));
        }
        assert!(config_from(&[("JPEG_QUALITY", "100")]).is_ok());
    }

    #[test]
    fn rejects_unbounded_in_flight_operations() {
        let max = usize::MAX.to_string();
        assert!(matches!(
            config_from(&[("MAX_ABANDONED_RESIZES", max.as_str())]),
            Err(ConfigError::InFlightLimit { .. })
        ));

        let over = Semaphore::MAX_PERMITS.to_string();
        assert!(matches!(
            config_from(&[("WORKER_COUNT", "1"), ("MAX_ABANDONED_RESIZES", over.as_str())]),
            Err(ConfigError::InFlightLimit { .. })
        ));

        let pool = config_from(&[("WORKER_COUNT", "3"), ("MAX_ABANDONED_RESIZES", "2")])
            .unwrap()
            .pool;
        assert_eq!(pool.in_flight_permits().unwrap(), 5);
    }

    #[test]
    fn parses_dimension_list_in_order() {
        let dimensions: Dimensions = "small=0x120, medium=0x600,exact=640x480".parse().unwrap();

        let names: Vec<&str> = dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["small", "medium", "exact"]);
        assert_eq!(
            dimensions.as_slice()[2],
            Dimension {
                width: 640,
                height: 480,
                name: "exact".to_string()
            }
        );
    }

    #[test]
    fn default_env_value_matches_default_dimensions() {
        let parsed: Dimensions = "small=0x120,medium=0x600,large=0x800".parse().unwrap();
        assert_eq!(parsed, Dimensions::default());
        assert_eq!(parsed.to_string(), "small=0x120,medium=0x600,large=0x800");
    }

    #[test]
    fn rejects_invalid_dimension_lists() {
        for value in [
            "",
            "small",
            "small=120",
            "small=axb",
            "small=-1x10",
            "small=0x0",
            "small=0x120,small=0x60",
            "Small=0x120",
            "with_underscore=0x120",
            "=0x120",
        ] {
            assert!(
                value.parse::<Dimensions>().is_err(),
                "{value:?} should be rejected"
            );
        }
    }

    #[test]
    fn allowed_labels() {
        let dimensions = Dimensions::default();

        assert!(dimensions.is_allowed_label(""));
        assert!(dimensions.is_allowed_label("medium"));
        assert!(!dimensions.is_allowed_label("huge"));
    }
}
