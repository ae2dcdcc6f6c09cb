use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Process configuration: server settings plus engine tunables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// How often the scheduled full leaderboard recompute runs (0 disables it).
    pub recompute_interval: Duration,
    pub engine: EngineConfig,
}

/// Tunables for every engine component.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub shard_count: usize,
    pub scoring: ScoringConfig,
    pub decay: DecayConfig,
    pub history: HistoryConfig,
    pub trends: TrendConfig,
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub like_weight: f64,
    pub repost_weight: f64,
    pub comment_weight: f64,
    pub follower_engagement_factor: f64,
    /// Per-hop multiplier applied to amplifier reach; depth 1 has weight 1.
    pub amplification_decay: f64,
    pub max_amplification_hops: u8,
    /// Alignment distance at or below which engagement counts as within-group.
    pub alignment_threshold: f64,
    pub viral_threshold: f64,
    pub controversy_weight: f64,
    pub engagement_weight: f64,
    pub reach_weight: f64,
    pub virality_weight: f64,
    pub controversy_penalty_weight: f64,
    /// Reach at which the normalized reach component reaches ~63%.
    pub reach_scale: f64,
    /// Reposts per hour at which the velocity component reaches ~63%.
    pub velocity_scale: f64,
    pub breadth_scale: f64,
    pub amplification_scale: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            like_weight: 1.0,
            repost_weight: 2.0,
            comment_weight: 3.0,
            follower_engagement_factor: 1.0,
            amplification_decay: 0.5,
            max_amplification_hops: 2,
            alignment_threshold: 30.0,
            viral_threshold: 80.0,
            controversy_weight: 1.0,
            engagement_weight: 0.3,
            reach_weight: 0.3,
            virality_weight: 0.2,
            controversy_penalty_weight: 0.2,
            reach_scale: 1_000.0,
            velocity_scale: 5.0,
            breadth_scale: 1.0,
            amplification_scale: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecayConfig {
    pub engagement_half_life: Duration,
    pub virality_half_life: Duration,
    pub follower_half_life: Duration,
    pub influence_half_life: Duration,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            engagement_half_life: Duration::from_secs(24 * 3600),
            virality_half_life: Duration::from_secs(6 * 3600),
            follower_half_life: Duration::from_secs(7 * 24 * 3600),
            influence_half_life: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub snapshot_interval: Duration,
    /// Absolute score change that forces an immediate snapshot.
    pub delta_threshold: f64,
    pub retention: Duration,
    /// |slope| (score per day) at or below which a trend is `stable`.
    pub stability_tolerance: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(3600),
            delta_threshold: 5.0,
            retention: Duration::from_secs(90 * 24 * 3600),
            stability_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub bucket_width: Duration,
    pub retention: Duration,
    pub velocity_window: Duration,
    pub volume_weight: f64,
    pub velocity_weight: f64,
    pub volume_floor: f64,
    pub inactive_after_buckets: u32,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(300),
            retention: Duration::from_secs(24 * 3600),
            velocity_window: Duration::from_secs(3600),
            volume_weight: 2.0,
            velocity_weight: 5.0,
            volume_floor: 1.0,
            inactive_after_buckets: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Per-connection outbound queue depth before a forced disconnect.
    pub buffer_depth: usize,
    /// Number of published facts retained for resumption.
    pub replay_capacity: usize,
    pub heartbeat_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer_depth: 256,
            replay_capacity: 1024,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            scoring: ScoringConfig::default(),
            decay: DecayConfig::default(),
            history: HistoryConfig::default(),
            trends: TrendConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn shard_count(&self) -> usize {
        self.shard_count.max(1)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let recompute_interval = Duration::from_secs(parse_or(
            &env_map,
            "RECOMPUTE_INTERVAL_SECS",
            300u64,
            "must be a non-negative integer",
        )?);

        let shard_count = parse_or(&env_map, "SHARD_COUNT", 4usize, "must be a positive integer")?;
        if shard_count == 0 {
            return Err(ConfigError::InvalidValue(
                "SHARD_COUNT".to_string(),
                "must be a positive integer".to_string(),
            ));
        }

        let mut scoring = ScoringConfig::default();
        scoring.alignment_threshold = parse_bounded(
            &env_map,
            "ALIGNMENT_THRESHOLD",
            scoring.alignment_threshold,
            0.0,
            100.0,
        )?;
        scoring.viral_threshold =
            parse_bounded(&env_map, "VIRAL_THRESHOLD", scoring.viral_threshold, 0.0, 100.0)?;

        let defaults = DecayConfig::default();
        let decay = DecayConfig {
            engagement_half_life: parse_secs(
                &env_map,
                "ENGAGEMENT_HALF_LIFE_SECS",
                defaults.engagement_half_life,
            )?,
            virality_half_life: parse_secs(
                &env_map,
                "VIRALITY_HALF_LIFE_SECS",
                defaults.virality_half_life,
            )?,
            follower_half_life: parse_secs(
                &env_map,
                "FOLLOWER_HALF_LIFE_SECS",
                defaults.follower_half_life,
            )?,
            influence_half_life: parse_secs(
                &env_map,
                "INFLUENCE_HALF_LIFE_SECS",
                defaults.influence_half_life,
            )?,
        };

        let mut history = HistoryConfig::default();
        history.delta_threshold = parse_bounded(
            &env_map,
            "HISTORY_DELTA_THRESHOLD",
            history.delta_threshold,
            0.0,
            f64::MAX,
        )?;

        let mut trends = TrendConfig::default();
        trends.bucket_width = parse_secs(&env_map, "TREND_BUCKET_SECS", trends.bucket_width)?;
        trends.volume_floor =
            parse_bounded(&env_map, "TREND_VOLUME_FLOOR", trends.volume_floor, 0.0, f64::MAX)?;
        trends.inactive_after_buckets = parse_or(
            &env_map,
            "TREND_INACTIVE_BUCKETS",
            trends.inactive_after_buckets,
            "must be a non-negative integer",
        )?;

        let mut broadcast = BroadcastConfig::default();
        broadcast.buffer_depth = parse_or(
            &env_map,
            "STREAM_BUFFER_DEPTH",
            broadcast.buffer_depth,
            "must be a positive integer",
        )?
        .max(1);
        broadcast.replay_capacity = parse_or(
            &env_map,
            "STREAM_REPLAY_CAPACITY",
            broadcast.replay_capacity,
            "must be a non-negative integer",
        )?;
        broadcast.heartbeat_interval =
            parse_secs(&env_map, "HEARTBEAT_SECS", broadcast.heartbeat_interval)?;

        Ok(Config {
            port,
            database_path,
            recompute_interval,
            engine: EngineConfig {
                shard_count,
                scoring,
                decay,
                history,
                trends,
                broadcast,
            },
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
    }
}

fn parse_bounded(
    env_map: &HashMap<String, String>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, ConfigError> {
    let value = parse_or(env_map, key, default, "must be a number")?;
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be within [{}, {}]", min, max),
        ));
    }
    Ok(value)
}

/// Durations are configured in whole seconds and must be positive.
fn parse_secs(
    env_map: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs = parse_or(env_map, key, default.as_secs(), "must be a positive integer")?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a positive integer".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.engine.shard_count, 4);
        assert_eq!(config.engine.scoring.viral_threshold, 80.0);
        assert_eq!(config.engine.trends.bucket_width, Duration::from_secs(300));
        assert_eq!(config.recompute_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        let result = Config::from_env_map(env_map);
        match result {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SHARD_COUNT".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SHARD_COUNT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_alignment_threshold_out_of_range() {
        let mut env_map = setup_required_env();
        env_map.insert("ALIGNMENT_THRESHOLD".to_string(), "140".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "ALIGNMENT_THRESHOLD"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_half_life_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("VIRALITY_HALF_LIFE_SECS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "VIRALITY_HALF_LIFE_SECS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_overrides_applied() {
        let mut env_map = setup_required_env();
        env_map.insert("SHARD_COUNT".to_string(), "2".to_string());
        env_map.insert("HEARTBEAT_SECS".to_string(), "5".to_string());
        env_map.insert("STREAM_BUFFER_DEPTH".to_string(), "8".to_string());
        let config = Config::from_env_map(env_map).unwrap();
        assert_eq!(config.engine.shard_count, 2);
        assert_eq!(config.engine.broadcast.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.engine.broadcast.buffer_depth, 8);
    }
}
