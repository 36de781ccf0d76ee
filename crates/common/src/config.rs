/// All process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Deriv feed
    pub deriv_token: String,
    pub deriv_app_id: String,
    pub symbol: String,
    /// Candle duration in seconds.
    pub granularity_secs: u32,
    /// Maximum candles held in the sliding window.
    pub max_candles: usize,

    // Decision policy
    /// Minimum aggregate confidence, as a percentage, required to emit.
    pub min_confidence_to_send: f64,
    /// Minimum seconds between two emitted signals.
    pub signal_cooldown_secs: u64,
    /// Stability window before a candidate signal is committed.
    pub validate_signal_cooldown_secs: u64,

    // Telegram
    pub telegram_token: String,
    pub telegram_chat_id: i64,

    // Database
    pub database_url: String,

    // Indicator config file path
    pub indicators_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_chat_id = required_env("TELEGRAM_CHAT_ID")
            .parse::<i64>()
            .unwrap_or_else(|_| panic!("TELEGRAM_CHAT_ID must be a numeric chat id"));

        Config {
            deriv_token: required_env("DERIV_TOKEN"),
            deriv_app_id: optional_env("DERIV_APP_ID").unwrap_or_else(|| "72200".to_string()),
            symbol: optional_env("SYMBOL").unwrap_or_else(|| "R_25".to_string()),
            granularity_secs: parse_or("GRANULARITY", 60),
            max_candles: parse_or("MAX_CANDLES", 200),
            min_confidence_to_send: parse_or("MIN_CONFIDENCE_TO_SEND", 60.0),
            signal_cooldown_secs: parse_or("SIGNAL_COOLDOWN", 120),
            validate_signal_cooldown_secs: parse_or("VALIDATE_SIGNAL_COOLDOWN", 120),
            telegram_token: required_env("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id,
            database_url: required_env("DATABASE_URL"),
            indicators_config_path: optional_env("INDICATORS_CONFIG_PATH")
                .unwrap_or_else(|| "config/indicators.toml".to_string()),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    optional_env(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
