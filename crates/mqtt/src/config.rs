use hostname::get as get_hostname;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub topic_prefix: String,
    pub topic_suffix: String,
    /// Each consecutive failure adds one of these to the retry wait.
    pub backoff_secs: u64,
    pub max_backoff_count: u32,
    pub connect_timeout_ms: u64,
    /// How long one transport poll may wait for inbound traffic.
    pub poll_timeout_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.254".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            topic_prefix: "hsg/".to_string(),
            topic_suffix: String::new(),
            backoff_secs: 5,
            max_backoff_count: 5,
            connect_timeout_ms: 3000,
            poll_timeout_ms: 5,
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        let mut cfg = MqttConfig::default();

        if let Some(v) = non_empty("MQTT_BROKER_HOST") {
            cfg.host = v;
        }
        if let Some(p) = parsed("MQTT_BROKER_PORT") {
            cfg.port = p;
        }
        if let Some(v) = non_empty("MQTT_CLIENT_ID") {
            cfg.client_id = v;
        }
        cfg.username = non_empty("MQTT_USERNAME");
        cfg.password = non_empty("MQTT_PASSWORD");
        if let Some(s) = parsed("MQTT_KEEP_ALIVE_SECS") {
            cfg.keep_alive_secs = s;
        }
        // An explicitly empty prefix is meaningful, so only an unset var keeps the default.
        if let Ok(v) = env::var("MQTT_TOPIC_PREFIX") {
            cfg.topic_prefix = v;
        }
        if let Some(v) = non_empty("MQTT_TOPIC_SUFFIX") {
            cfg.topic_suffix = v;
        }
        if let Some(s) = parsed("MQTT_BACKOFF_SECS") {
            cfg.backoff_secs = s;
        }
        if let Some(n) = parsed("MQTT_MAX_BACKOFF_COUNT") {
            cfg.max_backoff_count = n;
        }
        if let Some(ms) = parsed("MQTT_CONNECT_TIMEOUT_MS") {
            cfg.connect_timeout_ms = ms;
        }
        if let Some(ms) = parsed("MQTT_POLL_TIMEOUT_MS") {
            cfg.poll_timeout_ms = ms;
        }

        cfg
    }

    pub fn backoff_interval_ms(&self) -> u64 {
        self.backoff_secs.saturating_mul(1000)
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("ledc-{}", host)
}
