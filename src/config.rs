use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub push: PushConfig,
    pub product_name: String,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Base URL of the realtime store, e.g. "https://my-project.firebaseio.com"
    pub base_url: String,
    /// Path watched for lamp state writes, relative to the base URL.
    pub event_path: String,
    /// Path holding the device token registry, relative to the base URL.
    pub tokens_path: String,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub server_key: Option<String>,
    /// Must match the channel the app provisions on Android devices.
    pub channel_id: String,
    /// Must match the intent filter the app shell registers for notification taps.
    pub click_action: String,
}

fn env_required(key: &str) -> Result<String, String> {
    env::var(key).map_err(|_| format!("{key} environment variable is required"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let config = Self {
            store: StoreConfig {
                base_url: trim_trailing_slash(env_required("STORE_BASE_URL")?),
                event_path: env_or_default("STORE_EVENT_PATH", "lampu/last_event"),
                tokens_path: env_or_default("STORE_TOKENS_PATH", "fcm_tokens"),
            },
            push: PushConfig {
                endpoint: env_required("PUSH_ENDPOINT")?,
                server_key: env_optional("PUSH_SERVER_KEY"),
                channel_id: env_or_default("PUSH_CHANNEL_ID", "lamp_events"),
                click_action: env_or_default("PUSH_CLICK_ACTION", "FLUTTER_NOTIFICATION_CLICK"),
            },
            product_name: env_or_default("PRODUCT_NAME", "Smart Lamp"),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        check_url("STORE_BASE_URL", &self.store.base_url)?;
        check_url("PUSH_ENDPOINT", &self.push.endpoint)?;
        check_store_path("STORE_EVENT_PATH", &self.store.event_path)?;
        check_store_path("STORE_TOKENS_PATH", &self.store.tokens_path)?;
        if self.push.channel_id.is_empty() {
            return Err("PUSH_CHANNEL_ID must not be empty".into());
        }
        if self.product_name.is_empty() {
            return Err("PRODUCT_NAME must not be empty".into());
        }
        Ok(())
    }
}

fn trim_trailing_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn check_url(key: &str, url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err(format!("{key} must not be empty"));
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(format!("{key} must be an http(s) URL, got {url}"));
    }
    Ok(())
}

fn check_store_path(key: &str, path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err(format!("{key} must not be empty"));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(format!("{key} must not have leading or trailing slashes"));
    }
    Ok(())
}
