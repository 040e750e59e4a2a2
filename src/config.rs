use url::Url;
use uuid::Uuid;

use crate::audio::AudioConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 网络配置
    pub server_url: &'static str,
    pub room_id: String,
    pub username: String,
    pub participant_id: String,
    pub send_queue_capacity: usize,

    // 音频配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub capture_sample_rate: u32,
    pub capture_channels: u32,
    pub capture_block_size: usize,
    pub playback_period_size: usize,
    pub mic_on_connect: bool,

    pub stats_report_interval_secs: u64,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            server_url: env!("SERVER_URL"),
            room_id: env!("ROOM_ID").to_string(),
            username: env!("RELAY_USERNAME").to_string(),
            participant_id: env!("PARTICIPANT_ID").to_string(),
            send_queue_capacity: env!("SEND_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse SEND_QUEUE_CAPACITY")?,

            capture_device: env!("CAPTURE_DEVICE"),
            playback_device: env!("PLAYBACK_DEVICE"),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            capture_channels: env!("CAPTURE_CHANNELS").parse()
                .map_err(|_| "Failed to parse CAPTURE_CHANNELS")?,
            capture_block_size: env!("CAPTURE_BLOCK_SIZE").parse()
                .map_err(|_| "Failed to parse CAPTURE_BLOCK_SIZE")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            mic_on_connect: env!("MIC_ON_CONNECT").parse()
                .map_err(|_| "Failed to parse MIC_ON_CONNECT")?,

            stats_report_interval_secs: env!("STATS_REPORT_INTERVAL").parse()
                .map_err(|_| "Failed to parse STATS_REPORT_INTERVAL")?,
        })
    }

    /// Apply `[room_id] [username]` positional overrides and fill in a
    /// generated username when none is configured.
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        if let Some(room) = args.next() {
            self.room_id = room;
        }
        if let Some(name) = args.next() {
            self.username = name;
        }
        if self.username.trim().is_empty() {
            self.username = generate_username();
        }
        if self.participant_id.trim().is_empty() {
            self.participant_id = self.username.clone();
        }
    }

    /// `{server_url}/ws/{room_id}/{username}` with each segment escaped.
    pub fn endpoint_url(&self) -> anyhow::Result<Url> {
        let mut url = Url::parse(self.server_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server url cannot be a base: {}", self.server_url))?
            .pop_if_empty()
            .push("ws")
            .push(&self.room_id)
            .push(&self.username);
        Ok(url)
    }

    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            capture_device: self.capture_device.to_string(),
            playback_device: self.playback_device.to_string(),
            capture_sample_rate: self.capture_sample_rate,
            capture_channels: self.capture_channels,
            capture_block_size: self.capture_block_size,
            playback_period_size: self.playback_period_size,
        }
    }
}

fn generate_username() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("user-{}", &id[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::new().expect("config.toml values parse");
        config.server_url = "ws://127.0.0.1:8000";
        config.room_id = "general".to_string();
        config.username = "alice".to_string();
        config
    }

    #[test]
    fn build_metadata_comes_from_config_toml() {
        let config = Config::new().unwrap();
        assert_eq!(config.app_name, "pcm_relay");
        assert!(!config.app_version.is_empty());
    }

    #[test]
    fn endpoint_url_appends_room_and_username() {
        let config = test_config();
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/general/alice");
    }

    #[test]
    fn endpoint_url_escapes_segments() {
        let mut config = test_config();
        config.room_id = "team room".to_string();
        config.username = "a/b".to_string();
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/team%20room/a%2Fb");
    }

    #[test]
    fn endpoint_url_keeps_base_path() {
        let mut config = test_config();
        config.server_url = "wss://relay.example.com/voice/";
        let url = config.endpoint_url().unwrap();
        assert_eq!(url.as_str(), "wss://relay.example.com/voice/ws/general/alice");
    }

    #[test]
    fn args_override_room_and_username() {
        let mut config = test_config();
        config.apply_args(vec!["ai-test".to_string(), "bob".to_string()]);
        assert_eq!(config.room_id, "ai-test");
        assert_eq!(config.username, "bob");
    }

    #[test]
    fn empty_username_is_generated() {
        let mut config = test_config();
        config.username = String::new();
        config.apply_args(Vec::new());
        assert!(config.username.starts_with("user-"));
        assert_eq!(config.username.len(), "user-".len() + 4);
    }
}
