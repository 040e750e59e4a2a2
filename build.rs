use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    audio: Audio,
    stats: Stats,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    server_url: String,
    room_id: String,
    username: String,
    participant_id: String,
    send_queue_capacity: usize,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    capture_channels: u32,
    capture_block_size: usize,
    playback_period_size: usize,
    mic_on_connect: bool,
}

#[derive(Deserialize)]
struct Stats {
    report_interval_secs: u64,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 网络配置
    println!("cargo:rustc-env=SERVER_URL={}", config.network.server_url);
    println!("cargo:rustc-env=ROOM_ID={}", config.network.room_id);
    println!("cargo:rustc-env=RELAY_USERNAME={}", config.network.username);
    println!("cargo:rustc-env=PARTICIPANT_ID={}", config.network.participant_id);
    println!("cargo:rustc-env=SEND_QUEUE_CAPACITY={}", config.network.send_queue_capacity);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.audio.capture_sample_rate);
    println!("cargo:rustc-env=CAPTURE_CHANNELS={}", config.audio.capture_channels);
    println!("cargo:rustc-env=CAPTURE_BLOCK_SIZE={}", config.audio.capture_block_size);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=MIC_ON_CONNECT={}", config.audio.mic_on_connect);

    println!("cargo:rustc-env=STATS_REPORT_INTERVAL={}", config.stats.report_interval_secs);
}
