mod audio;
mod config;
mod controller;
mod net_link;
mod protocol;
mod session;
mod transmit;

use std::sync::Arc;

use anyhow::Context;
use audio::{AudioEvent, AudioSystem};
use config::Config;
use controller::SessionController;
use net_link::{NetCommand, NetEvent, NetLink};
use session::{SessionHandle, SessionState, Stats};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use transmit::Transmitter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;
    config.apply_args(std::env::args().skip(1));
    let url = config.endpoint_url()?;
    log::info!("{} v{}", config.app_name, config.app_version);

    let session = SessionHandle::new();
    let stats = Arc::new(Stats::default());

    // 事件通道
    let (tx_net_event, mut rx_net_event) = mpsc::channel::<NetEvent>(100);
    // 命令通道，音频帧经此交给 NetLink
    let (tx_net_cmd, rx_net_cmd) = mpsc::channel::<NetCommand>(config.send_queue_capacity.max(1));
    // 音频线程上报
    let (tx_audio_event, mut rx_audio_event) = mpsc::channel::<AudioEvent>(100);

    let mut audio_system = AudioSystem::start(config.audio_config(), tx_audio_event.clone())
        .context("Failed to open the playback device")?;
    let mut controller = SessionController::new(session.clone(), stats.clone(), audio_system.output());

    session.set(SessionState::Connecting);
    let net_link = NetLink::new(url, tx_net_event, rx_net_cmd);
    tokio::spawn(async move {
        net_link.run().await;
    });

    let start_mic = |audio_system: &mut AudioSystem| {
        let transmitter = Transmitter::new(
            config.participant_id.clone(),
            session.clone(),
            stats.clone(),
            tx_net_cmd.clone(),
        );
        match audio_system.start_capture(transmitter, tx_audio_event.clone()) {
            Ok(()) => log::info!("Microphone started"),
            Err(e) => log::error!("Mic error: {}", e),
        }
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stats_tick =
        tokio::time::interval(std::time::Duration::from_secs(config.stats_report_interval_secs.max(1)));

    log::info!(
        "Joining room \"{}\" as \"{}\". Commands: mic, stats, quit",
        config.room_id,
        config.username
    );

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                if let Err(e) = tx_net_cmd.try_send(NetCommand::Close) {
                    log::warn!("Close not queued ({}), exiting anyway", e);
                }
                break;
            }

            Some(event) = rx_net_event.recv() => {
                let connected = matches!(event, NetEvent::Connected);
                let disconnected = matches!(event, NetEvent::Disconnected);
                controller.handle_net_event(event);

                if connected && config.mic_on_connect && !audio_system.is_capturing() {
                    start_mic(&mut audio_system);
                }
                if disconnected {
                    audio_system.stop_capture();
                    audio_system.flush_playback();
                    break;
                }
            }

            Some(event) = rx_audio_event.recv() => {
                controller.handle_audio_event(event);
            }

            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(cmd)) => match cmd.trim() {
                        "mic" => {
                            if audio_system.is_capturing() {
                                audio_system.stop_capture();
                            } else if session.is_connected() {
                                start_mic(&mut audio_system);
                            } else {
                                log::warn!("Not connected, microphone stays off");
                            }
                        }
                        "stats" => log::info!("{}", stats.summary()),
                        "quit" => {
                            if !request_close(&tx_net_cmd).await {
                                break;
                            }
                        }
                        "" => {}
                        other => log::warn!("Unknown command: {}", other),
                    },
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }

            _ = stats_tick.tick() => {
                if session.is_connected() {
                    log::info!("{}", stats.summary());
                }
            }
        }
    }

    audio_system.stop();
    log::info!("{}", stats.summary());
    Ok(())
}

/// Queue a close behind any frames still waiting to be sent.
///
/// Returns `false` if the link is already gone.
async fn request_close(tx: &mpsc::Sender<NetCommand>) -> bool {
    match tx.send(NetCommand::Close).await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to queue close: {}", e);
            false
        }
    }
}
