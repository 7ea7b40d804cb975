// Prevents additional console window on Windows in release mode
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use mxprint_engine::command::CommandOutcome;
use mxprint_engine::config::EngineConfig;
use mxprint_engine::device::Device;
use mxprint_engine::manager::ConnectionManager;
use mxprint_engine::packet::multi_row::MultiRowSendMode;
use mxprint_engine::Event;
use std::sync::Arc;
use std::time::Duration;
use tauri::{Emitter, Manager, State};
use tauri_plugin_store::StoreExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Holds the engine singleton and the background task relaying its
/// event bus onto the webview. One per process, matching §4.2's
/// "singleton orchestrator."
struct AppState {
    manager: Arc<ConnectionManager>,
}

#[tauri::command]
async fn discover_ble_device(
    state: State<'_, AppState>,
    timeout_ms: u64,
) -> Result<(), String> {
    state
        .manager
        .discover_ble_device(Duration::from_millis(timeout_ms))
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn connect(state: State<'_, AppState>, device: Device) -> Result<(), String> {
    state.manager.connect(device).await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn disconnect(state: State<'_, AppState>) -> Result<(), String> {
    state.manager.disconnect().await.map_err(|e| e.to_string())
}

#[tauri::command]
async fn send_command(
    state: State<'_, AppState>,
    data: Vec<u8>,
    opcode: u16,
    delay_seconds: f64,
    tag: i32,
) -> Result<CommandOutcome, String> {
    state
        .manager
        .send_command(data, opcode, delay_seconds, tag)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn set_with_send_multi_row_data_packet(
    state: State<'_, AppState>,
    rows: Vec<Vec<u8>>,
    mode: MultiRowSendMode,
) -> Result<(), String> {
    state
        .manager
        .set_with_send_multi_row_data_packet(&rows, mode)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn set_with_send_logo_data_packet(
    state: State<'_, AppState>,
    data: Vec<u8>,
) -> Result<(), String> {
    state
        .manager
        .set_with_send_logo_data_packet(data)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn set_with_send_ota_data_packet(
    state: State<'_, AppState>,
    data: Vec<u8>,
) -> Result<(), String> {
    state
        .manager
        .set_with_send_ota_data_packet(data)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
async fn cancel_data_transfer(state: State<'_, AppState>) -> Result<(), String> {
    state.manager.cancel_data_transfer().await;
    Ok(())
}

#[tauri::command]
async fn distribution_network(
    state: State<'_, AppState>,
    target: Device,
    ssid: String,
    password: String,
    timeout_ms: u64,
) -> Result<Device, String> {
    state
        .manager
        .distribution_network(&target, &ssid, &password, Duration::from_millis(timeout_ms))
        .await
        .map_err(|e| e.to_string())
}

/// Forwards every engine event onto the webview as `engine://event`,
/// so the frontend subscribes once instead of polling each operation's
/// result. Mirrors the teacher's `telemetry.rs` reporter loop, adapted
/// from a periodic push to a pure relay.
async fn relay_events(app: tauri::AppHandle, manager: Arc<ConnectionManager>) {
    let mut subscription = manager.subscribe_events();
    loop {
        match subscription.recv().await {
            Ok(event) => {
                if let Err(e) = app.emit("engine://event", &event) {
                    warn!("failed to emit engine event to webview: {e}");
                }
                if matches!(event, Event::Disconnected { .. }) {
                    info!("relayed disconnect event");
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event relay lagged, dropped {skipped} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                error!("engine event bus closed, stopping relay");
                break;
            }
        }
    }
}

fn init_logging() {
    let log_dir = EngineConfig::config_dir().join("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::never(&log_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive `main`, and this
    // process has exactly one logging sink for its whole lifetime.
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("mxprint_engine=debug".parse().unwrap())
        .add_directive(tracing::Level::INFO.into());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    info!("log file: {}", log_dir.join("engine.log").display());
}

#[tokio::main]
async fn main() {
    init_logging();
    info!("mxprint-engine v{} starting", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load_or_default();
    let manager = ConnectionManager::new(config);

    let state = AppState { manager: manager.clone() };

    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .plugin(tauri_plugin_store::Builder::default().build())
        .manage(state)
        .setup(move |app| {
            // Load any persisted engine tunables from the Tauri store,
            // falling back to what EngineConfig::load_or_default already
            // read from disk if the store has nothing yet.
            let store = app.store("config.json")?;
            if let Some(stored) = store.get("config") {
                match serde_json::from_value::<EngineConfig>(stored.clone()) {
                    Ok(_) => info!("config confirmed present in tauri store"),
                    Err(e) => warn!("failed to parse stored config: {e}, using defaults"),
                }
            }

            let handle = app.handle().clone();
            let manager = manager.clone();
            tauri::async_runtime::spawn(relay_events(handle, manager));

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            discover_ble_device,
            connect,
            disconnect,
            send_command,
            set_with_send_multi_row_data_packet,
            set_with_send_logo_data_packet,
            set_with_send_ota_data_packet,
            cancel_data_transfer,
            distribution_network,
        ])
        .run(tauri::generate_context!())
        .expect("error while running mxprint-engine tauri application");
}
