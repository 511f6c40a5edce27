//! Application entry point — Sidecar.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Bootstrap components (engines, recorder, skills, snapshot restore).
//! 4. Create channels (triggers, presentation).
//! 5. Spawn the terminal stream renderer.
//! 6. Spawn the hotkey listener thread.
//! 7. Run the dispatcher until the trigger channel closes or ctrl-c.
//! 8. On shutdown: abort any open recording, drop the hotkey listener.

use sidecar::config::{AppConfig, AppPaths};
use sidecar::dispatch::{Dispatcher, Trigger};
use sidecar::hotkey::{bindings_from_config, HotkeyListener};
use sidecar::session;
use sidecar::ui::{StreamRenderer, UiMessage};

use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Sidecar starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let paths = AppPaths::new();

    // 3. Component bootstrap (the one fatal failure: no engine credential)
    let components = session::bootstrap(&config, &paths)?;

    // 4. Channels
    let (trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(16);
    let (ui_tx, ui_rx) = mpsc::channel::<UiMessage>(64);

    // 5. Renderer task owns stdout
    tokio::spawn(StreamRenderer::new().run(ui_rx));

    // 6. Hotkey listener thread
    let bindings = bindings_from_config(&config.hotkeys);
    if bindings.is_empty() {
        anyhow::bail!("no usable hotkey bindings — check [hotkeys] in settings.toml");
    }
    let listener = HotkeyListener::start(bindings, trigger_tx);

    {
        let mut brain = components.brain.lock().await;
        let model = brain.model_name();
        let engine = brain.active_engine_name().to_string();
        log::info!(
            "ready: engine={} model={} skill={}",
            engine,
            model,
            components.current_skill
        );
    }
    let _ = ui_tx.send(UiMessage::Status("READY".into())).await;

    // 7. Dispatch until shutdown
    let recorder = components.recorder.clone();
    let dispatcher = Dispatcher::new(
        components.brain,
        components.recorder,
        components.frames,
        components.skills,
        components.well,
        components.placeholders,
        components.current_skill,
        ui_tx,
    );

    tokio::select! {
        _ = dispatcher.run(trigger_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupt received, shutting down");
        }
    }

    // 8. Clean shutdown: close the microphone, stop forwarding hotkeys.
    recorder.lock().await.abort();
    drop(listener);

    Ok(())
}
