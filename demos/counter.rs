//! Counter Example - Debounced writes driving one re-render per burst
//!
//! Press `+` quickly several times: the counter line is printed once per
//! quiet window, not once per key. `b` toggles the busy flag, `q` quits.
//!
//! Reads `global-bus.toml` from the working directory if present.
//! Set `RUST_LOG=global_bus=debug` to watch flushes.
//!
//! Run with: cargo run --example counter

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use tracing_subscriber::EnvFilter;

use global_bus::{
    field, use_get_global, use_global, BusConfig, BusError, GlobalProvider, GlobalStore,
    ProviderGuard, SystemClock,
};

const IDLE_POLL: Duration = Duration::from_millis(500);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let config = BusConfig::load_or_default("global-bus.toml").map_err(BusError::from)?;
    let root = GlobalProvider::mount(GlobalStore::from_config(&config, SystemClock));

    let _render = root.store().subscribe(|state| {
        print!(
            "\r\ncounter = {:<4} busy = {:<5} (+ increment, b busy, q quit)\r\n",
            state.progress, state.remote_busy
        );
    });

    terminal::enable_raw_mode()?;
    let result = run(&root);
    terminal::disable_raw_mode()?;
    result?;

    Ok(())
}

fn run(root: &ProviderGuard) -> io::Result<()> {
    loop {
        let timeout = root.store().time_until_flush().unwrap_or(IDLE_POLL);

        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('+') => increment(),
                KeyCode::Char('b') => toggle_busy(),
                _ => {}
            }
        }

        root.store().poll();
    }

    root.store().flush_now();
    Ok(())
}

fn increment() {
    // Read through the pending buffer so fast presses stack up.
    let current = use_get_global().get::<field::Progress>().unwrap_or(0);
    if let (_, Some(set_progress)) = use_global::<field::Progress>() {
        set_progress.set(current + 1);
    }
}

fn toggle_busy() {
    if let (Some(busy), Some(set_busy)) = use_global::<field::RemoteBusy>() {
        set_busy.set(!busy);
    }
}
