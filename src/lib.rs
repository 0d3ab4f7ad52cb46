//! # global-bus
//!
//! Debounced global-state bus for the audio project manager renderer.
//!
//! Built on [spark-signals](https://github.com/RLabs-Inc/spark-signals) for
//! subscriber notification.
//!
//! ## Architecture
//!
//! Feature components read and write a flat record of named application
//! fields. Writes do not touch the committed state directly: they land in a
//! pending buffer, and one shared debounce window decides when the whole
//! buffer is merged in. Each merge bumps a revision signal, so every
//! subscriber re-runs exactly once per flush no matter how many fields
//! changed.
//!
//! ```text
//! use_global::<F>().1.set(v) → ChangeCoalescer (pending, window re-armed)
//!                                    │ 100ms quiet
//!                                    ▼
//!                              GlobalStore (committed) → revision signal → subscribers
//! ```
//!
//! ## Modules
//!
//! - [`fields`] - `GlobalState`, typed field markers, `FieldSet`
//! - [`clock`] - Injectable time source
//! - [`coalescer`] - Pending buffer and debounce state machine
//! - [`store`] - Committed state, flush, subscribers
//! - [`provider`] - Context lookup and the accessor functions
//! - [`config`] - TOML configuration

pub mod clock;
pub mod coalescer;
pub mod config;
pub mod error;
pub mod fields;
pub mod provider;
pub mod store;

// Re-export commonly used items
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalescer::{ChangeCoalescer, CoalescerState, FlushReport, DEFAULT_WINDOW};
pub use config::{BusConfig, BusSection, ConfigError};
pub use error::BusError;
pub use fields::{field, DataHandle, Field, FieldSet, GlobalState};
pub use provider::{
    current_store, reset_providers, try_use_global, use_get_global, use_global, GetGlobal,
    GlobalProvider, ProviderGuard, Setter,
};
pub use store::{GlobalStore, Subscription};
