//! Built-in replicated services.
//!
//! - `ThemeService`: the session theme, picked by the host on first request.
//! - `ReadyService`: per-player readiness board, driven by client proposals.

pub mod ready;
pub mod theme;

pub use ready::{ReadyBoard, ReadyService, READY_CHANNEL};
pub use theme::{ThemeService, THEME_CHANNEL};
