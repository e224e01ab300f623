//! Application lifecycle: bootstrap, serving, and shutdown.
//!
//! ```text
//! 1. Options from the environment (or given explicitly)
//!    ↓
//! 2. Module compile (imports first, global modules promoted)
//!    ↓
//! 3. CQRS wiring, timers, queue workers
//!    ↓
//! 4. View bundling (background)
//!    ↓
//! 5. Router assembly and serve
//!    ↓
//! 6. Shutdown signal (SIGTERM/SIGINT) → timers and workers aborted
//! ```

mod application;
mod context;
mod shutdown;

pub use application::{Application, ApplicationBuilder};
pub use context::ApplicationContext;
pub use shutdown::shutdown_signal;
