// Server module entry
// Listener setup, connection handling, lifecycle and signals

pub mod connection;
pub mod listener;
pub mod signal;

// `loop` is a keyword, so the module is renamed
#[path = "loop.rs"]
pub mod server_loop;

pub use server_loop::Server;
pub use signal::{start_signal_handler, ShutdownHandle};
