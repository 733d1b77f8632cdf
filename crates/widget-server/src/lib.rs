//! HTTP service for embeddable chat widgets backed by MCP tool servers.

pub mod handlers;
pub mod logging;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod widgets;

#[cfg(test)]
mod test_support;

pub use server::{build_state, configure, run_server, ServerConfig};
pub use state::{AppState, ProviderSource};
pub use widgets::{WidgetConfig, WidgetStore};
