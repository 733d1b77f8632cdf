use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use widget_llm::{GenerationConfig, ProviderSettings};
use widget_mcp::BrokerConfig;
use widget_server::logging::init_logging;
use widget_server::{run_server, ServerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "widget-server")]
#[command(about = "Embeddable AI chat widgets with MCP tools")]
#[command(version)]
struct Cli {
    /// Server port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Directory for conversation storage
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Widget definitions (JSON or YAML); defaults to <data-dir>/widgets.json
    #[arg(long, env = "WIDGETS_FILE")]
    widgets_file: Option<PathBuf>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[arg(long, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    #[arg(long, env = "ANTHROPIC_BASE_URL")]
    anthropic_base_url: Option<String>,

    /// Upper bound on generation steps per request
    #[arg(long, env = "MAX_STEPS", default_value = "20")]
    max_steps: usize,

    #[arg(long, default_value = "10000")]
    mcp_connect_timeout_ms: u64,

    #[arg(long, default_value = "60000")]
    mcp_request_timeout_ms: u64,

    /// Log filter, e.g. `debug` or `widget_mcp=trace`
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let widgets_file = self
            .widgets_file
            .unwrap_or_else(|| self.data_dir.join("widgets.json"));

        ServerConfig {
            port: self.port,
            data_dir: self.data_dir,
            widgets_file,
            providers: ProviderSettings {
                openai_api_key: self.openai_api_key,
                openai_base_url: self.openai_base_url,
                anthropic_api_key: self.anthropic_api_key,
                anthropic_base_url: self.anthropic_base_url,
                ..Default::default()
            },
            broker: BrokerConfig {
                connect_timeout_ms: self.mcp_connect_timeout_ms,
                request_timeout_ms: self.mcp_request_timeout_ms,
                ..Default::default()
            },
            generation: GenerationConfig {
                max_steps: self.max_steps,
                ..Default::default()
            },
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = cli.into_config();
    info!("Starting widget server on port {}", config.port);
    info!("  Data dir: {:?}", config.data_dir);
    info!("  Widgets: {:?}", config.widgets_file);
    info!("  Max steps: {}", config.generation.max_steps);

    run_server(config).await
}
