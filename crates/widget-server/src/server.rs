use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use widget_core::JsonlConversationStore;
use widget_llm::{GenerationConfig, ProviderSettings};
use widget_mcp::{BrokerConfig, McpToolAggregator};

use crate::handlers;
use crate::state::AppState;
use crate::widgets::WidgetStore;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub widgets_file: PathBuf,
    pub providers: ProviderSettings,
    pub broker: BrokerConfig,
    pub generation: GenerationConfig,
}

/// Route table shared by the binary and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(handlers::health::handler))
            .route("/chat", web::post().to(handlers::chat::handler))
            .route("/widgets", web::get().to(handlers::widgets::list))
            .route("/widgets/{id}", web::get().to(handlers::widgets::get))
            .route(
                "/widgets/{id}/chat",
                web::post().to(handlers::widget_chat::handler),
            )
            .route(
                "/proxy/widgets/{id}/chat",
                web::post().to(handlers::widget_chat::handler),
            )
            .route(
                "/widgets/{id}/conversations",
                web::get().to(handlers::conversations::list),
            )
            .route(
                "/widgets/{id}/conversations/{conversation_id}/messages",
                web::get().to(handlers::conversations::messages),
            )
            .route(
                "/widgets/{id}/conversations/{conversation_id}",
                web::delete().to(handlers::conversations::delete),
            )
            .route(
                "/proxy/widgets/{id}/conversations",
                web::get().to(handlers::conversations::list),
            )
            .route(
                "/proxy/widgets/{id}/conversations/{conversation_id}/messages",
                web::get().to(handlers::conversations::messages),
            )
            .route(
                "/proxy/widgets/{id}/conversations/{conversation_id}",
                web::delete().to(handlers::conversations::delete),
            ),
    );
}

pub async fn build_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let conversations_dir = config.data_dir.join("conversations");
    info!("Initializing conversation storage at: {:?}", conversations_dir);
    let store = JsonlConversationStore::new(&conversations_dir);
    store
        .init()
        .await
        .with_context(|| format!("failed to init storage at {:?}", conversations_dir))?;

    let widgets = WidgetStore::load(&config.widgets_file)
        .await
        .with_context(|| format!("failed to load widgets from {:?}", config.widgets_file))?;

    Ok(AppState {
        widgets,
        conversations: Arc::new(store),
        aggregator: Arc::new(McpToolAggregator::sse(config.broker.clone())),
        providers: Arc::new(config.providers.clone()),
        generation: config.generation.clone(),
    })
}

pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let state = web::Data::new(build_state(&config).await?);

    info!("Listening on 0.0.0.0:{}", config.port);
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .configure(configure)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await?;

    Ok(())
}
