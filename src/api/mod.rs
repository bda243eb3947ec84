//! HTTP/WebSocket surface: router, shared state and the serve loop

pub mod websocket;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::llm::OpenAiGeneration;
use crate::session::SessionStore;
use crate::voice::tts::SynthesisBackend;
use crate::voice::{SpeechToText, TextToSpeech};
use crate::{Error, Result};

/// Shared state for every connection.
///
/// Backends are optional: a missing key disables that capability and
/// fails only the operations that need it, never startup.
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub llm: Option<Arc<OpenAiGeneration>>,
    pub tts: Option<Arc<dyn SynthesisBackend>>,
    pub stt: Option<SpeechToText>,
}

impl AppState {
    /// Wire up backends from config, degrading per capability on
    /// missing keys
    ///
    /// # Errors
    ///
    /// Returns error only on a malformed configuration (e.g. an unknown
    /// TTS provider name), never on an absent key
    pub fn new(config: Config) -> Result<Self> {
        let llm = match &config.api_keys.openai {
            Some(key) => Some(Arc::new(OpenAiGeneration::new(key.clone(), config.llm.clone())?)),
            None => {
                tracing::warn!("OPENAI_API_KEY not set; generation and intent checks disabled");
                None
            }
        };

        let tts_key_present = match config.tts.provider.as_str() {
            "sarvam" => config.api_keys.sarvam.is_some(),
            "elevenlabs" => config.api_keys.elevenlabs.is_some(),
            // Unknown providers fall through so from_config reports them
            _ => true,
        };
        let tts: Option<Arc<dyn SynthesisBackend>> = if tts_key_present {
            let sarvam = config.api_keys.sarvam.clone().unwrap_or_default();
            let elevenlabs = config.api_keys.elevenlabs.clone().unwrap_or_default();
            Some(Arc::new(TextToSpeech::from_config(
                &config.tts,
                &sarvam,
                &elevenlabs,
            )?))
        } else {
            tracing::warn!(provider = %config.tts.provider, "TTS key not set; synthesis disabled");
            None
        };

        let stt = match &config.api_keys.deepgram {
            Some(key) => Some(SpeechToText::new(key.clone(), config.stt.clone())?),
            None => {
                tracing::warn!("DEEPGRAM_API_KEY not set; live transcription disabled");
                None
            }
        };

        Ok(Self {
            config,
            sessions: SessionStore::new(),
            llm,
            tts,
            stt,
        })
    }
}

/// Build the router with all routes
fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::ws_upgrade))
        .with_state(state);

    // Serve the browser front-end if configured
    if let Some(static_dir) = static_dir {
        let index_file = static_dir.join("index.html");
        let serve_dir = ServeDir::new(&static_dir).not_found_service(ServeFile::new(&index_file));
        router = router.fallback_service(serve_dir);
        tracing::info!(path = %static_dir.display(), "serving static files");
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run the gateway server until shutdown
///
/// # Errors
///
/// Returns error if the server fails to bind or run
pub async fn serve(config: Config) -> Result<()> {
    let port = config.server.port;
    let state = Arc::new(AppState::new(config)?);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(port, "gateway listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Transport(format!("server error: {e}")))?;

    Ok(())
}
