use crate::carrier::{CallPlacer, CarrierClient, Messenger};
use crate::config::Config;
use crate::flow::callback::CallbackFlow;
use crate::flow::conference::ConferenceFlow;
use crate::flow::voicemail::VoicemailFlow;
use crate::handler::middleware::request_log::log_requests;
use crate::preflight::{check_config, PreflightError};
use crate::storage::Storage;
use crate::store::reservations::ReservationStore;
use crate::store::rooms::{RoomRegistry, RoomStore};
use crate::store::voicemails::VoicemailStore;
use anyhow::Result;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub token: CancellationToken,
    pub callback: CallbackFlow,
    pub conference: ConferenceFlow,
    pub voicemail: VoicemailFlow,
}

pub type AppState = Arc<AppStateInner>;

#[derive(Default)]
pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub storage: Option<Storage>,
    pub messenger: Option<Arc<dyn Messenger>>,
    pub call_placer: Option<Arc<dyn CallPlacer>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the backend named in `config.storage`.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn messenger(mut self, messenger: Arc<dyn Messenger>) -> Self {
        self.messenger = Some(messenger);
        self
    }

    pub fn call_placer(mut self, call_placer: Arc<dyn CallPlacer>) -> Self {
        self.call_placer = Some(call_placer);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = self.config.unwrap_or_default();
        let issues = check_config(&config);
        if !issues.is_empty() {
            return Err(PreflightError::new(issues).into());
        }
        let storage = match self.storage {
            Some(storage) => storage,
            None => Storage::new(&config.storage)?,
        };

        let reservations = Arc::new(ReservationStore::open(storage.clone()).await?);
        let rooms = Arc::new(RoomRegistry::new(
            config.rooms.clone(),
            RoomStore::open(storage.clone()).await?,
        )?);
        let voicemails = Arc::new(VoicemailStore::open(storage).await?);

        let (messenger, call_placer) = match (self.messenger, self.call_placer) {
            (Some(messenger), Some(call_placer)) => (messenger, call_placer),
            (messenger, call_placer) => {
                let carrier = Arc::new(CarrierClient::new(config.carrier())?);
                let messenger: Arc<dyn Messenger> = match messenger {
                    Some(messenger) => messenger,
                    None => carrier.clone(),
                };
                let call_placer: Arc<dyn CallPlacer> = match call_placer {
                    Some(call_placer) => call_placer,
                    None => carrier,
                };
                (messenger, call_placer)
            }
        };

        let callback = CallbackFlow::new(&config, reservations, messenger, call_placer)?;
        let conference = ConferenceFlow::new(&config, rooms);
        let voicemail = VoicemailFlow::new(&config, voicemails);

        Ok(Arc::new(AppStateInner {
            config: Arc::new(config),
            token: CancellationToken::new(),
            callback,
            conference,
            voicemail,
        }))
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!(
        "callflow listening on http://{}, {} rooms configured",
        addr,
        state.config.rooms.len()
    );

    let shutdown = token.clone();
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await;

    match result {
        Ok(_) => info!("Server shut down gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(anyhow::anyhow!("Server error: {}", e));
        }
    }
    token.cancel();
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let skip_paths = Arc::new(vec!["/health".to_string()]);

    crate::handler::router()
        .with_state(state)
        .layer(middleware::from_fn_with_state(skip_paths, log_requests))
        .layer(cors)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::carrier::{MockCallPlacer, MockMessenger};

    pub async fn state_with(
        config: Config,
        messenger: MockMessenger,
        call_placer: MockCallPlacer,
    ) -> AppState {
        AppStateBuilder::new()
            .config(config)
            .storage(Storage::memory())
            .messenger(Arc::new(messenger))
            .call_placer(Arc::new(call_placer))
            .build()
            .await
            .expect("build app state")
    }

    pub async fn state(messenger: MockMessenger, call_placer: MockCallPlacer) -> AppState {
        let mut config = Config::default();
        config.public_url = Some("https://ivr.example.com".to_string());
        state_with(config, messenger, call_placer).await
    }
}
