//! Server lifecycle management
//!
//! Wires the directory, blob store, SFU room manager, and signaling router
//! together, runs the background maintenance tasks, and serves HTTP until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use vmeet_api::http::AppState;
use vmeet_core::directory::{HttpPollReview, HttpRoomDirectory, NullPollReview, PollReview, RoomDirectory};
use vmeet_core::storage::{HttpMediaStore, MediaStore};
use vmeet_core::{Config, TokenStore};
use vmeet_sfu::recording::{FileRecordingMedia, RecordingMedia};
use vmeet_sfu::{RecordingScheduler, RoomManager, TransportFactory};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const KEYFRAME_INTERVAL: Duration = Duration::from_secs(3);
const UPLOAD_DRAIN_INTERVAL: Duration = Duration::from_secs(2);

/// Container for shared services
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn RoomDirectory>,
    pub store: Arc<dyn MediaStore>,
    pub manager: Arc<RoomManager>,
    pub tokens: Arc<TokenStore>,
    pub transport: Arc<TransportFactory>,
    pub media: Arc<dyn RecordingMedia>,
    pub scheduler: Arc<RecordingScheduler>,
}

impl Services {
    /// Build the full service graph from configuration.
    pub fn init(config: &Config) -> anyhow::Result<Self> {
        let directory: Arc<dyn RoomDirectory> = Arc::new(HttpRoomDirectory::new(&config.directory)?);
        let poll_review: Arc<dyn PollReview> = match HttpPollReview::new(&config.poll_review) {
            Some(review) => Arc::new(review),
            None => {
                info!("poll review endpoint not configured, results go to the directory only");
                Arc::new(NullPollReview::new())
            }
        };
        let store: Arc<dyn MediaStore> =
            Arc::new(HttpMediaStore::new(&config.storage, Arc::clone(&directory)));

        Ok(Self {
            manager: Arc::new(RoomManager::new(Arc::clone(&directory), poll_review)),
            tokens: Arc::new(TokenStore::new(config.tokens.ttl_hours)),
            transport: Arc::new(TransportFactory::new(&config.webrtc)?),
            media: Arc::new(FileRecordingMedia::new(
                config.storage.local_dir.clone(),
                &config.recording,
            )),
            scheduler: Arc::new(RecordingScheduler::new(Arc::clone(&store))),
            directory,
            store,
        })
    }
}

/// `VMeet` server - owns the HTTP listener and the maintenance tasks
pub struct VMeetServer {
    config: Config,
    services: Services,
    background: Vec<JoinHandle<()>>,
}

impl VMeetServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            background: Vec::new(),
        }
    }

    /// Start the server and wait for a shutdown signal.
    pub async fn start(mut self) -> anyhow::Result<()> {
        info!("Starting VMeet server...");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.spawn_background_tasks();
        let http_handle = self.start_http_server(shutdown_rx)?;

        info!("All components started successfully");

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);
        self.shutdown().await;

        Ok(())
    }

    fn spawn_background_tasks(&mut self) {
        self.background
            .push(self.services.manager.spawn_expiry_sweeper(EXPIRY_SWEEP_INTERVAL));
        self.background
            .push(self.services.manager.spawn_keyframe_dispatcher(KEYFRAME_INTERVAL));
        self.background
            .push(self.services.scheduler.spawn(UPLOAD_DRAIN_INTERVAL));

        let tokens = Arc::clone(&self.services.tokens);
        let sweep_interval = Duration::from_secs(self.config.tokens.sweep_interval_seconds);
        self.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                tokens.sweep();
            }
        }));
    }

    fn start_http_server(&self, shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let state = AppState {
            config: Arc::new(self.config.clone()),
            manager: Arc::clone(&self.services.manager),
            directory: Arc::clone(&self.services.directory),
            tokens: Arc::clone(&self.services.tokens),
            transport: Arc::clone(&self.services.transport),
            media: Arc::clone(&self.services.media),
            scheduler: Arc::clone(&self.services.scheduler),
        };
        let router = vmeet_api::create_router(state);

        let handle = tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&http_address).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!("Failed to bind HTTP address {}: {}", http_address, e);
                    return;
                }
            };

            info!("HTTP server listening on {}", http_address);

            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }

    /// Tear down every live room (submitting polls and closing transports),
    /// flush pending uploads, then stop the maintenance tasks.
    async fn shutdown(&self) {
        info!("Shutting down VMeet server...");

        for room_id in self.services.manager.room_ids() {
            self.services.manager.teardown(&room_id).await;
        }
        self.services.scheduler.drain().await;

        for handle in &self.background {
            handle.abort();
        }

        info!("VMeet server shut down");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
