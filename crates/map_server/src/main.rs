//! Map server entry point.
//!
//! Loads configuration, builds the surface, region and object layers on the
//! in-memory backend, seeds demo objects and keeps the world alive until a
//! shutdown signal arrives.

mod cli;
mod config;
mod logging;
mod seeder;
mod signals;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::Parser;
use cli::CliArgs;
use config::AppConfig;
use map_core::{
    BackendObjectRepository, CoordinateMapper, DeliveryError, InMemoryBackend, MapEventBroadcaster,
    MapObjectLayer, MapService, MapSubscriber, MapUpdateMessage, RegionLayer, SurfaceLayer,
};
use seeder::DataSeeder;
use signals::setup_signal_handlers;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Subscriber that writes every map update to the log.
struct LoggingSubscriber;

#[async_trait]
impl MapSubscriber for LoggingSubscriber {
    async fn deliver(&self, message: &MapUpdateMessage) -> Result<(), DeliveryError> {
        match message {
            MapUpdateMessage::Added { object, .. } => {
                debug!("🗺️ Object added: {} at ({}, {})", object.id, object.x, object.y)
            }
            MapUpdateMessage::Updated { object, .. } => {
                debug!("🗺️ Object updated: {} at ({}, {})", object.id, object.x, object.y)
            }
            MapUpdateMessage::Deleted { object_id, .. } => debug!("🗺️ Object deleted: {}", object_id),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "update_log"
    }
}

/// Main application structure.
struct Application {
    config: AppConfig,
    service: MapService,
    broadcaster: Arc<MapEventBroadcaster>,
}

impl Application {
    /// Loads and validates configuration, installs logging, then builds the world.
    async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config).await?;
        config.apply_args(&args);
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        display_banner();

        Self::from_config(config).await
    }

    async fn from_config(config: AppConfig) -> Result<Self> {
        let (width, height) = (config.map.width, config.map.height);

        let surface = SurfaceLayer::new(width, height)?;
        let mut regions = RegionLayer::new(width, height)?;
        regions.generate_regions(config.regions.count, config.regions.seed)?;
        if let Some(prefix) = &config.regions.name_prefix {
            let ids: Vec<u16> = regions.regions().keys().copied().collect();
            for id in ids {
                regions.set_region_name(id, format!("{} {}", prefix, id));
            }
        }

        let mapper = CoordinateMapper::new(width, height)?;
        let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
        let objects = MapObjectLayer::new(Arc::new(repository));
        let broadcaster =
            Arc::new(MapEventBroadcaster::attach_with_capacity(&objects, config.broadcast.queue_capacity).await);
        broadcaster.subscribe(Arc::new(LoggingSubscriber));

        let service = MapService::new(
            objects,
            Arc::new(RwLock::new(surface)),
            Arc::new(RwLock::new(regions)),
        );

        if config.seed.enabled {
            DataSeeder::new(config.seed.clone()).seed(&service).await?;
        } else {
            info!("🌱 Seeding disabled");
        }

        Ok(Self {
            config,
            service,
            broadcaster,
        })
    }

    /// Periodically logs object, event and delivery counters.
    fn spawn_monitoring(&self, interval_secs: u64) -> JoinHandle<()> {
        let service = self.service.clone();
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            // the first tick completes immediately
            interval.tick().await;
            let mut last_events = 0;

            loop {
                interval.tick().await;

                let objects = match service.objects().get_object_count().await {
                    Ok(count) => count,
                    Err(e) => {
                        error!("❌ Failed to read object count: {}", e);
                        continue;
                    }
                };
                let events = service.objects().events().get_stats().await;
                let delivery = broadcaster.get_stats();
                let events_this_period = events.events_emitted - last_events;
                last_events = events.events_emitted;

                info!(
                    "📊 Map Stats - Objects: {}, Subscribers: {}, Events: {} (+{}), Messages: {}, Delivery failures: {}, Dropped: {}",
                    objects,
                    delivery.subscribers,
                    events.events_emitted,
                    events_this_period,
                    delivery.messages_published,
                    delivery.delivery_failures,
                    delivery.messages_dropped
                );
            }
        })
    }

    async fn run(self) -> Result<()> {
        let (width, height) = (self.config.map.width, self.config.map.height);
        info!("🚀 Starting Map Server...");
        info!("📋 Configuration:");
        info!("  🗺️ Map size: {}x{}", width, height);
        info!("  🧩 Regions: {}", self.service.regions().read().await.region_count());
        info!("  📦 Objects: {}", self.service.objects().get_object_count().await?);
        info!("  📝 Log level: {}", self.config.logging.level);

        let interval_secs = self.config.monitoring.stats_interval_secs;
        let monitoring_handle = (interval_secs > 0).then(|| self.spawn_monitoring(interval_secs));

        info!("✅ Map Server is now running!");
        if interval_secs > 0 {
            info!("🔍 Stats every {} seconds", interval_secs);
        }
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        setup_signal_handlers().await?;

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        if let Some(handle) = monitoring_handle {
            handle.abort();
        }

        let events = self.service.objects().events().get_stats().await;
        let delivery = self.broadcaster.get_stats();
        info!("📊 Final Statistics:");
        info!("  - Events emitted: {}", events.events_emitted);
        info!("  - Messages published: {}", delivery.messages_published);
        info!("  - Deliveries: {}", delivery.deliveries);

        info!("✅ Map Server shutdown complete");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║               🗺️  MAP SERVER              ║");
    info!("║                  v{:<8}               ║", version);
    info!("║                                          ║");
    info!("║  Tile Surface & Balanced Regions         ║");
    info!("║  Geo-Indexed Object Store                ║");
    info!("║  Live Change Broadcasting                ║");
    info!("╚══════════════════════════════════════════╝");
}
