//! Startup data seeding.
//!
//! Every region receives a fixed number of square demo objects dropped at
//! pseudo-random positions anywhere on the map. Positions are reproducible
//! for a given `rng_seed`.

use crate::config::SeedSettings;
use anyhow::Result;
use map_core::{current_timestamp, MapArea, MapError, MapObject, MapService};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

/// Tries per object before the seeder gives up on finding placeable terrain.
const MAX_PLACEMENT_ATTEMPTS: usize = 10;

pub const SEEDED_OBJECT_TYPE: &str = "RegionObject";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub created: usize,
    /// No placeable position found within the attempt limit
    pub skipped: usize,
    /// Id already present in storage
    pub existing: usize,
}

pub struct DataSeeder {
    settings: SeedSettings,
}

impl DataSeeder {
    pub fn new(settings: SeedSettings) -> Self {
        Self { settings }
    }

    pub async fn seed(&self, service: &MapService) -> Result<SeedReport> {
        let regions: Vec<(u16, String)> = service
            .regions()
            .read()
            .await
            .regions()
            .values()
            .map(|region| (region.id, region.name.clone()))
            .collect();
        let (width, height) = {
            let surface = service.surface().read().await;
            (surface.width() as i32, surface.height() as i32)
        };

        let size = self.settings.object_size;
        let mut rng = StdRng::seed_from_u64(self.settings.rng_seed);
        let mut report = SeedReport::default();

        info!(
            "🌱 Seeding {} objects for each of {} regions",
            self.settings.objects_per_region,
            regions.len()
        );

        if size <= 0 || size > width || size > height {
            warn!("⚠️ Seed object size {} does not fit a {}x{} map, nothing seeded", size, width, height);
            report.skipped = regions.len() * self.settings.objects_per_region;
            return Ok(report);
        }

        for (region_id, region_name) in &regions {
            for index in 0..self.settings.objects_per_region {
                let id = format!("{}-{}", region_id, index);

                let mut placement = None;
                for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                    let area = MapArea::new(
                        rng.gen_range(0..=width - size),
                        rng.gen_range(0..=height - size),
                        size,
                        size,
                    );
                    if service.can_place_object(area).await {
                        placement = Some(area);
                        break;
                    }
                }
                let Some(area) = placement else {
                    debug!("No placeable position for {}", id);
                    report.skipped += 1;
                    continue;
                };

                let object = MapObject::new(id, area.x, area.y, area.width, area.height)
                    .with_type(SEEDED_OBJECT_TYPE)
                    .with_metadata("RegionName", region_name.clone())
                    .with_metadata("CreatedAt", current_timestamp().to_string());

                match service.objects().add_object(object).await {
                    Ok(()) => report.created += 1,
                    Err(MapError::Conflict(reason)) => {
                        debug!("{}", reason);
                        report.existing += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(
            "✅ Seeded {} map objects ({} skipped, {} already present)",
            report.created, report.skipped, report.existing
        );
        Ok(report)
    }
}
