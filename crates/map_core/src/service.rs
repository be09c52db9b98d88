//! Query facade consumed by the transport layer.
//!
//! Requests describe rectangles by two opposite corners in any order; results
//! are flattened into serde DTOs.

use crate::broadcaster::ObjectSummary;
use crate::error::MapResult;
use crate::layer::MapObjectLayer;
use crate::region::RegionLayer;
use crate::surface::SurfaceLayer;
use crate::types::{MapArea, Region, TileType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub type ObjectDto = ObjectSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetObjectsInAreaRequest {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetObjectsInAreaResponse {
    pub objects: Vec<ObjectDto>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetRegionsInAreaRequest {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDto {
    pub id: u16,
    pub name: String,
    pub tile_count: usize,
}

impl From<&Region> for RegionDto {
    fn from(region: &Region) -> Self {
        Self {
            id: region.id,
            name: region.name.clone(),
            tile_count: region.tile_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GetRegionsInAreaResponse {
    pub regions: Vec<RegionDto>,
}

/// Read-side API over the object, region and surface layers.
#[derive(Debug, Clone)]
pub struct MapService {
    objects: MapObjectLayer,
    surface: Arc<RwLock<SurfaceLayer>>,
    regions: Arc<RwLock<RegionLayer>>,
}

impl MapService {
    pub fn new(
        objects: MapObjectLayer,
        surface: Arc<RwLock<SurfaceLayer>>,
        regions: Arc<RwLock<RegionLayer>>,
    ) -> Self {
        Self {
            objects,
            surface,
            regions,
        }
    }

    pub fn objects(&self) -> &MapObjectLayer {
        &self.objects
    }

    pub fn surface(&self) -> &Arc<RwLock<SurfaceLayer>> {
        &self.surface
    }

    pub fn regions(&self) -> &Arc<RwLock<RegionLayer>> {
        &self.regions
    }

    pub async fn get_objects_in_area(
        &self,
        request: &GetObjectsInAreaRequest,
    ) -> MapResult<GetObjectsInAreaResponse> {
        let area = MapArea::from_corners(request.x1, request.y1, request.x2, request.y2);
        let objects = self.objects.get_objects_in(area).await?;

        debug!("Objects in {:?}: {}", area, objects.len());
        Ok(GetObjectsInAreaResponse {
            objects: objects.iter().map(ObjectDto::from).collect(),
        })
    }

    pub async fn get_regions_in_area(&self, request: &GetRegionsInAreaRequest) -> GetRegionsInAreaResponse {
        let area = MapArea::from_corners(request.x1, request.y1, request.x2, request.y2);
        let regions = self.regions.read().await.get_region_metadata_in_area(area);

        GetRegionsInAreaResponse {
            regions: regions.iter().map(RegionDto::from).collect(),
        }
    }

    pub async fn tile_at(&self, x: i32, y: i32) -> MapResult<TileType> {
        self.surface.read().await.get_tile(x, y)
    }

    /// Region covering the cell, or `None` if the cell is unassigned.
    pub async fn region_at(&self, x: i32, y: i32) -> MapResult<Option<RegionDto>> {
        let regions = self.regions.read().await;
        let id = regions.get_region_id(x, y)?;
        Ok(regions.region(id).map(RegionDto::from))
    }

    pub async fn can_place_object(&self, area: MapArea) -> bool {
        self.surface.read().await.can_place_object_in(area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::coord::CoordinateMapper;
    use crate::error::MapError;
    use crate::repository::BackendObjectRepository;
    use crate::types::MapObject;

    async fn service() -> MapService {
        let mapper = CoordinateMapper::new(100, 100).unwrap();
        let repository = BackendObjectRepository::new(Arc::new(InMemoryBackend::new()), mapper);
        let objects = MapObjectLayer::new(Arc::new(repository));

        let mut regions = RegionLayer::new(100, 100).unwrap();
        regions.generate_regions(10, None).unwrap();
        let mut surface = SurfaceLayer::new(100, 100).unwrap();
        surface.fill_area(0, 0, 10, 10, TileType::Water);

        MapService::new(
            objects,
            Arc::new(RwLock::new(surface)),
            Arc::new(RwLock::new(regions)),
        )
    }

    #[tokio::test]
    async fn test_objects_in_area_accepts_corners_in_any_order() {
        let service = service().await;
        service
            .objects()
            .add_object(MapObject::new("a", 10, 20, 5, 5).with_type("Building"))
            .await
            .unwrap();

        for request in [
            GetObjectsInAreaRequest { x1: 8, y1: 18, x2: 18, y2: 28 },
            GetObjectsInAreaRequest { x1: 18, y1: 28, x2: 8, y2: 18 },
        ] {
            let response = service.get_objects_in_area(&request).await.unwrap();
            assert_eq!(response.objects.len(), 1);
            assert_eq!(response.objects[0].id, "a");
            assert_eq!(response.objects[0].object_type, "Building");
        }

        let empty = service
            .get_objects_in_area(&GetObjectsInAreaRequest { x1: 50, y1: 50, x2: 55, y2: 55 })
            .await
            .unwrap();
        assert!(empty.objects.is_empty());
    }

    #[tokio::test]
    async fn test_regions_in_area() {
        let service = service().await;

        let response = service
            .get_regions_in_area(&GetRegionsInAreaRequest { x1: 0, y1: 0, x2: 100, y2: 20 })
            .await;
        let ids: Vec<u16> = response.regions.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(response.regions[0].tile_count, 1000);
        assert_eq!(response.regions[0].name, "Region 1");
    }

    #[tokio::test]
    async fn test_tile_and_region_lookups() {
        let service = service().await;

        assert_eq!(service.tile_at(5, 5).await.unwrap(), TileType::Water);
        assert!(matches!(service.tile_at(100, 5).await, Err(MapError::OutOfRange { .. })));
        assert_eq!(service.region_at(0, 99).await.unwrap().unwrap().id, 10);
        assert!(!service.can_place_object(MapArea::new(5, 5, 10, 10)).await);
        assert!(service.can_place_object(MapArea::new(50, 50, 10, 10)).await);
    }
}
