use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestDriver {
    pub driver_id: Uuid,
    pub distance_km: f64,
}

#[derive(Default)]
pub struct GeoIndex {
    positions: DashMap<Uuid, GeoPoint>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, driver_id: Uuid, point: GeoPoint) {
        self.positions.insert(driver_id, point);
    }

    pub fn position(&self, driver_id: Uuid) -> Option<GeoPoint> {
        self.positions.get(&driver_id).map(|entry| *entry.value())
    }

    pub fn remove(&self, driver_id: Uuid) -> Option<GeoPoint> {
        self.positions.remove(&driver_id).map(|(_, point)| point)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Closest candidate by great-circle distance. Candidates without a
    /// tracked position are skipped; equal distances resolve to the lowest id.
    pub fn nearest(
        &self,
        point: &GeoPoint,
        candidates: &HashSet<Uuid>,
    ) -> Result<NearestDriver, AppError> {
        candidates
            .iter()
            .filter_map(|driver_id| {
                let position = self.position(*driver_id)?;
                Some(NearestDriver {
                    driver_id: *driver_id,
                    distance_km: haversine_km(&position, point),
                })
            })
            .min_by(|a, b| {
                a.distance_km
                    .total_cmp(&b.distance_km)
                    .then_with(|| a.driver_id.cmp(&b.driver_id))
            })
            .ok_or_else(|| {
                AppError::NotFound("no candidate driver has a known position".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use uuid::Uuid;

    use super::GeoIndex;
    use crate::error::AppError;
    use crate::models::driver::GeoPoint;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    #[test]
    fn picks_the_closest_candidate() {
        let index = GeoIndex::new();
        let origin = Uuid::from_u128(1);
        let diagonal = Uuid::from_u128(2);
        index.update(origin, point(0.0, 0.0));
        index.update(diagonal, point(1.0, 1.0));

        let candidates = HashSet::from([origin, diagonal]);
        let nearest = index.nearest(&point(0.0, 0.1), &candidates).unwrap();

        assert_eq!(nearest.driver_id, origin);
        assert!(nearest.distance_km < 12.0);
    }

    #[test]
    fn equal_distances_resolve_to_lowest_id() {
        let index = GeoIndex::new();
        let high = Uuid::from_u128(9);
        let low = Uuid::from_u128(3);
        index.update(high, point(5.0, 5.0));
        index.update(low, point(5.0, 5.0));

        let candidates = HashSet::from([high, low]);
        let nearest = index.nearest(&point(5.0, 5.5), &candidates).unwrap();

        assert_eq!(nearest.driver_id, low);
    }

    #[test]
    fn ignores_tracked_drivers_outside_the_candidate_set() {
        let index = GeoIndex::new();
        let outsider = Uuid::from_u128(1);
        let candidate = Uuid::from_u128(2);
        index.update(outsider, point(0.0, 0.0));
        index.update(candidate, point(10.0, 10.0));

        let nearest = index
            .nearest(&point(0.0, 0.0), &HashSet::from([candidate]))
            .unwrap();

        assert_eq!(nearest.driver_id, candidate);
    }

    #[test]
    fn not_found_when_no_candidate_is_tracked() {
        let index = GeoIndex::new();
        index.update(Uuid::from_u128(1), point(0.0, 0.0));

        let untracked = HashSet::from([Uuid::from_u128(2)]);
        assert!(matches!(
            index.nearest(&point(0.0, 0.0), &untracked),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            index.nearest(&point(0.0, 0.0), &HashSet::new()),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn update_replaces_previous_position() {
        let index = GeoIndex::new();
        let driver = Uuid::from_u128(1);
        index.update(driver, point(1.0, 1.0));
        index.update(driver, point(2.0, 2.0));

        assert_eq!(index.position(driver), Some(point(2.0, 2.0)));
        assert_eq!(index.len(), 1);
        assert_eq!(index.remove(driver), Some(point(2.0, 2.0)));
        assert!(index.is_empty());
    }
}
