//! Location resolution: geocode a location slot and pick a search radius.

use std::sync::Arc;

use tracing::{debug, info, warn};

use citypulse_core::config::{MapsConfig, SearchConfig};
use citypulse_core::types::{Coordinates, LocationSpecificity};

use crate::collaborator::PlacesService;

const SUBURB_TYPES: &[&str] = &["locality", "sublocality", "neighborhood"];
const BROAD_TYPES: &[&str] = &["administrative_area_level_1", "country"];

/// A search centre with its radius tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    /// The location text used, or `default` when the fallback centre applies.
    pub location: String,
    pub coordinates: Coordinates,
    pub radius: u32,
    pub specificity: LocationSpecificity,
}

pub struct LocationResolver {
    places: Option<Arc<dyn PlacesService>>,
    search: SearchConfig,
    region_qualifier: String,
    default_center: Coordinates,
}

impl LocationResolver {
    pub fn new(
        places: Option<Arc<dyn PlacesService>>,
        search: SearchConfig,
        maps: &MapsConfig,
    ) -> Self {
        Self {
            places,
            search,
            region_qualifier: maps.region_qualifier.clone(),
            default_center: Coordinates {
                lat: maps.default_lat,
                lng: maps.default_lng,
            },
        }
    }

    /// Resolve `location`. Geocoding failures of any kind fall back to the
    /// default centre and radius.
    pub async fn resolve(&self, location: &str) -> ResolvedLocation {
        let location = location.trim().to_lowercase();
        if location.is_empty() || location == "default" {
            debug!("No location given, using default centre");
            return self.fallback();
        }

        let Some(places) = &self.places else {
            warn!(location = %location, "Geocoder not configured, using default centre");
            return self.fallback();
        };

        let query = if self.region_qualifier.is_empty() {
            location.clone()
        } else {
            format!("{} {}", location, self.region_qualifier)
        };

        match places.geocode(&query).await {
            Ok(Some(result)) => {
                let (radius, specificity) = self.tier_for(&location, &result.types);
                info!(
                    location = %location,
                    radius,
                    specificity = specificity.as_str(),
                    types = ?result.types,
                    "Geocoded location"
                );
                ResolvedLocation {
                    location,
                    coordinates: result.coordinates,
                    radius,
                    specificity,
                }
            }
            Ok(None) => {
                warn!(location = %location, "Geocoding found nothing, using default centre");
                self.fallback()
            }
            Err(e) => {
                warn!(location = %location, error = %e, "Geocoding failed, using default centre");
                self.fallback()
            }
        }
    }

    /// Radius tier for a geocoded location with the given type tags.
    pub fn tier_for(&self, location: &str, types: &[String]) -> (u32, LocationSpecificity) {
        let has_any = |wanted: &[&str]| types.iter().any(|t| wanted.contains(&t.as_str()));

        if has_any(SUBURB_TYPES) {
            let radius = if self.search.is_dense_area(location) {
                self.search.dense_radius
            } else {
                self.search.suburb_radius
            };
            (radius, LocationSpecificity::GeocodedSuburb)
        } else if has_any(BROAD_TYPES) {
            (self.search.broad_radius, LocationSpecificity::GeocodedBroadArea)
        } else {
            (self.search.specific_radius, LocationSpecificity::GeocodedSpecific)
        }
    }

    fn fallback(&self) -> ResolvedLocation {
        ResolvedLocation {
            location: "default".to_string(),
            coordinates: self.default_center,
            radius: self.search.default_radius,
            specificity: LocationSpecificity::DefaultCbd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::mock::StaticPlaces;

    fn resolver_with(places: StaticPlaces) -> (LocationResolver, Arc<StaticPlaces>) {
        let places = Arc::new(places);
        let resolver = LocationResolver::new(
            Some(places.clone()),
            SearchConfig::default(),
            &MapsConfig::default(),
        );
        (resolver, places)
    }

    fn tags(types: &[&str]) -> Vec<String> {
        types.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tiers() {
        let (resolver, _) = resolver_with(StaticPlaces::new());

        assert_eq!(
            resolver.tier_for("newtown", &tags(&["locality", "political"])),
            (1500, LocationSpecificity::GeocodedSuburb)
        );
        assert_eq!(
            resolver.tier_for("darlinghurst", &tags(&["locality"])),
            (800, LocationSpecificity::GeocodedSuburb)
        );
        assert_eq!(
            resolver.tier_for("nsw", &tags(&["administrative_area_level_1"])),
            (10000, LocationSpecificity::GeocodedBroadArea)
        );
        assert_eq!(
            resolver.tier_for("george street", &tags(&["route"])),
            (2000, LocationSpecificity::GeocodedSpecific)
        );
        assert_eq!(
            resolver.tier_for("somewhere", &[]),
            (2000, LocationSpecificity::GeocodedSpecific)
        );
    }

    #[tokio::test]
    async fn test_default_skips_geocoding() {
        let (resolver, places) = resolver_with(StaticPlaces::new());
        let resolved = resolver.resolve("default").await;

        assert_eq!(resolved.radius, 5000);
        assert_eq!(resolved.specificity, LocationSpecificity::DefaultCbd);
        assert_eq!(resolved.coordinates.lat, -33.8688);
        assert_eq!(places.geocode_calls(), 0);

        let resolved = resolver.resolve("  ").await;
        assert_eq!(resolved.location, "default");
        assert_eq!(places.geocode_calls(), 0);
    }

    #[tokio::test]
    async fn test_geocoded_suburb() {
        let (resolver, places) = resolver_with(
            StaticPlaces::new().with_geocode("surry hills sydney", -33.884, 151.211, &["locality"]),
        );
        let resolved = resolver.resolve("Surry Hills").await;

        assert_eq!(resolved.location, "surry hills");
        assert_eq!(resolved.radius, 1500);
        assert_eq!(resolved.specificity, LocationSpecificity::GeocodedSuburb);
        assert_eq!(places.geocode_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_geocode_falls_back() {
        let (resolver, places) = resolver_with(StaticPlaces::new());
        let resolved = resolver.resolve("atlantis").await;

        assert_eq!(resolved.radius, 5000);
        assert_eq!(resolved.location, "default");
        assert_eq!(resolved.specificity, LocationSpecificity::DefaultCbd);
        assert_eq!(places.geocode_calls(), 1);
    }

    #[tokio::test]
    async fn test_geocode_error_falls_back() {
        let (resolver, _) = resolver_with(StaticPlaces::new().failing_geocode());
        let resolved = resolver.resolve("newtown").await;
        assert_eq!(resolved.specificity, LocationSpecificity::DefaultCbd);
        assert_eq!(resolved.radius, 5000);
    }

    #[tokio::test]
    async fn test_unconfigured_geocoder_falls_back() {
        let resolver =
            LocationResolver::new(None, SearchConfig::default(), &MapsConfig::default());
        let resolved = resolver.resolve("newtown").await;
        assert_eq!(resolved.specificity, LocationSpecificity::DefaultCbd);
    }
}
