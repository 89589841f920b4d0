//! Google Maps Geocoding and Places client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use citypulse_core::config::MapsConfig;
use citypulse_core::types::{Coordinates, Place, Review};

use super::{CollaboratorError, GeocodeResult, PlaceSummary, PlacesService};

const DETAIL_FIELDS: &str = "place_id,name,formatted_address,rating,user_ratings_total,reviews,\
opening_hours,website,formatted_phone_number,price_level,types,geometry";

#[derive(Debug, Clone)]
pub struct GoogleMapsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleMapsClient {
    /// Build a client from configuration. Fails with `NotConfigured` when
    /// no API key is set.
    pub fn from_config(config: &MapsConfig) -> Result<Self, CollaboratorError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(CollaboratorError::NotConfigured("maps"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CollaboratorError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

/// Interpret the `status` field every Maps response carries.
///
/// Returns `Ok(false)` for `ZERO_RESULTS`, `Ok(true)` for `OK`.
fn check_status(status: &str, error_message: Option<&str>) -> Result<bool, CollaboratorError> {
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" => Ok(false),
        "REQUEST_DENIED" => Err(CollaboratorError::Denied(
            error_message.unwrap_or("request denied").to_string(),
        )),
        other => Err(CollaboratorError::Request(format!(
            "maps status {}: {}",
            other,
            error_message.unwrap_or_default()
        ))),
    }
}

#[async_trait]
impl PlacesService for GoogleMapsClient {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>, CollaboratorError> {
        let body: GeocodeResponse = self
            .get("/maps/api/geocode/json", &[("address", address)])
            .await?;
        if !check_status(&body.status, body.error_message.as_deref())? {
            debug!(address, "Geocode returned no results");
            return Ok(None);
        }

        Ok(body.results.into_iter().next().map(|r| GeocodeResult {
            coordinates: r.geometry.location.into(),
            types: r.types,
            formatted_address: r.formatted_address,
        }))
    }

    async fn nearby_search(
        &self,
        center: Coordinates,
        radius: u32,
        keyword: &str,
    ) -> Result<Vec<PlaceSummary>, CollaboratorError> {
        let location = format!("{},{}", center.lat, center.lng);
        let radius = radius.to_string();
        let body: NearbyResponse = self
            .get(
                "/maps/api/place/nearbysearch/json",
                &[
                    ("location", location.as_str()),
                    ("radius", radius.as_str()),
                    ("keyword", keyword),
                ],
            )
            .await?;
        if !check_status(&body.status, body.error_message.as_deref())? {
            return Ok(Vec::new());
        }

        Ok(body
            .results
            .into_iter()
            .map(|r| PlaceSummary {
                place_id: r.place_id,
                name: r.name,
                vicinity: r.vicinity,
                rating: r.rating,
                total_ratings: r.user_ratings_total,
                types: r.types,
                location: r.geometry.map(|g| g.location.into()),
            })
            .collect())
    }

    async fn place_details(&self, place_id: &str) -> Result<Place, CollaboratorError> {
        let body: DetailsResponse = self
            .get(
                "/maps/api/place/details/json",
                &[("place_id", place_id), ("fields", DETAIL_FIELDS)],
            )
            .await?;
        let found = check_status(&body.status, body.error_message.as_deref())?;
        let Some(result) = body.result.filter(|_| found) else {
            warn!(place_id, "Place details returned no result");
            return Err(CollaboratorError::Decode(format!(
                "no details for place {}",
                place_id
            )));
        };

        Ok(Place {
            place_id: if result.place_id.is_empty() {
                place_id.to_string()
            } else {
                result.place_id
            },
            name: result.name,
            address: result.formatted_address,
            rating: result.rating,
            total_ratings: result.user_ratings_total,
            types: result.types,
            reviews: result
                .reviews
                .into_iter()
                .map(|r| Review {
                    author: r.author_name,
                    rating: r.rating,
                    text: r.text,
                })
                .collect(),
            location: result.geometry.map(|g| g.location.into()),
            website: result.website,
            phone: result.formatted_phone_number,
            price_level: result.price_level,
            opening_hours: result
                .opening_hours
                .map(|h| h.weekday_text)
                .unwrap_or_default(),
        })
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl From<LatLng> for Coordinates {
    fn from(value: LatLng) -> Self {
        Coordinates {
            lat: value.lat,
            lng: value.lng,
        }
    }
}

#[derive(Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeEntry>,
}

#[derive(Deserialize)]
struct GeocodeEntry {
    geometry: Geometry,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    formatted_address: String,
}

#[derive(Deserialize)]
struct NearbyResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<NearbyEntry>,
}

#[derive(Deserialize)]
struct NearbyEntry {
    place_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    vicinity: String,
    rating: Option<f32>,
    user_ratings_total: Option<u32>,
    #[serde(default)]
    types: Vec<String>,
    geometry: Option<Geometry>,
}

#[derive(Deserialize)]
struct DetailsResponse {
    status: String,
    error_message: Option<String>,
    result: Option<DetailsEntry>,
}

#[derive(Deserialize)]
struct DetailsEntry {
    #[serde(default)]
    place_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    formatted_address: String,
    rating: Option<f32>,
    user_ratings_total: Option<u32>,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    reviews: Vec<ReviewEntry>,
    geometry: Option<Geometry>,
    website: Option<String>,
    formatted_phone_number: Option<String>,
    price_level: Option<u8>,
    opening_hours: Option<OpeningHours>,
}

#[derive(Deserialize)]
struct ReviewEntry {
    #[serde(default)]
    author_name: String,
    rating: Option<f32>,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct OpeningHours {
    #[serde(default)]
    weekday_text: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(url: &str) -> GoogleMapsClient {
        GoogleMapsClient::from_config(&MapsConfig {
            api_key: Some("maps-key".to_string()),
            base_url: url.to_string(),
            ..MapsConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = GoogleMapsClient::from_config(&MapsConfig::default()).unwrap_err();
        assert!(matches!(err, CollaboratorError::NotConfigured("maps")));
    }

    #[test]
    fn test_check_status() {
        assert!(check_status("OK", None).unwrap());
        assert!(!check_status("ZERO_RESULTS", None).unwrap());
        assert!(matches!(
            check_status("REQUEST_DENIED", Some("key invalid")),
            Err(CollaboratorError::Denied(msg)) if msg == "key invalid"
        ));
        assert!(matches!(
            check_status("OVER_QUERY_LIMIT", None),
            Err(CollaboratorError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_geocode_parses_first_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/maps/api/geocode/json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("address".into(), "newtown sydney australia".into()),
                Matcher::UrlEncoded("key".into(), "maps-key".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"OK","results":[{
                    "geometry":{"location":{"lat":-33.8981,"lng":151.1746}},
                    "types":["locality","political"],
                    "formatted_address":"Newtown NSW 2042, Australia"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let result = client
            .geocode("newtown sydney australia")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result.types, vec!["locality", "political"]);
        assert!((result.coordinates.lat + 33.8981).abs() < 1e-9);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_geocode_zero_results_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/geocode/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"ZERO_RESULTS","results":[]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        assert!(client.geocode("atlantis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nearby_search_request_denied() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/place/nearbysearch/json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"status":"REQUEST_DENIED","error_message":"API key invalid","results":[]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client
            .nearby_search(Coordinates { lat: -33.8688, lng: 151.2093 }, 5000, "cafe")
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Denied(_)));
    }

    #[tokio::test]
    async fn test_nearby_search_parses_results() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/place/nearbysearch/json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("radius".into(), "1500".into()),
                Matcher::UrlEncoded("keyword".into(), "cafe dog-friendly".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"OK","results":[
                    {"place_id":"a","name":"Bean There","vicinity":"1 King St","rating":4.6,
                     "user_ratings_total":210,"types":["cafe"],
                     "geometry":{"location":{"lat":-33.89,"lng":151.17}}},
                    {"place_id":"b","name":"Paws Cafe"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let results = client
            .nearby_search(Coordinates { lat: -33.89, lng: 151.17 }, 1500, "cafe dog-friendly")
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Bean There");
        assert_eq!(results[0].total_ratings, Some(210));
        assert!(results[1].rating.is_none());
        assert!(results[1].location.is_none());
    }

    #[tokio::test]
    async fn test_place_details_maps_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/place/details/json")
            .match_query(Matcher::UrlEncoded("place_id".into(), "a".into()))
            .with_status(200)
            .with_body(
                r#"{"status":"OK","result":{
                    "name":"Bean There","formatted_address":"1 King St, Newtown NSW",
                    "rating":4.6,"user_ratings_total":210,
                    "reviews":[{"author_name":"Sam","rating":5,"text":"Great flat white"}],
                    "opening_hours":{"weekday_text":["Monday: 7:00 AM - 3:00 PM"]},
                    "website":"https://bean.example","formatted_phone_number":"02 9999 0000",
                    "price_level":2}}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server.url());
        let place = client.place_details("a").await.unwrap();

        assert_eq!(place.place_id, "a");
        assert_eq!(place.address, "1 King St, Newtown NSW");
        assert_eq!(place.reviews.len(), 1);
        assert_eq!(place.reviews[0].author, "Sam");
        assert_eq!(place.opening_hours.len(), 1);
        assert_eq!(place.phone.as_deref(), Some("02 9999 0000"));
        assert_eq!(place.price_level, Some(2));
    }

    #[tokio::test]
    async fn test_place_details_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/maps/api/place/details/json")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let err = client.place_details("a").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Status { status: 500, .. }));
    }
}
