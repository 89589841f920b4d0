//! In-process collaborator doubles.
//!
//! Used by unit tests in this crate and by the API integration tests, and
//! handy for running the service without credentials.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use citypulse_core::types::{Coordinates, Place};

use super::{
    CollaboratorError, CompletionRequest, GeocodeResult, PlaceSummary, PlacesService,
    TextCompletion,
};

type Script = dyn Fn(&CompletionRequest) -> Result<String, CollaboratorError> + Send + Sync;

/// A text-completion double driven by a closure.
pub struct ScriptedCompletion {
    script: Box<Script>,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Result<String, CollaboratorError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fail as if the service were unreachable.
    pub fn failing() -> Self {
        Self::new(|_| Err(CollaboratorError::Request("connection refused".to_string())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextCompletion for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = (self.script)(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        reply
    }
}

/// A places double with fixed geocodes, search results and details.
#[derive(Default)]
pub struct StaticPlaces {
    geocodes: HashMap<String, GeocodeResult>,
    results: Vec<PlaceSummary>,
    details: HashMap<String, Place>,
    fail_geocode: bool,
    deny_search: bool,
    fail_search: bool,
    geocode_calls: AtomicUsize,
    search_calls: Mutex<Vec<(Coordinates, u32, String)>>,
}

impl StaticPlaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a geocode answer for addresses starting with `prefix`
    /// (case-insensitive).
    pub fn with_geocode(mut self, prefix: &str, lat: f64, lng: f64, types: &[&str]) -> Self {
        self.geocodes.insert(
            prefix.to_lowercase(),
            GeocodeResult {
                coordinates: Coordinates { lat, lng },
                types: types.iter().map(|t| t.to_string()).collect(),
                formatted_address: prefix.to_string(),
            },
        );
        self
    }

    pub fn with_results(mut self, results: Vec<PlaceSummary>) -> Self {
        self.results = results;
        self
    }

    pub fn with_details(mut self, place: Place) -> Self {
        self.details.insert(place.place_id.clone(), place);
        self
    }

    pub fn failing_geocode(mut self) -> Self {
        self.fail_geocode = true;
        self
    }

    pub fn denying_search(mut self) -> Self {
        self.deny_search = true;
        self
    }

    /// Fail nearby searches as if the maps service timed out.
    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    pub fn geocode_calls(&self) -> usize {
        self.geocode_calls.load(Ordering::SeqCst)
    }

    /// `(center, radius, keyword)` for every nearby search received.
    pub fn search_calls(&self) -> Vec<(Coordinates, u32, String)> {
        self.search_calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PlacesService for StaticPlaces {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>, CollaboratorError> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_geocode {
            return Err(CollaboratorError::Request("geocoder offline".to_string()));
        }
        let address = address.to_lowercase();
        Ok(self
            .geocodes
            .iter()
            .find(|(prefix, _)| address.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone()))
    }

    async fn nearby_search(
        &self,
        center: Coordinates,
        radius: u32,
        keyword: &str,
    ) -> Result<Vec<PlaceSummary>, CollaboratorError> {
        if let Ok(mut calls) = self.search_calls.lock() {
            calls.push((center, radius, keyword.to_string()));
        }
        if self.deny_search {
            return Err(CollaboratorError::Denied("API key invalid".to_string()));
        }
        if self.fail_search {
            return Err(CollaboratorError::Request("operation timed out".to_string()));
        }
        Ok(self.results.clone())
    }

    async fn place_details(&self, place_id: &str) -> Result<Place, CollaboratorError> {
        self.details
            .get(place_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::Decode(format!("no details for {}", place_id)))
    }
}

/// Convenience constructor for a nearby-search hit.
pub fn summary(place_id: &str, name: &str, vicinity: &str, rating: Option<f32>) -> PlaceSummary {
    PlaceSummary {
        place_id: place_id.to_string(),
        name: name.to_string(),
        vicinity: vicinity.to_string(),
        rating,
        ..PlaceSummary::default()
    }
}
