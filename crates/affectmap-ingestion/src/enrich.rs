//! Best-effort profile enrichment: affiliation and country lookups.
//!
//! Enrichment failures are enhancements gone missing, not correctness
//! problems — every lookup here is wrapped in its own fallback and never
//! escalates. Country lookups are cached indefinitely per normalized
//! institution name and throttled with a fixed etiquette delay.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use affectmap_common::ScopedClient;

use crate::models::Affiliation;
use crate::sources::AuthorRecord;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
const ETIQUETTE_DELAY: Duration = Duration::from_secs(1);

// ── Geocoder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PlaceSchema {
    #[serde(default)]
    address: AddressSchema,
}

#[derive(Debug, Default, Deserialize)]
struct AddressSchema {
    #[serde(default)]
    country: Option<String>,
}

/// Institution name → country name, cached per normalized name.
pub struct Geocoder {
    client: ScopedClient,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl Geocoder {
    pub fn new(client: ScopedClient) -> Self {
        Self { client, cache: Mutex::new(HashMap::new()) }
    }

    /// Resolve a country name, best-effort. Negative results are cached too
    /// so a failing institution is asked about once per run at most.
    pub async fn country_of(&self, institution: &str) -> Option<String> {
        let key = normalize_institution(institution);
        if key.is_empty() {
            return None;
        }

        {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }

        tokio::time::sleep(ETIQUETTE_DELAY).await;
        let country = match self.lookup(institution).await {
            Ok(c) => c,
            Err(e) => {
                warn!(institution, error = %e, "geocoding lookup failed");
                None
            }
        };

        self.cache.lock().await.insert(key, country.clone());
        country
    }

    async fn lookup(&self, institution: &str) -> anyhow::Result<Option<String>> {
        let params = [
            ("q", institution.to_string()),
            ("format", "json".to_string()),
            ("limit", "1".to_string()),
            ("addressdetails", "1".to_string()),
        ];
        let places: Vec<PlaceSchema> = self
            .client
            .get(NOMINATIM_URL)?
            .query(&params)
            .send()
            .await?
            .json()
            .await?;
        debug!(institution, found = !places.is_empty(), "geocoding result");
        Ok(places.into_iter().next().and_then(|p| p.address.country))
    }

    #[cfg(test)]
    async fn seed(&self, institution: &str, country: Option<&str>) {
        self.cache
            .lock()
            .await
            .insert(normalize_institution(institution), country.map(str::to_string));
    }
}

fn normalize_institution(name: &str) -> String {
    name.trim().to_lowercase()
}

// ── Affiliation ───────────────────────────────────────────────────────────────

/// ISO 3166-1 alpha-2 codes the author records carry, mapped to the country
/// names the geocoder yields, so `Affiliation.country` holds one
/// representation regardless of which path filled it.
const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("AT", "Austria"),
    ("AU", "Australia"),
    ("BE", "Belgium"),
    ("BR", "Brazil"),
    ("CA", "Canada"),
    ("CH", "Switzerland"),
    ("CN", "China"),
    ("CZ", "Czechia"),
    ("DE", "Germany"),
    ("DK", "Denmark"),
    ("ES", "Spain"),
    ("FI", "Finland"),
    ("FR", "France"),
    ("GB", "United Kingdom"),
    ("GR", "Greece"),
    ("HK", "Hong Kong"),
    ("IE", "Ireland"),
    ("IL", "Israel"),
    ("IN", "India"),
    ("IT", "Italy"),
    ("JP", "Japan"),
    ("KR", "South Korea"),
    ("MX", "Mexico"),
    ("NL", "Netherlands"),
    ("NO", "Norway"),
    ("NZ", "New Zealand"),
    ("PL", "Poland"),
    ("PT", "Portugal"),
    ("SE", "Sweden"),
    ("SG", "Singapore"),
    ("TR", "Turkey"),
    ("TW", "Taiwan"),
    ("US", "United States"),
];

fn country_name(code: &str) -> Option<&'static str> {
    let code = code.to_ascii_uppercase();
    COUNTRY_NAMES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

/// Combine the author record's institution with a geocoded country. The
/// author record usually carries a country code already; the geocoder fills
/// the gap, and covers codes outside the name table.
pub async fn resolve_affiliation(author: Option<&AuthorRecord>, geocoder: &Geocoder) -> Affiliation {
    let Some(author) = author else {
        return Affiliation::default();
    };

    let institution = author.institution.clone();
    let country = match (&author.country_code, &institution) {
        (Some(code), inst) if !code.is_empty() => match country_name(code) {
            Some(name) => Some(name.to_string()),
            None => match inst {
                // Unmapped code: geocode the institution, keeping the bare
                // code as the last resort.
                Some(inst) => geocoder.country_of(inst).await.or_else(|| Some(code.clone())),
                None => Some(code.clone()),
            },
        },
        (_, Some(inst)) => geocoder.country_of(inst).await,
        _ => None,
    };

    Affiliation { institution, country }
}
