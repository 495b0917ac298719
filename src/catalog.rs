//! Court catalog and pricing collaborators.
//!
//! The booking core only needs two lookups: whether a court exists (and how
//! many players it takes) and what an interval on it costs. Both are traits so
//! the manager can be wired to something other than the JSON-seeded
//! [`InMemoryCatalog`].

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Datelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("no price rule covers court {court_id} over the requested interval")]
    NoApplicableRule { court_id: CourtId },
    #[error("failed to read catalog: {0}")]
    Io(String),
    #[error("malformed catalog: {0}")]
    Parse(String),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourtInfo {
    pub id: CourtId,
    pub venue_id: String,
    pub name: String,
    pub max_players: u32,
    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

/// One priced window of a court's week. Times are `HH:MM` in UTC; `end` may be
/// `24:00` to run to midnight. Prices are decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRule {
    pub court_id: CourtId,
    /// 0 = Sunday.
    pub day_of_week: u8,
    pub start: String,
    pub end: String,
    pub price_per_hour: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".into()
}

/// On-disk shape of the catalog seed file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    #[serde(default)]
    pub courts: Vec<CourtInfo>,
    #[serde(default)]
    pub price_rules: Vec<PriceRule>,
}

#[async_trait]
pub trait CourtCatalog: Send + Sync {
    /// The court, if it exists and is active.
    async fn get_court(&self, court_id: &str) -> Option<CourtInfo>;
}

#[async_trait]
pub trait PricingEngine: Send + Sync {
    async fn quote(&self, court_id: &str, span: &Span) -> Result<Money, CatalogError>;
}

/// A rule with its window resolved to minutes since midnight.
#[derive(Debug, Clone)]
struct Window {
    day_of_week: u8,
    start_min: i64,
    end_min: i64,
    price_per_hour: Decimal,
}

#[derive(Debug, Clone)]
struct CourtPricing {
    currency: String,
    windows: Vec<Window>,
}

/// Parse `HH:MM` into minutes since midnight. `24:00` is accepted only as an end.
fn parse_hhmm(s: &str, is_end: bool) -> Option<i64> {
    let (h, m) = s.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    match (h, m) {
        (24, 0) if is_end => Some(24 * 60),
        (0..=23, 0..=59) => Some(h * 60 + m),
        _ => None,
    }
}

fn build_pricing(rules: Vec<PriceRule>) -> Result<HashMap<CourtId, CourtPricing>, CatalogError> {
    let mut pricing: HashMap<CourtId, CourtPricing> = HashMap::new();
    for rule in rules {
        if rule.day_of_week > 6 {
            return Err(CatalogError::Invalid(format!(
                "court {}: dayOfWeek {} out of range 0-6",
                rule.court_id, rule.day_of_week
            )));
        }
        let (Some(start_min), Some(end_min)) =
            (parse_hhmm(&rule.start, false), parse_hhmm(&rule.end, true))
        else {
            return Err(CatalogError::Invalid(format!(
                "court {}: bad time window {}-{}",
                rule.court_id, rule.start, rule.end
            )));
        };
        if start_min >= end_min {
            return Err(CatalogError::Invalid(format!(
                "court {}: window {}-{} is empty",
                rule.court_id, rule.start, rule.end
            )));
        }
        if rule.price_per_hour.is_sign_negative() {
            return Err(CatalogError::Invalid(format!(
                "court {}: negative price {}",
                rule.court_id, rule.price_per_hour
            )));
        }

        let entry = pricing
            .entry(rule.court_id.clone())
            .or_insert_with(|| CourtPricing {
                currency: rule.currency.clone(),
                windows: Vec::new(),
            });
        if entry.currency != rule.currency {
            return Err(CatalogError::Invalid(format!(
                "court {}: mixed currencies {} and {}",
                rule.court_id, entry.currency, rule.currency
            )));
        }
        let clash = entry.windows.iter().any(|w| {
            w.day_of_week == rule.day_of_week && w.start_min < end_min && start_min < w.end_min
        });
        if clash {
            return Err(CatalogError::Invalid(format!(
                "court {}: overlapping rules on day {}",
                rule.court_id, rule.day_of_week
            )));
        }
        entry.windows.push(Window {
            day_of_week: rule.day_of_week,
            start_min,
            end_min,
            price_per_hour: rule.price_per_hour,
        });
    }
    Ok(pricing)
}

/// Read-only catalog held in memory, seeded once at startup.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    courts: HashMap<CourtId, CourtInfo>,
    pricing: HashMap<CourtId, CourtPricing>,
}

impl InMemoryCatalog {
    pub fn from_seed(seed: CatalogSeed) -> Result<Self, CatalogError> {
        let pricing = build_pricing(seed.price_rules)?;
        let mut courts = HashMap::with_capacity(seed.courts.len());
        for court in seed.courts {
            if courts.contains_key(&court.id) {
                return Err(CatalogError::Invalid(format!("duplicate court {}", court.id)));
            }
            courts.insert(court.id.clone(), court);
        }
        Ok(Self { courts, pricing })
    }

    /// Load a JSON seed file. `None` or a missing file yields an empty catalog.
    pub fn load(path: Option<&Path>) -> Result<Self, CatalogError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "catalog file not found, starting empty");
                return Ok(Self::default());
            }
            Err(e) => return Err(CatalogError::Io(format!("{}: {e}", path.display()))),
        };
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .map_err(|e| CatalogError::Parse(format!("{}: {e}", path.display())))?;
        let catalog = Self::from_seed(seed)?;
        tracing::info!(
            path = %path.display(),
            courts = catalog.courts.len(),
            priced = catalog.pricing.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn court_count(&self) -> usize {
        self.courts.len()
    }

    fn price(&self, court_id: &str, span: &Span) -> Result<Money, CatalogError> {
        let no_rule = || CatalogError::NoApplicableRule {
            court_id: court_id.to_string(),
        };
        let pricing = self.pricing.get(court_id).ok_or_else(no_rule)?;

        let mut total = Decimal::ZERO;
        let mut covered: Ms = 0;
        let mut day = span.start.div_euclid(DAY_MS) * DAY_MS;
        while day < span.end {
            let weekday = DateTime::from_timestamp_millis(day)
                .ok_or_else(no_rule)?
                .weekday()
                .num_days_from_sunday() as u8;
            let today = Span::new(span.start.max(day), span.end.min(day + DAY_MS));
            for w in pricing.windows.iter().filter(|w| w.day_of_week == weekday) {
                let window = Span::new(day + w.start_min * MINUTE_MS, day + w.end_min * MINUTE_MS);
                let overlap = today.overlap_ms(&window);
                if overlap > 0 {
                    covered += overlap;
                    total += w.price_per_hour * Decimal::from(overlap) / Decimal::from(HOUR_MS);
                }
            }
            day += DAY_MS;
        }

        // Windows on a day never overlap, so full coverage means covered == duration.
        if covered < span.duration_ms() {
            return Err(no_rule());
        }
        Ok(Money::new(total.round_dp(2), pricing.currency.clone()))
    }
}

#[async_trait]
impl CourtCatalog for InMemoryCatalog {
    async fn get_court(&self, court_id: &str) -> Option<CourtInfo> {
        self.courts.get(court_id).filter(|c| c.active).cloned()
    }
}

#[async_trait]
impl PricingEngine for InMemoryCatalog {
    async fn quote(&self, court_id: &str, span: &Span) -> Result<Money, CatalogError> {
        self.price(court_id, span)
    }
}
