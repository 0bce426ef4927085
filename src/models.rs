//! Typed records flowing through the crawl pipeline
//!
//! Dealership payloads come in from the dealership API, vehicle records are built by the
//! extractor and leave through the dispatcher. Every optional field maps to markup that a
//! listing page may omit; absence is never an error.

use crate::utils::validate_url;
use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inventory source nested inside a dealership API payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct InventorySource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Dealership entry exactly as exchanged with the dealership API
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DealershipApiRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_source: Option<InventorySource>,
}

/// One dealership to crawl during a cycle
///
/// Built from a [`DealershipApiRecord`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DealershipRecord {
    pub id: String,
    pub inventory_source_id: String,
    pub name: String,
    pub source_url: String,
    pub category: Option<String>,
}

impl TryFrom<DealershipApiRecord> for DealershipRecord {
    type Error = CrawlError;

    fn try_from(record: DealershipApiRecord) -> Result<Self, Self::Error> {
        let id = record
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CrawlError::InvalidRecord("dealership without id".to_string()))?;

        let source = record.inventory_source.unwrap_or_default();
        let source_url = source.url.filter(|url| !url.is_empty()).ok_or_else(|| {
            CrawlError::InvalidRecord(format!("dealership {id} has no inventory source url"))
        })?;
        validate_url(&source_url)?;

        Ok(Self {
            inventory_source_id: record
                .inventory_source_id
                .or(source.id)
                .unwrap_or_default(),
            name: record.name.unwrap_or_else(|| id.clone()),
            source_url,
            category: source.category,
            id,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MakeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmission: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drivetrain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub make: MakeInfo,
}

/// Structured fields parsed from one vehicle detail page
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VehicleDetails {
    pub dealership_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mileage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_number: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exterior_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interior_color: Option<String>,
    #[serde(default)]
    pub model: ModelInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    #[default]
    Available,
    #[serde(other)]
    Other,
}

/// A listing ready for delivery to the inventory API
///
/// `listing_url` is the natural key: two records with the same URL are the same listing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VehicleRecord {
    pub inventory_source_id: String,
    pub listing_url: String,
    pub status: VehicleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_data: Option<VehicleDetails>,
}

impl VehicleRecord {
    /// Record for a successfully scraped listing.
    pub fn available(
        inventory_source_id: impl Into<String>,
        listing_url: impl Into<String>,
        price: Option<f64>,
        vehicle_data: Option<VehicleDetails>,
    ) -> Self {
        Self {
            inventory_source_id: inventory_source_id.into(),
            listing_url: listing_url.into(),
            status: VehicleStatus::Available,
            price: price.filter(|p| *p >= 0.0),
            vehicle_data,
        }
    }
}

/// Lenient view of a vehicle already stored remotely
///
/// Only the listing URL matters for deduplication, so every other field may be missing or
/// shaped differently without failing the fetch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExistingVehicle {
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub inventory_source_id: Option<String>,
}
