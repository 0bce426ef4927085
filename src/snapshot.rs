//! CSV snapshots of crawled vehicles
//!
//! A crawl can be written to disk and delivered later with `dispatch --input`. Each
//! [`VehicleRecord`] becomes one flat row; nested vehicle fields get their own columns.

use crate::models::{MakeInfo, ModelInfo, VehicleDetails, VehicleRecord, VehicleStatus};
use crate::CrawlError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SnapshotRow {
    pub inventory_source_id: String,
    pub listing_url: String,
    pub status: VehicleStatus,
    pub price: Option<f64>,
    /// Whether the columns below describe vehicle data at all
    pub has_vehicle_data: bool,
    pub dealership_id: String,
    pub vin: Option<String>,
    pub mileage: Option<u64>,
    pub stock_number: Option<String>,
    pub description: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub trim: Option<String>,
    pub body_style: Option<String>,
    pub transmission: Option<String>,
    pub fuel_type: Option<String>,
    pub drivetrain: Option<String>,
    pub engine: Option<String>,
    pub make: Option<String>,
}

impl From<&VehicleRecord> for SnapshotRow {
    fn from(record: &VehicleRecord) -> Self {
        let mut row = SnapshotRow {
            inventory_source_id: record.inventory_source_id.clone(),
            listing_url: record.listing_url.clone(),
            status: record.status,
            price: record.price,
            ..Default::default()
        };

        if let Some(details) = &record.vehicle_data {
            let model = &details.model;
            row.has_vehicle_data = true;
            row.dealership_id = details.dealership_id.clone();
            row.vin = details.vin.clone();
            row.mileage = details.mileage;
            row.stock_number = details.stock_number.clone();
            row.description = Some(details.description.clone());
            row.exterior_color = details.exterior_color.clone();
            row.interior_color = details.interior_color.clone();
            row.model = model.name.clone();
            row.year = model.year.clone();
            row.trim = model.trim.clone();
            row.body_style = model.body_style.clone();
            row.transmission = model.transmission.clone();
            row.fuel_type = model.fuel_type.clone();
            row.drivetrain = model.drivetrain.clone();
            row.engine = model.engine.clone();
            row.make = model.make.name.clone();
        }
        row
    }
}

impl From<SnapshotRow> for VehicleRecord {
    fn from(row: SnapshotRow) -> Self {
        let vehicle_data = row.has_vehicle_data.then(|| VehicleDetails {
            dealership_id: row.dealership_id,
            vin: row.vin,
            mileage: row.mileage,
            stock_number: row.stock_number,
            description: row.description.unwrap_or_default(),
            exterior_color: row.exterior_color,
            interior_color: row.interior_color,
            model: ModelInfo {
                name: row.model,
                year: row.year,
                trim: row.trim,
                body_style: row.body_style,
                transmission: row.transmission,
                fuel_type: row.fuel_type,
                drivetrain: row.drivetrain,
                engine: row.engine,
                make: MakeInfo { name: row.make },
            },
        });

        VehicleRecord {
            inventory_source_id: row.inventory_source_id,
            listing_url: row.listing_url,
            status: row.status,
            price: row.price.filter(|p| *p >= 0.0),
            vehicle_data,
        }
    }
}

/// Writes `records` to `path`, replacing any existing file. Returns the row count.
pub fn write_snapshot(path: &Path, records: &[VehicleRecord]) -> Result<usize, CrawlError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(SnapshotRow::from(record))?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = records.len(), "Wrote vehicle snapshot");
    Ok(records.len())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<VehicleRecord>, CrawlError> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize::<SnapshotRow>()
        .map(|row| row.map(VehicleRecord::from).map_err(CrawlError::from))
        .collect::<Result<Vec<_>, _>>()?;

    info!(path = %path.display(), rows = records.len(), "Read vehicle snapshot");
    Ok(records)
}
