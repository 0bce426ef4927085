//! Remote dealership and vehicle inventory endpoints
//!
//! Both collections are plain JSON arrays behind one URL each: `GET` lists the collection,
//! `POST` adds one entry. Any non-2xx status counts as a failure of that call.

use crate::config::ApiSettings;
use crate::models::{DealershipApiRecord, ExistingVehicle, VehicleRecord};
use crate::CrawlError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

#[async_trait]
pub trait DealershipSource: Send + Sync {
    async fn fetch_dealerships(&self) -> Result<Vec<DealershipApiRecord>, CrawlError>;

    async fn create_dealership(&self, record: &DealershipApiRecord) -> Result<(), CrawlError>;
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Vehicles already stored remotely, used for deduplication.
    async fn existing_vehicles(&self) -> Result<Vec<ExistingVehicle>, CrawlError>;

    /// Posts one record. Fails with [`CrawlError::Delivery`] on any non-success outcome.
    async fn post_vehicle(&self, record: &VehicleRecord) -> Result<(), CrawlError>;
}

/// reqwest client for both collections
pub struct InventoryApi {
    client: reqwest::Client,
    vehicle_url: String,
    dealership_url: String,
}

impl InventoryApi {
    pub fn new(settings: &ApiSettings) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| CrawlError::Configuration(format!("api client: {e}")))?;

        Ok(Self {
            client,
            vehicle_url: settings.vehicle_api_url.clone(),
            dealership_url: settings.dealership_api_url.clone(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, CrawlError> {
        let api_error = |reason: String| CrawlError::Api {
            endpoint: endpoint.to_string(),
            reason,
        };
        if endpoint.is_empty() {
            return Err(api_error("endpoint not configured".to_string()));
        }

        let response = self
            .client
            .get(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| api_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(api_error(format!("status {}", response.status())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| api_error(format!("invalid response body: {e}")))
    }

    async fn post_json<T: Serialize + Sync>(&self, endpoint: &str, body: &T) -> Result<(), String> {
        if endpoint.is_empty() {
            return Err("endpoint not configured".to_string());
        }

        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("status {status}: {}", body.trim()))
        }
    }
}

#[async_trait]
impl DealershipSource for InventoryApi {
    async fn fetch_dealerships(&self) -> Result<Vec<DealershipApiRecord>, CrawlError> {
        let records: Vec<DealershipApiRecord> = self.get_json(&self.dealership_url).await?;
        info!("Retrieved {} dealerships", records.len());
        Ok(records)
    }

    async fn create_dealership(&self, record: &DealershipApiRecord) -> Result<(), CrawlError> {
        self.post_json(&self.dealership_url, record)
            .await
            .map_err(|reason| CrawlError::Api {
                endpoint: self.dealership_url.clone(),
                reason,
            })?;
        debug!(id = ?record.id, "Posted dealership");
        Ok(())
    }
}

#[async_trait]
impl VehicleStore for InventoryApi {
    async fn existing_vehicles(&self) -> Result<Vec<ExistingVehicle>, CrawlError> {
        let vehicles: Vec<ExistingVehicle> = self.get_json(&self.vehicle_url).await?;
        info!("Retrieved {} existing vehicles", vehicles.len());
        Ok(vehicles)
    }

    async fn post_vehicle(&self, record: &VehicleRecord) -> Result<(), CrawlError> {
        self.post_json(&self.vehicle_url, record)
            .await
            .map_err(|reason| CrawlError::Delivery {
                url: record.listing_url.clone(),
                reason,
            })
    }
}
