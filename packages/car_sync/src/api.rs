//! REST calls around the live stream: pick a car, mint a share token, or
//! fetch one state for the polling fallback.

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::model::{AdminCarState, LiveState};

/// Header carrying the admin access JWT on REST calls.
const ACCESS_TOKEN_HEADER: &str = "cf-access-token";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CarSummary {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// The listing returns bare ids from older servers, objects from newer ones.
#[derive(Deserialize)]
#[serde(untagged)]
enum CarEntry {
    Id(i64),
    Full {
        id: i64,
        #[serde(default)]
        display_name: Option<String>,
    },
}

impl From<CarEntry> for CarSummary {
    fn from(entry: CarEntry) -> Self {
        match entry {
            CarEntry::Id(id) => CarSummary {
                id,
                display_name: None,
            },
            CarEntry::Full { id, display_name } => CarSummary { id, display_name },
        }
    }
}

#[derive(Deserialize)]
struct CarsResponse {
    cars: Vec<CarEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreateShareRequest {
    pub car_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Arrival radius in meters; the share ends once the car gets this close
    /// to its destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrive_radius_m: Option<u32>,
}

impl CreateShareRequest {
    pub fn new(car_id: i64) -> Self {
        Self {
            car_id,
            expires_at: None,
            arrive_radius_m: None,
        }
    }

    fn validate(&self) -> Result<(), ApiError> {
        if self.car_id <= 0 {
            return Err(ApiError::Invalid(format!("car id {} is not positive", self.car_id)));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= Utc::now() {
                return Err(ApiError::Invalid("expiry is in the past".to_string()));
            }
        }
        if self.arrive_radius_m == Some(0) {
            return Err(ApiError::Invalid("arrive radius must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ShareCreated {
    pub token: String,
}

#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    admin_jwt: Option<String>,
}

impl ApiClient {
    pub fn new(client: Client, config: &SyncConfig) -> Self {
        Self {
            client,
            base_url: config.url(""),
            admin_jwt: config.admin_jwt.clone().filter(|t| !t.is_empty()),
        }
    }

    pub async fn list_cars(&self) -> Result<Vec<CarSummary>, ApiError> {
        let resp: CarsResponse = self.get_json("/api/v1/admin/cars").await?;
        Ok(resp.cars.into_iter().map(CarSummary::from).collect())
    }

    pub async fn create_share(&self, req: &CreateShareRequest) -> Result<ShareCreated, ApiError> {
        req.validate()?;
        let resp = self
            .send(self.with_auth(self.client.post(self.url("/api/v1/shares")).json(req)))
            .await?;
        let share: ShareCreated = resp.json().await?;
        if share.token.is_empty() {
            return Err(ApiError::Invalid("server returned an empty token".to_string()));
        }
        debug!(car_id = req.car_id, "share created");
        Ok(share)
    }

    /// Current state of one car, history and path folded in.
    pub async fn car_state(&self, car_id: i64) -> Result<LiveState, ApiError> {
        let admin: AdminCarState = self
            .get_json(&format!("/api/v1/admin/cars/{car_id}/state"))
            .await?;
        Ok(admin.into())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.admin_jwt {
            Some(jwt) => req.header(ACCESS_TOKEN_HEADER, jwt),
            None => req,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .send(self.with_auth(self.client.get(self.url(path))))
            .await?;
        Ok(resp.json().await?)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(resp)
    }
}
