use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiResult};

pub const PICKUP_REQUESTS_PATH: &str = "/api/pickup-requests/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    Doc,
    Small,
    Medium,
    Large,
    Xl,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageType::Doc => "doc",
            PackageType::Small => "small",
            PackageType::Medium => "medium",
            PackageType::Large => "large",
            PackageType::Xl => "xl",
        }
    }
}

impl std::str::FromStr for PackageType {
    type Err = InvalidPackageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "doc" | "document" | "documents" => Ok(PackageType::Doc),
            "small" => Ok(PackageType::Small),
            "medium" => Ok(PackageType::Medium),
            "large" => Ok(PackageType::Large),
            "xl" | "extra-large" => Ok(PackageType::Xl),
            other => Err(InvalidPackageType(other.to_owned())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid package type '{0}'")]
pub struct InvalidPackageType(pub String);

/// Fields submitted when scheduling a pickup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPickupRequest {
    pub name: String,
    pub phone_number: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub package_type: PackageType,
    /// Decimal kilograms, kept as text to avoid float rounding.
    pub weight: String,
    #[serde(default)]
    pub instructions: String,
}

/// A scheduled pickup as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickupRequest {
    pub id: i64,
    #[serde(flatten)]
    pub details: NewPickupRequest,
    pub created_at: DateTime<Utc>,
}

/// Pickup scheduling for the signed-in customer.
#[derive(Clone)]
pub struct PickupService {
    client: ApiClient,
}

impl PickupService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> ApiResult<Vec<PickupRequest>> {
        self.client.get_json(PICKUP_REQUESTS_PATH).await
    }

    pub async fn create(&self, request: &NewPickupRequest) -> ApiResult<PickupRequest> {
        self.client.post_json(PICKUP_REQUESTS_PATH, request).await
    }
}
