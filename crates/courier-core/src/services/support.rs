use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiRequest, ApiResult};
use crate::config::SUPPORT_REQUESTS_PATH;

#[derive(Debug, Clone, Serialize)]
pub struct SupportRequest {
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportReceipt {
    #[serde(default)]
    pub id: Option<i64>,
}

/// Public support intake. Submissions are anonymous even when the user is signed in.
#[derive(Clone)]
pub struct SupportService {
    client: ApiClient,
}

impl SupportService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn submit(&self, request: &SupportRequest) -> ApiResult<SupportReceipt> {
        let response = self
            .client
            .send(ApiRequest::post(SUPPORT_REQUESTS_PATH).json(request)?)
            .await?;
        if response.body.trim().is_empty() {
            return Ok(SupportReceipt::default());
        }
        response.json()
    }
}
