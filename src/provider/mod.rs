//! Client for the external bare-metal provisioning API.
//!
//! The provider allocates, reports on, and deallocates machines by UUID.
//! A successful `allocate` only means the request was accepted; the machine
//! is reachable once `allocations` reports an ip and game port.

pub mod sigv4;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use crate::config::settings;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocateResponse {
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub allocation: AllocationInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationInfo {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub regions: String,
    #[serde(default)]
    pub created: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationsResponse {
    pub success: bool,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub allocations: Vec<AllocationDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationDetail {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub game_port: i32,
    #[serde(default)]
    pub error: String,
}

impl AllocationDetail {
    /// The machine is ready once the provider reports where to reach it.
    pub fn ready(&self) -> bool {
        !self.ip.is_empty() && self.game_port != 0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeallocateResponse {
    #[serde(default)]
    pub uuid: String,
}

#[async_trait]
pub trait MachineProvider: Send + Sync {
    async fn allocate(
        &self,
        server_id: &str,
        profile_id: &str,
        region_id: &str,
    ) -> ProviderResult<AllocateResponse>;
    async fn allocations(&self, server_id: &str) -> ProviderResult<AllocationsResponse>;
    async fn deallocate(&self, server_id: &str) -> ProviderResult<DeallocateResponse>;
}

/// Signed HTTP client against the real provisioning API.
pub struct FleetApiClient {
    client: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: String,
    sig_region: String,
    sig_service: String,
}

impl FleetApiClient {
    pub fn new(base_url: impl Into<String>) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        let cfg = settings();
        Ok(FleetApiClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: cfg.provider_access_key.clone(),
            secret_key: cfg.provider_secret_key.clone(),
            sig_region: cfg.provider_sig_region.clone(),
            sig_service: cfg.provider_sig_service.clone(),
        })
    }

    async fn signed_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ProviderResult<T> {
        let query = sigv4::canonical_query(params);
        let url = format!("{}{}?{}", self.base_url, path, query);
        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| ProviderError::Malformed(format!("bad url {url}: {e}")))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(ProviderError::Malformed(format!("no host in {url}"))),
        };

        let creds = sigv4::Credentials {
            access_key: &self.access_key,
            secret_key: &self.secret_key,
        };
        let (amz_date, authorization) = sigv4::sign_get(
            &host,
            parsed.path(),
            &query,
            &self.sig_region,
            &self.sig_service,
            Utc::now(),
            &creds,
        );

        log::info!("provider: GET {url}");
        let resp = self
            .client
            .get(url)
            .header("x-amz-date", amz_date)
            .header("authorization", authorization)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MachineProvider for FleetApiClient {
    async fn allocate(
        &self,
        server_id: &str,
        profile_id: &str,
        region_id: &str,
    ) -> ProviderResult<AllocateResponse> {
        self.signed_get(
            "/server/allocate",
            &[
                ("profileid", profile_id.to_string()),
                ("regionid", region_id.to_string()),
                ("uuid", server_id.to_string()),
            ],
        )
        .await
    }

    async fn allocations(&self, server_id: &str) -> ProviderResult<AllocationsResponse> {
        self.signed_get("/server/allocations", &[("uuid", server_id.to_string())])
            .await
    }

    async fn deallocate(&self, server_id: &str) -> ProviderResult<DeallocateResponse> {
        self.signed_get("/server/deallocate", &[("uuid", server_id.to_string())])
            .await
    }
}

/// Stand-in provider for local runs and tests: allocations are accepted and
/// come up at 127.0.0.1:7777 unless scripted otherwise.
pub struct FakeProvider {
    pub allocate_response: Mutex<AllocateResponse>,
    /// Popped front-first by `allocations`; empty means "ready".
    pub allocations_script: Mutex<VecDeque<AllocationsResponse>>,
    pub allocated: Mutex<Vec<String>>,
    pub deallocated: Mutex<Vec<String>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        FakeProvider {
            allocate_response: Mutex::new(AllocateResponse {
                success: true,
                ..Default::default()
            }),
            allocations_script: Mutex::new(VecDeque::new()),
            allocated: Mutex::new(Vec::new()),
            deallocated: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ready allocation report for `server_id`.
    pub fn ready(server_id: &str) -> AllocationsResponse {
        AllocationsResponse {
            success: true,
            messages: Vec::new(),
            allocations: vec![AllocationDetail {
                uuid: server_id.to_string(),
                ip: "127.0.0.1".to_string(),
                game_port: 7777,
                error: String::new(),
            }],
        }
    }

    /// A pending allocation report: accepted but no address yet.
    pub fn pending(server_id: &str) -> AllocationsResponse {
        AllocationsResponse {
            success: true,
            messages: Vec::new(),
            allocations: vec![AllocationDetail {
                uuid: server_id.to_string(),
                ..Default::default()
            }],
        }
    }
}

#[async_trait]
impl MachineProvider for FakeProvider {
    async fn allocate(
        &self,
        server_id: &str,
        _profile_id: &str,
        _region_id: &str,
    ) -> ProviderResult<AllocateResponse> {
        self.allocated.lock().unwrap().push(server_id.to_string());
        Ok(self.allocate_response.lock().unwrap().clone())
    }

    async fn allocations(&self, server_id: &str) -> ProviderResult<AllocationsResponse> {
        let scripted = self.allocations_script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| Self::ready(server_id)))
    }

    async fn deallocate(&self, server_id: &str) -> ProviderResult<DeallocateResponse> {
        self.deallocated.lock().unwrap().push(server_id.to_string());
        Ok(DeallocateResponse {
            uuid: server_id.to_string(),
        })
    }
}
