use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{
    ledger::response_structs::PoolStateResponse, prelude::*, req::HttpClient, types::PoolId,
    BaseUrl, Error,
};

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum LedgerRequest {
    #[serde(rename_all = "camelCase")]
    PoolState { pool_id: PoolId },
    /// Multi-pool read in one round trip.
    #[serde(rename_all = "camelCase")]
    PoolStates { pool_ids: Vec<PoolId> },
    /// Read-only projection of the pool as if decay were applied at `now`.
    #[serde(rename_all = "camelCase")]
    SimulatePoolState { pool_id: PoolId, now: i64 },
}

/// Read access to the authoritative ledger.
///
/// Implementations return raw wire responses; decoding happens once, in
/// [`crate::ledger::LedgerReader`]. `Ok(None)` means the ledger answered
/// and has no such pool.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn pool_state(&self, pool_id: PoolId) -> Result<Option<PoolStateResponse>>;

    /// One entry per requested id, in request order.
    async fn pool_states(&self, _pool_ids: &[PoolId]) -> Result<Vec<Option<PoolStateResponse>>> {
        Err(Error::Unsupported("batch pool reads"))
    }

    fn supports_batch(&self) -> bool {
        false
    }

    async fn simulate_pool_state(
        &self,
        _pool_id: PoolId,
        _now: i64,
    ) -> Result<Option<PoolStateResponse>> {
        Err(Error::Unsupported("state simulation"))
    }

    fn supports_simulation(&self) -> bool {
        false
    }
}

/// HTTP client for the ledger gateway's `/info` endpoint.
///
/// Construct once at startup and share by reference (or `Arc`).
#[derive(Debug, Clone)]
pub struct LedgerClient {
    pub http_client: HttpClient,
    batch: bool,
    simulation: bool,
}

impl LedgerClient {
    pub fn new(client: Option<Client>, base_url: Option<BaseUrl>) -> LedgerClient {
        let client = client.unwrap_or_default();
        let base_url = base_url.unwrap_or(BaseUrl::Mainnet);
        LedgerClient {
            http_client: HttpClient::new(client, &base_url),
            batch: true,
            simulation: true,
        }
    }

    /// Declare which optional gateway calls this deployment serves.
    pub fn with_capabilities(mut self, batch: bool, simulation: bool) -> Self {
        self.batch = batch;
        self.simulation = simulation;
        self
    }

    async fn send_info_request<T: for<'a> Deserialize<'a>>(
        &self,
        request: LedgerRequest,
    ) -> Result<T> {
        let data = serde_json::to_string(&request).map_err(|e| Error::JsonParse(e.to_string()))?;

        let return_data = self.http_client.post("/info", data).await?;
        serde_json::from_str(&return_data).map_err(|e| Error::JsonParse(e.to_string()))
    }
}

#[async_trait]
impl LedgerSource for LedgerClient {
    async fn pool_state(&self, pool_id: PoolId) -> Result<Option<PoolStateResponse>> {
        self.send_info_request(LedgerRequest::PoolState { pool_id })
            .await
    }

    async fn pool_states(&self, pool_ids: &[PoolId]) -> Result<Vec<Option<PoolStateResponse>>> {
        let states: Vec<Option<PoolStateResponse>> = self
            .send_info_request(LedgerRequest::PoolStates {
                pool_ids: pool_ids.to_vec(),
            })
            .await?;
        if states.len() != pool_ids.len() {
            return Err(Error::json_parse(format!(
                "poolStates returned {} entries for {} ids",
                states.len(),
                pool_ids.len()
            )));
        }
        Ok(states)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn simulate_pool_state(
        &self,
        pool_id: PoolId,
        now: i64,
    ) -> Result<Option<PoolStateResponse>> {
        self.send_info_request(LedgerRequest::SimulatePoolState { pool_id, now })
            .await
    }

    fn supports_simulation(&self) -> bool {
        self.simulation
    }
}
