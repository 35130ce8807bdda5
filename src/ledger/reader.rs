use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::{
    helpers::unix_now,
    ledger::{ledger_client::LedgerSource, response_structs::PoolStateResponse},
    prelude::*,
    types::{PoolId, PoolSnapshot},
    Error,
};

/// Default bound on concurrent single-pool reads when the ledger has no
/// batch call.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Typed, timeout-bounded reads of authoritative pool state.
#[derive(Clone)]
pub struct LedgerReader {
    source: Arc<dyn LedgerSource>,
    max_concurrency: usize,
}

impl std::fmt::Debug for LedgerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerReader")
            .field("max_concurrency", &self.max_concurrency)
            .field("batch", &self.source.supports_batch())
            .field("simulation", &self.source.supports_simulation())
            .finish()
    }
}

fn decode(pool_id: PoolId, response: Option<PoolStateResponse>) -> Result<PoolSnapshot> {
    let response = response.ok_or(Error::NotFound { pool_id })?;
    if response.pool_id != pool_id {
        return Err(Error::json_parse(format!(
            "requested pool {pool_id}, ledger answered for {}",
            response.pool_id
        )));
    }
    Ok(response.into_snapshot(unix_now())?)
}

impl LedgerReader {
    pub fn new(source: Arc<dyn LedgerSource>) -> Self {
        Self {
            source,
            max_concurrency: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn supports_simulation(&self) -> bool {
        self.source.supports_simulation()
    }

    /// Read one pool. `NotFound` if the ledger has no such pool.
    pub async fn fetch(&self, pool_id: PoolId, budget: Duration) -> Result<PoolSnapshot> {
        let response = timeout(budget, self.source.pool_state(pool_id))
            .await
            .map_err(|_| Error::timeout("ledger fetch", budget))??;
        decode(pool_id, response)
    }

    /// Read the ledger's decayed projection of a pool at `now`.
    pub async fn simulate(
        &self,
        pool_id: PoolId,
        now: i64,
        budget: Duration,
    ) -> Result<PoolSnapshot> {
        if !self.source.supports_simulation() {
            return Err(Error::Unsupported("state simulation"));
        }
        let response = timeout(budget, self.source.simulate_pool_state(pool_id, now))
            .await
            .map_err(|_| Error::timeout("ledger simulation", budget))??;
        decode(pool_id, response)
    }

    /// Read many pools. A pool that is missing, fails to decode, or fails
    /// to arrive before `budget` maps to `None`; the batch never fails as a
    /// whole.
    pub async fn fetch_many(
        &self,
        pool_ids: &[PoolId],
        budget: Duration,
    ) -> HashMap<PoolId, Option<PoolSnapshot>> {
        let deadline = Instant::now() + budget;
        let mut seen = HashSet::with_capacity(pool_ids.len());
        let ids: Vec<PoolId> = pool_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ids.is_empty() {
            return HashMap::new();
        }

        if self.source.supports_batch() {
            match timeout_at(deadline, self.source.pool_states(&ids)).await {
                Ok(Ok(responses)) if responses.len() == ids.len() => {
                    return ids
                        .iter()
                        .zip(responses)
                        .map(|(id, response)| (*id, keep_or_log(*id, decode(*id, response))))
                        .collect();
                }
                Ok(Ok(responses)) => {
                    warn!(
                        requested = ids.len(),
                        returned = responses.len(),
                        "Batch pool read returned the wrong number of entries, fanning out"
                    );
                }
                Ok(Err(e)) => {
                    warn!(error = %e, pools = ids.len(), "Batch pool read failed, fanning out");
                }
                Err(_) => {
                    warn!(pools = ids.len(), "Batch pool read timed out");
                    return ids.into_iter().map(|id| (id, None)).collect();
                }
            }
        }

        debug!(
            pools = ids.len(),
            concurrency = self.max_concurrency,
            "Fanning out single pool reads"
        );
        stream::iter(ids)
            .map(|id| async move {
                let result = match timeout_at(deadline, self.source.pool_state(id)).await {
                    Ok(Ok(response)) => decode(id, response),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::timeout("ledger fetch", budget)),
                };
                (id, keep_or_log(id, result))
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await
    }
}

fn keep_or_log(pool_id: PoolId, result: Result<PoolSnapshot>) -> Option<PoolSnapshot> {
    match result {
        Ok(snapshot) => Some(snapshot),
        Err(Error::NotFound { .. }) => None,
        Err(e) => {
            warn!(pool = %pool_id, error = %e, "Pool read failed");
            None
        }
    }
}
