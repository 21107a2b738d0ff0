use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use sea_orm::DatabaseConnection;

use crate::config::CacheConfig;
use crate::engine::VotingEngine;
use crate::models::voting::ResultView;

#[derive(Clone)]
pub struct AppState {
    pub database: DatabaseConnection,
    pub engine: VotingEngine,
    pub cache: Arc<ApiCache>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(database: DatabaseConnection, engine: VotingEngine, cache: Arc<ApiCache>) -> Self {
        assert!(
            cache.results_capacity >= 100,
            "Result cache capacity must be configured"
        );
        Self {
            database,
            engine,
            cache,
            start_time: Instant::now(),
        }
    }
}

pub struct ApiCache {
    /// Read-side tally views keyed by "org\nproposal_url". Only the
    /// derived result is cached; the delegation graph is always read
    /// fresh from the store.
    pub results: Cache<String, Arc<ResultView>>,
    pub results_capacity: u64,
}

impl ApiCache {
    pub fn new(config: &CacheConfig) -> Self {
        assert!(
            config.results_max_capacity >= 100,
            "Result cache capacity threshold"
        );

        let results = Cache::builder()
            .max_capacity(config.results_max_capacity)
            .time_to_live(Duration::from_secs(config.results_ttl_seconds))
            .time_to_idle(Duration::from_secs(config.results_ttl_seconds / 2 + 1))
            .build();

        Self {
            results,
            results_capacity: config.results_max_capacity,
        }
    }

    pub fn result_key(organization_id: &str, proposal_url: &str) -> String {
        format!("{organization_id}\n{proposal_url}")
    }

    /// Drops the cached tally for one topic. Called after every committed
    /// write touching that proposal.
    pub async fn invalidate_result(&self, organization_id: &str, proposal_url: &str) {
        self.results
            .invalidate(&Self::result_key(organization_id, proposal_url))
            .await;
    }
}
