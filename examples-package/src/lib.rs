//! Shared pieces for the demos: logging setup and a fake course backend
//! that counts how often it is hit.

use query_core::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `tracing` subscriber honoring `RUST_LOG`
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "query_cache=debug,query_batcher=debug,examples_package=debug"
    } else {
        "query_cache=info,query_batcher=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| QueryError::ConfigError(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

/// Stand-in for a remote data source with a fixed round-trip latency
#[derive(Debug)]
pub struct CourseBackend {
    latency: Duration,
    round_trips: AtomicUsize,
}

impl CourseBackend {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            round_trips: AtomicUsize::new(0),
        }
    }

    /// Number of calls that reached the backend
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub async fn courses_by_status(&self, status: &str) -> Result<Vec<Course>> {
        self.round_trip().await;
        if status == "broken" {
            return Err(QueryError::execution("backend rejected the filter"));
        }
        Ok((1..=3)
            .map(|i| Course {
                id: format!("c{}", i),
                title: format!("Course {}", i),
                status: status.to_string(),
            })
            .collect())
    }

    /// One round trip for many ids; results line up with `ids`
    pub async fn users_by_ids(&self, ids: Vec<String>) -> Result<Vec<User>> {
        self.round_trip().await;
        Ok(ids
            .into_iter()
            .map(|id| User {
                name: format!("User {}", id),
                id,
            })
            .collect())
    }

    async fn round_trip(&self) {
        let n = self.round_trips.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Backend round trip #{}", n);
        tokio::time::sleep(self.latency).await;
    }
}
