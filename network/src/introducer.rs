//! Peer-directory introducer.
//!
//! Fetches additional peer endpoints from a well-known HTTP directory
//! and merges them into the p2p pool at startup. Failures are soft: the
//! observer runs fine on configured peers alone.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    #[serde(default)]
    peers: Vec<String>,
}

/// Ask the directory for peer endpoints. Returns an empty list on any
/// failure.
pub async fn fetch_directory_peers(directory_url: &str) -> Vec<String> {
    let client = match reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build() {
        Ok(client) => client,
        Err(_) => return Vec::new(),
    };

    let response = match client.get(directory_url).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(error = %err, "peer directory unreachable");
            return Vec::new();
        }
    };

    match response.json::<DirectoryResponse>().await {
        Ok(body) => {
            info!(count = body.peers.len(), "peer directory answered");
            body.peers
        }
        Err(err) => {
            debug!(error = %err, "peer directory returned malformed body");
            Vec::new()
        }
    }
}
