//! Network device discovery

use crate::exec::Exec;
use anyhow::{Context, Result};
use serde::Deserialize;

const ROUTE_TARGET: &str = "1.1.1.1";

#[derive(Debug, Deserialize)]
struct Route {
    dev: String,
}

/// The device carrying the default route
pub async fn find_network_device() -> Result<String> {
    let json = Exec::new("ip")
        .args(["-json", "route", "get", ROUTE_TARGET])
        .quiet()
        .stdout()
        .await?;
    parse_route_device(&json)
}

pub fn parse_route_device(json: &str) -> Result<String> {
    let routes: Vec<Route> = serde_json::from_str(json).context("Failed to parse ip route output")?;
    routes
        .into_iter()
        .next()
        .map(|route| route.dev)
        .context("No route found to determine the network device")
}
