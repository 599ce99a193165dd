//! Order list reading and the readiness gate
//!
//! A batch of orders is only worth harvesting once the portal has finished
//! preparing every one of them. [`OrderStatusGate`] checks the status of each
//! order and reports the first one still being prepared.

use crate::config::OrderConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Read order ids from a text file, one per line
///
/// Lines are trimmed; blank lines are skipped.
///
/// # Errors
/// [`crate::Error::Io`] if the file cannot be read.
pub async fn read_order_ids(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    let ids: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    info!(path = %path.display(), count = ids.len(), "read order ids");
    Ok(ids)
}

/// Where order statuses come from (normally the portal's order table)
#[async_trait]
pub trait OrderStatusSource: Send {
    /// Status text of `order_id`, or `None` if the order is not listed
    async fn order_status(&mut self, order_id: &str) -> Result<Option<String>>;
}

/// Outcome of a gate evaluation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    /// Every listed order is ready; go ahead
    Proceed {
        /// Orders not found in the status table
        missing: Vec<String>,
    },
    /// An order is still being prepared; try again later
    Wait {
        /// The order that blocks the batch
        order_id: String,
        /// Its status text
        status: String,
    },
}

impl GateDecision {
    /// Whether the batch may be harvested now
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed { .. })
    }
}

/// Decides whether a batch of orders is ready to harvest
#[derive(Clone, Debug)]
pub struct OrderStatusGate {
    pending_statuses: Vec<String>,
}

impl OrderStatusGate {
    /// Create a gate from the configured pending markers
    pub fn new(config: &OrderConfig) -> Self {
        Self {
            pending_statuses: config
                .pending_statuses
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
        }
    }

    /// Whether `status` means the order is not ready yet
    pub fn is_pending(&self, status: &str) -> bool {
        let status = status.trim();
        self.pending_statuses.iter().any(|p| p == status)
    }

    /// Check every order; stop at the first pending one
    ///
    /// Orders the source does not know about are logged and do not block.
    ///
    /// # Errors
    /// Whatever the status source reports.
    pub async fn evaluate<S>(&self, source: &mut S, orders: &[String]) -> Result<GateDecision>
    where
        S: OrderStatusSource + ?Sized,
    {
        let mut missing = Vec::new();

        for order_id in orders {
            match source.order_status(order_id).await? {
                Some(status) if self.is_pending(&status) => {
                    info!(order_id = %order_id, status = %status, "order not ready, waiting for next round");
                    return Ok(GateDecision::Wait {
                        order_id: order_id.clone(),
                        status,
                    });
                }
                Some(status) => {
                    info!(order_id = %order_id, status = %status, "order status");
                }
                None => {
                    warn!(order_id = %order_id, "order not found in status table");
                    missing.push(order_id.clone());
                }
            }
        }

        Ok(GateDecision::Proceed { missing })
    }
}
