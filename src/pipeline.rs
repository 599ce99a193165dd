//! End-to-end processing of a list of orders
//!
//! ```text
//! gate ──► for each order: harvest ──► extract links ──► batch download ──► back to main window
//! ```
//!
//! A failed or empty harvest for one order is logged and the runner moves on
//! to the next order.

use crate::config::Config;
use crate::coordinator::BatchDownloadCoordinator;
use crate::error::Result;
use crate::harvester::{BrowserSession, ResultHarvester};
use crate::links::extract;
use crate::order_status::{GateDecision, OrderStatusGate, OrderStatusSource};
use crate::types::{BatchReport, HarvestResult, WindowHandle};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one harvested delivery
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryReport {
    /// Nothing was delivered before the harvest timeout
    NoDelivery,
    /// A listing arrived but held no product links
    NoContentFound,
    /// Links were found and dispatched
    Downloaded(BatchReport),
    /// The harvest itself failed
    HarvestFailed {
        /// Error message
        message: String,
    },
}

/// Result for one order
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderReport {
    /// Order id as read from the order list
    pub order_id: String,
    /// What the harvest produced
    pub delivery: DeliveryReport,
}

/// Result of one run over an order list
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Gate decision taken before any harvesting
    pub decision: GateDecision,
    /// Per-order results (empty when the gate said wait)
    pub orders: Vec<OrderReport>,
    /// Files dispatched across all orders
    pub total: usize,
    /// Files downloaded across all orders
    pub succeeded: usize,
    /// Files that failed across all orders
    pub failed: usize,
}

impl RunSummary {
    fn new(decision: GateDecision) -> Self {
        Self {
            decision,
            orders: Vec::new(),
            total: 0,
            succeeded: 0,
            failed: 0,
        }
    }

    fn push(&mut self, report: OrderReport) {
        if let DeliveryReport::Downloaded(batch) = &report.delivery {
            self.total += batch.total;
            self.succeeded += batch.succeeded;
            self.failed += batch.failed;
        }
        self.orders.push(report);
    }
}

/// Drives the gate, harvester and coordinator for a list of orders
pub struct OrderRunner {
    config: Arc<Config>,
    gate: OrderStatusGate,
    harvester: ResultHarvester,
    coordinator: BatchDownloadCoordinator,
}

impl OrderRunner {
    /// Create a runner with the built-in engines
    ///
    /// # Errors
    /// See [`BatchDownloadCoordinator::new`].
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let coordinator = BatchDownloadCoordinator::new(config.clone())?;
        let harvester = ResultHarvester::new(config.clone());
        Ok(Self::with_parts(config, harvester, coordinator))
    }

    /// Create a runner from preassembled parts
    pub fn with_parts(
        config: Arc<Config>,
        harvester: ResultHarvester,
        coordinator: BatchDownloadCoordinator,
    ) -> Self {
        Self {
            gate: OrderStatusGate::new(&config.orders),
            config,
            harvester,
            coordinator,
        }
    }

    /// The harvester used for each order
    pub fn harvester(&self) -> &ResultHarvester {
        &self.harvester
    }

    /// The coordinator used for each order
    pub fn coordinator(&self) -> &BatchDownloadCoordinator {
        &self.coordinator
    }

    /// Process `orders` if the gate allows it
    ///
    /// # Errors
    /// Only gate evaluation and reading the main window handle are fatal;
    /// per-order problems are recorded in the summary.
    pub async fn run<B>(&self, browser: &mut B, orders: &[String]) -> Result<RunSummary>
    where
        B: BrowserSession + OrderStatusSource,
    {
        let decision = self.gate.evaluate(browser, orders).await?;
        if !decision.is_proceed() {
            return Ok(RunSummary::new(decision));
        }

        let main = browser.active_window().await?;
        let dest_dir = self.config.download.download_dir.clone();
        let mut summary = RunSummary::new(decision);

        for (i, order_id) in orders.iter().enumerate() {
            info!(order_id = %order_id, index = i + 1, total = orders.len(), "processing order");

            let delivery = match self.harvester.harvest(browser, order_id).await {
                Ok(Some(result)) => match self.process_delivery(result, &dest_dir).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(order_id = %order_id, error = %e, "failed to process delivery");
                        DeliveryReport::HarvestFailed {
                            message: e.to_string(),
                        }
                    }
                },
                Ok(None) => {
                    warn!(order_id = %order_id, "no result delivered, moving on");
                    DeliveryReport::NoDelivery
                }
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "harvest failed, moving on");
                    DeliveryReport::HarvestFailed {
                        message: e.to_string(),
                    }
                }
            };

            if let Err(e) = return_to_main_window(browser, &main).await {
                warn!(error = %e, "could not return to main window");
            }

            summary.push(OrderReport {
                order_id: order_id.clone(),
                delivery,
            });
        }

        info!(
            orders = summary.orders.len(),
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "run complete"
        );
        Ok(summary)
    }

    /// Extract links from a delivery and download them into `dest_dir`
    ///
    /// A delivered file is deleted once its text has been read, before any
    /// download starts.
    ///
    /// # Errors
    /// [`crate::Error::Io`] if a delivered file cannot be removed.
    pub async fn process_delivery(
        &self,
        result: HarvestResult,
        dest_dir: &Path,
    ) -> Result<DeliveryReport> {
        let links = match result {
            HarvestResult::FileDelivery(file) => {
                info!(path = %file.path().display(), "extracting links from delivered file");
                let links = extract(file.content());
                file.discard().await?;
                links
            }
            HarvestResult::PageDelivery { text, url, .. } => {
                info!(url = %url, "extracting links from result page");
                extract(&text)
            }
        };

        if links.is_empty() {
            warn!("delivery contains no HDF links");
            return Ok(DeliveryReport::NoContentFound);
        }

        info!(http = links.http.len(), ftp = links.ftp.len(), "links extracted");
        let report = self.coordinator.run_links(&links, dest_dir).await;
        Ok(DeliveryReport::Downloaded(report))
    }
}

impl std::fmt::Debug for OrderRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderRunner")
            .field("download_dir", &self.config.download.download_dir)
            .field("gate", &self.gate)
            .finish()
    }
}

/// Close every window except `main` and focus `main` again
pub async fn return_to_main_window<B>(browser: &mut B, main: &WindowHandle) -> Result<()>
where
    B: BrowserSession + ?Sized,
{
    let handles = browser.current_window_handles().await?;
    for handle in handles.iter().filter(|h| *h != main) {
        browser.switch_to_window(handle).await?;
        browser.close_active_window().await?;
        info!(%handle, "closed extra window");
    }
    if browser.active_window().await.ok().as_ref() != Some(main) {
        browser.switch_to_window(main).await?;
    }
    Ok(())
}
