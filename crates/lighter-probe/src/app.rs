//! Probe application: initialize, refresh and report nonce slots.

use std::fmt::Write as _;
use std::sync::Arc;

use lighter_client::HttpNonceSource;
use lighter_nonce::{AccountIndex, ApiKeyIndex, DynNonceSource, NonceCoordinator, SlotSnapshot};
use serde::Serialize;
use tracing::info;

use crate::config::ProbeConfig;
use crate::error::ProbeResult;

/// What a single probe run does.
#[derive(Debug, Clone, Default)]
pub struct ProbeOptions {
    /// Refetch every slot even if already populated.
    pub force: bool,
    /// Slots to refetch individually after initialization.
    pub refresh: Vec<ApiKeyIndex>,
}

/// Slot state after a probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub account_index: AccountIndex,
    pub ready: bool,
    pub slots: Vec<SlotSnapshot>,
}

impl ProbeReport {
    /// Render as aligned text, one slot per line.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "account {} ({})",
            self.account_index,
            if self.ready { "ready" } else { "not ready" }
        );
        for slot in &self.slots {
            let next = slot
                .next
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            let _ = writeln!(out, "  api_key_index {:>3}  next {}", slot.api_key_index, next);
        }
        out
    }
}

/// Nonce probe for one account.
pub struct Probe {
    coordinator: NonceCoordinator,
}

impl Probe {
    /// Create a probe talking to the venue configured in `config`.
    pub fn new(config: &ProbeConfig) -> ProbeResult<Self> {
        let source: DynNonceSource = Arc::new(HttpNonceSource::new(&config.base_url)?);
        Self::with_source(config, source)
    }

    /// Create a probe with an explicit nonce source.
    pub fn with_source(config: &ProbeConfig, source: DynNonceSource) -> ProbeResult<Self> {
        config.validate()?;
        let coordinator = NonceCoordinator::new(
            config.account_index,
            config.api_key_indices.iter().copied(),
            source,
        )?;
        Ok(Self { coordinator })
    }

    /// Underlying coordinator.
    pub fn coordinator(&self) -> &NonceCoordinator {
        &self.coordinator
    }

    /// Initialize the coordinator, apply requested refreshes and report.
    ///
    /// Stops at the first failure; nothing is retried.
    pub async fn run(&self, options: &ProbeOptions) -> ProbeResult<ProbeReport> {
        info!(
            account_index = %self.coordinator.account_index(),
            slots = self.coordinator.api_key_indices().len(),
            force = options.force,
            "Initializing nonce slots"
        );
        self.coordinator.initialize(options.force).await?;

        for &api_key_index in &options.refresh {
            info!(%api_key_index, "Refreshing nonce slot");
            self.coordinator.refresh(api_key_index).await?;
        }

        Ok(ProbeReport {
            account_index: self.coordinator.account_index(),
            ready: self.coordinator.is_ready(),
            slots: self.coordinator.snapshot(),
        })
    }
}
