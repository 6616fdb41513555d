//! Replenishment suggestions over the stock-level read model.
//!
//! Read-only: nothing here writes, so concurrent calls are safe. The same
//! ledger state and the same `as_of` day always yield the same page.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use stockflow_core::{RequestContext, TenantId};
use stockflow_inventory::StockItemId;
use stockflow_replenishment::{
    PageRequest, PagedResult, ReplenishmentCandidate, ReplenishmentEngine, ReplenishmentItem,
    ReplenishmentPolicy,
};

use crate::collaborators::ProductCatalog;
use crate::error::ServiceError;
use crate::projections::ReadModels;

/// Data-access boundary: filtered, ordered and paginated candidates.
pub trait ReplenishmentRepository: Send + Sync {
    /// Stock items of the tenant matching `search` (case-insensitive, name or
    /// SKU) with `current_stock <= reorder_point + slack_band`.
    ///
    /// Ordered by product name, then SKU, then ids; `total` counts the whole
    /// filtered set. Observed consumption covers the window ending on `as_of`.
    fn candidates(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        search: Option<&str>,
        policy: &ReplenishmentPolicy,
        page: PageRequest,
    ) -> Result<PagedResult<ReplenishmentCandidate>, ServiceError>;
}

/// Repository joining the stock-level read model with the catalog.
pub struct ReadModelReplenishmentRepository {
    read_models: Arc<ReadModels>,
    catalog: Arc<dyn ProductCatalog>,
    consumption_window_days: u32,
}

impl ReadModelReplenishmentRepository {
    pub fn new(
        read_models: Arc<ReadModels>,
        catalog: Arc<dyn ProductCatalog>,
        consumption_window_days: u32,
    ) -> Self {
        Self {
            read_models,
            catalog,
            consumption_window_days,
        }
    }

    fn observed_daily_consumption(
        &self,
        tenant_id: TenantId,
        candidate: &ReplenishmentCandidate,
        as_of: NaiveDate,
    ) -> Option<Decimal> {
        if self.consumption_window_days == 0 {
            return None;
        }
        let item_id =
            StockItemId::for_location(tenant_id, candidate.product_id, candidate.warehouse_id);
        let shipped = self.read_models.outbound_history.shipped_in_window(
            tenant_id,
            &item_id,
            as_of,
            self.consumption_window_days,
        );
        if shipped <= 0 {
            return None;
        }
        Decimal::from(shipped).checked_div(Decimal::from(self.consumption_window_days))
    }
}

impl ReplenishmentRepository for ReadModelReplenishmentRepository {
    fn candidates(
        &self,
        tenant_id: TenantId,
        as_of: NaiveDate,
        search: Option<&str>,
        policy: &ReplenishmentPolicy,
        page: PageRequest,
    ) -> Result<PagedResult<ReplenishmentCandidate>, ServiceError> {
        let needle = search.unwrap_or("");

        let mut rows: Vec<ReplenishmentCandidate> = self
            .read_models
            .stock_levels
            .list(tenant_id)
            .into_iter()
            .filter_map(|level| {
                let product = self.catalog.product(tenant_id, level.product_id)?;
                if !product.matches_search(needle)
                    || !policy.is_candidate(level.quantity, product.reorder_policy.reorder_point)
                {
                    return None;
                }
                Some(ReplenishmentCandidate {
                    product_id: level.product_id,
                    warehouse_id: level.warehouse_id,
                    sku: product.sku,
                    name: product.name,
                    current_stock: level.quantity,
                    reorder_policy: product.reorder_policy,
                    observed_daily_consumption: None,
                    last_received_price: None,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.sku.cmp(&b.sku))
                .then_with(|| a.product_id.cmp(&b.product_id))
                .then_with(|| a.warehouse_id.cmp(&b.warehouse_id))
        });

        // History lookups only for the page actually returned.
        Ok(PagedResult::from_ordered(rows, page).map(|mut c| {
            c.observed_daily_consumption = self.observed_daily_consumption(tenant_id, &c, as_of);
            c.last_received_price = self
                .read_models
                .purchase_prices
                .latest(tenant_id, &c.product_id)
                .map(|p| p.unit_price);
            c
        }))
    }
}

pub struct ReplenishmentService {
    repository: Arc<dyn ReplenishmentRepository>,
    engine: ReplenishmentEngine,
    default_page_size: u32,
    max_page_size: u32,
}

impl ReplenishmentService {
    pub fn new(
        repository: Arc<dyn ReplenishmentRepository>,
        engine: ReplenishmentEngine,
        default_page_size: u32,
        max_page_size: u32,
    ) -> Self {
        Self {
            repository,
            engine,
            default_page_size,
            max_page_size,
        }
    }

    /// One page of replenishment suggestions as of the current UTC day.
    ///
    /// `page` is 1-based; missing or out-of-range paging values are clamped.
    /// Results only change with the ledger or when the UTC day rolls over.
    pub fn suggest(
        &self,
        ctx: &RequestContext,
        page: Option<u32>,
        page_size: Option<u32>,
        search: Option<&str>,
    ) -> Result<PagedResult<ReplenishmentItem>, ServiceError> {
        self.suggest_as_of(ctx, Utc::now().date_naive(), page, page_size, search)
    }

    /// Same as [`Self::suggest`], with observed consumption measured over the
    /// window ending on `as_of`.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub fn suggest_as_of(
        &self,
        ctx: &RequestContext,
        as_of: NaiveDate,
        page: Option<u32>,
        page_size: Option<u32>,
        search: Option<&str>,
    ) -> Result<PagedResult<ReplenishmentItem>, ServiceError> {
        let request = PageRequest::new(
            page,
            Some(page_size.unwrap_or(self.default_page_size)),
            self.max_page_size,
        );
        let policy = self.engine.policy();

        let candidates = self
            .repository
            .candidates(ctx.tenant_id(), as_of, search, &policy, request)?;
        let result = candidates.map(|c| self.engine.evaluate(&c));

        debug!(
            total = result.total,
            returned = result.items.len(),
            "replenishment suggestions computed"
        );
        Ok(result)
    }
}
