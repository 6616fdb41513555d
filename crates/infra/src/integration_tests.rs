//! Integration tests for the full pipeline.
//!
//! Service → UnitOfWork → EventStore → read models → EventBus → side effects
//!
//! Verifies:
//! - Stock never goes negative, under concurrency too
//! - Order and purchase-order transitions move stock atomically
//! - Post-commit failures never undo the ledger

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::thread;

    use anyhow::Context;
    use chrono::{Days, Utc};
    use rust_decimal::Decimal;

    use stockflow_core::{ProductId, RequestContext, SupplierId, TenantId, UserId, WarehouseId};
    use stockflow_inventory::{
        Criticality, MovementType, ProductRecord, ReorderPolicy, StockItemId, WarehouseRecord,
    };
    use stockflow_purchasing::{PurchaseLine, PurchaseOrderStatus};
    use stockflow_sales::OrderStatus;

    use crate::bootstrap::{SharedStore, StockflowServices};
    use crate::config::StockflowConfig;
    use crate::error::ServiceError;
    use crate::event_store::InMemoryEventStore;
    use crate::services::{MovementRequest, NewOrder, NewOrderLine, NewPurchaseOrder};

    struct Fixture {
        store: SharedStore,
        services: StockflowServices,
        ctx: RequestContext,
        warehouse_id: WarehouseId,
        // Catalog rows, replayed into the catalog of a restarted instance.
        products: Mutex<Vec<ProductRecord>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::over(
                Arc::new(InMemoryEventStore::new()),
                RequestContext::new(TenantId::new(), UserId::new()),
                WarehouseId::new(),
                Vec::new(),
            )
        }

        fn over(
            store: SharedStore,
            ctx: RequestContext,
            warehouse_id: WarehouseId,
            products: Vec<ProductRecord>,
        ) -> Self {
            let services = StockflowServices::with_store(StockflowConfig::default(), store.clone())
                .expect("services start over the store");
            services.catalog.upsert_warehouse(
                ctx.tenant_id(),
                WarehouseRecord {
                    warehouse_id,
                    name: "Main".to_string(),
                    is_default: true,
                },
            );
            for product in &products {
                services.catalog.upsert_product(ctx.tenant_id(), product.clone());
            }
            Self {
                store,
                services,
                ctx,
                warehouse_id,
                products: Mutex::new(products),
            }
        }

        /// A second instance over the same store, catalog and tenant.
        fn restart(&self) -> Self {
            let products = self.products.lock().unwrap().clone();
            Self::over(self.store.clone(), self.ctx, self.warehouse_id, products)
        }

        fn product(&self, sku: &str, price: u64, reorder_policy: ReorderPolicy) -> ProductId {
            let product = ProductRecord {
                product_id: ProductId::new(),
                sku: sku.to_string(),
                name: format!("Product {sku}"),
                price,
                reorder_policy,
            };
            self.services.catalog.upsert_product(self.ctx.tenant_id(), product.clone());
            self.products.lock().unwrap().push(product.clone());
            product.product_id
        }

        fn place(&self, product_id: ProductId, quantity: i64) -> String {
            self.services
                .orders
                .place_order(
                    &self.ctx,
                    NewOrder {
                        customer_name: "Acme".to_string(),
                        warehouse_id: None,
                        lines: vec![NewOrderLine {
                            product_id,
                            quantity,
                        }],
                    },
                )
                .unwrap()
                .order_number
        }

        fn request(
            &self,
            product_id: ProductId,
            movement_type: MovementType,
            quantity: i64,
        ) -> MovementRequest {
            MovementRequest {
                product_id,
                warehouse_id: self.warehouse_id,
                movement_type,
                quantity,
                reference: String::new(),
            }
        }

        fn record(
            &self,
            product_id: ProductId,
            movement_type: MovementType,
            quantity: i64,
        ) -> Result<i64, ServiceError> {
            self.services
                .movements
                .record_movement(&self.ctx, self.request(product_id, movement_type, quantity))
                .map(|m| m.resulting_quantity)
        }

        fn stock(&self, product_id: ProductId) -> i64 {
            self.services
                .movements
                .stock_level(&self.ctx, product_id, self.warehouse_id)
                .unwrap()
        }

        fn projected_stock(&self, product_id: ProductId) -> Option<i64> {
            let item_id =
                StockItemId::for_location(self.ctx.tenant_id(), product_id, self.warehouse_id);
            self.services
                .read_models
                .stock_levels
                .get(self.ctx.tenant_id(), &item_id)
                .map(|level| level.quantity)
        }

        fn movement_types(&self, product_id: ProductId) -> Vec<(MovementType, i64, String)> {
            self.services
                .movements
                .movements(&self.ctx, product_id, self.warehouse_id)
                .unwrap()
                .into_iter()
                .map(|m| (m.movement_type, m.quantity, m.reference))
                .collect()
        }
    }

    #[test]
    fn outbound_beyond_balance_is_rejected_with_available_quantity() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 500, ReorderPolicy::default());

        assert_eq!(fx.record(widget, MovementType::Inbound, 100).unwrap(), 100);
        assert_eq!(fx.record(widget, MovementType::Outbound, 30).unwrap(), 70);

        let err = fx.record(widget, MovementType::Outbound, 1000).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientStock {
                available: 70,
                requested: 1000
            }
        ));
        assert_eq!(err.user_message(), "insufficient stock: requested 1000, only 70 available");

        assert_eq!(fx.stock(widget), 70);
        assert_eq!(fx.projected_stock(widget), Some(70));
        assert_eq!(fx.movement_types(widget).len(), 2);
    }

    #[test]
    fn adjust_overwrites_balance_and_records_delta() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 500, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 40).unwrap();

        let movement = fx
            .services
            .movements
            .record_movement(&fx.ctx, fx.request(widget, MovementType::Adjust, 25))
            .unwrap();

        assert_eq!(movement.delta, -15);
        assert_eq!(movement.resulting_quantity, 25);
        assert_eq!(fx.projected_stock(widget), Some(25));
    }

    #[test]
    fn unknown_product_or_warehouse_is_not_found() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 500, ReorderPolicy::default());

        let err = fx.record(ProductId::new(), MovementType::Inbound, 1).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref what) if what == "product"));

        let mut request = fx.request(widget, MovementType::Inbound, 1);
        request.warehouse_id = WarehouseId::new();
        let err = fx.services.movements.record_movement(&fx.ctx, request).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(ref what) if what == "warehouse"));
    }

    #[test]
    fn failed_line_leaves_order_pending_and_ledger_untouched() {
        let fx = Fixture::new();
        let products: Vec<ProductId> = (0..5)
            .map(|i| fx.product(&format!("P-{i}"), 100, ReorderPolicy::default()))
            .collect();
        for (i, product_id) in products.iter().enumerate() {
            let on_hand = if i == 2 { 1 } else { 10 };
            fx.record(*product_id, MovementType::Inbound, on_hand).unwrap();
        }

        let order = fx
            .services
            .orders
            .place_order(
                &fx.ctx,
                NewOrder {
                    customer_name: "Acme".to_string(),
                    warehouse_id: None,
                    lines: products
                        .iter()
                        .map(|p| NewOrderLine {
                            product_id: *p,
                            quantity: 5,
                        })
                        .collect(),
                },
            )
            .unwrap();
        assert_eq!(order.total, 2_500);

        let err = fx
            .services
            .orders
            .change_status(&fx.ctx, order.order_id, OrderStatus::Paid)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientStock {
                available: 1,
                requested: 5
            }
        ));

        let reloaded = fx.services.orders.get_order(&fx.ctx, order.order_id).unwrap();
        assert_eq!(reloaded.status, OrderStatus::Pending);
        assert!(reloaded.debits.is_empty());
        for (i, product_id) in products.iter().enumerate() {
            assert_eq!(fx.movement_types(*product_id).len(), 1);
            assert_eq!(fx.stock(*product_id), if i == 2 { 1 } else { 10 });
        }
    }

    #[test]
    fn cancelling_a_paid_order_restores_exactly_what_was_debited() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 250, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 50).unwrap();

        let order = fx
            .services
            .orders
            .place_order(
                &fx.ctx,
                NewOrder {
                    customer_name: "Acme".to_string(),
                    warehouse_id: Some(fx.warehouse_id),
                    lines: vec![NewOrderLine {
                        product_id: widget,
                        quantity: 10,
                    }],
                },
            )
            .unwrap();

        let paid = fx
            .services
            .orders
            .change_status(&fx.ctx, order.order_id, OrderStatus::Paid)
            .unwrap();
        assert_eq!(paid.debits.len(), 1);
        assert_eq!(fx.stock(widget), 40);

        let cancelled = fx
            .services
            .orders
            .change_status(&fx.ctx, order.order_id, OrderStatus::Cancelled)
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(fx.stock(widget), 50);
        assert_eq!(fx.projected_stock(widget), Some(50));

        let number = order.order_number.clone();
        assert_eq!(
            fx.movement_types(widget),
            vec![
                (MovementType::Inbound, 50, String::new()),
                (MovementType::Outbound, 10, number.clone()),
                (MovementType::Inbound, 10, format!("CANCEL-{number}")),
            ]
        );
    }

    #[test]
    fn transitions_without_stock_effect_write_no_movements() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 250, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 20).unwrap();

        let place = |qty| {
            fx.services
                .orders
                .place_order(
                    &fx.ctx,
                    NewOrder {
                        customer_name: "Acme".to_string(),
                        warehouse_id: None,
                        lines: vec![NewOrderLine {
                            product_id: widget,
                            quantity: qty,
                        }],
                    },
                )
                .unwrap()
        };

        let abandoned = place(3);
        fx.services
            .orders
            .change_status(&fx.ctx, abandoned.order_id, OrderStatus::Cancelled)
            .unwrap();
        assert_eq!(fx.stock(widget), 20);

        let shipped = place(4);
        fx.services
            .orders
            .change_status(&fx.ctx, shipped.order_id, OrderStatus::Paid)
            .unwrap();
        fx.services
            .orders
            .change_status(&fx.ctx, shipped.order_id, OrderStatus::Shipped)
            .unwrap();
        assert_eq!(fx.stock(widget), 16);
        assert_eq!(fx.movement_types(widget).len(), 2);

        let err = fx
            .services
            .orders
            .change_status(&fx.ctx, shipped.order_id, OrderStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(fx.stock(widget), 16);
    }

    #[test]
    fn order_numbers_are_sequential_per_tenant() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 100, ReorderPolicy::default());
        let new_order = || NewOrder {
            customer_name: "Acme".to_string(),
            warehouse_id: None,
            lines: vec![NewOrderLine {
                product_id: widget,
                quantity: 1,
            }],
        };

        let first = fx.services.orders.place_order(&fx.ctx, new_order()).unwrap();
        let second = fx.services.orders.place_order(&fx.ctx, new_order()).unwrap();

        assert_eq!(first.order_number, "ORD-000001");
        assert_eq!(second.order_number, "ORD-000002");
    }

    #[test]
    fn receiving_a_purchase_order_twice_moves_stock_once() {
        let fx = Fixture::new();
        let bolts = fx.product("B-1", 30, ReorderPolicy::default());
        let nuts = fx.product("N-1", 10, ReorderPolicy::default());

        let po = fx
            .services
            .purchasing
            .create_purchase_order(
                &fx.ctx,
                NewPurchaseOrder {
                    supplier_id: SupplierId::new(),
                    warehouse_id: fx.warehouse_id,
                    lines: vec![PurchaseLine {
                        product_id: bolts,
                        quantity: 20,
                        unit_price: 150,
                    }],
                },
            )
            .unwrap();
        fx.services
            .purchasing
            .add_line(
                &fx.ctx,
                po.purchase_order_id,
                PurchaseLine {
                    product_id: nuts,
                    quantity: 40,
                    unit_price: 5,
                },
            )
            .unwrap();

        for status in [PurchaseOrderStatus::Pending, PurchaseOrderStatus::Approved] {
            fx.services
                .purchasing
                .change_status(&fx.ctx, po.purchase_order_id, status)
                .unwrap();
        }
        let received = fx
            .services
            .purchasing
            .change_status(&fx.ctx, po.purchase_order_id, PurchaseOrderStatus::Received)
            .unwrap();
        let again = fx
            .services
            .purchasing
            .change_status(&fx.ctx, po.purchase_order_id, PurchaseOrderStatus::Received)
            .unwrap();

        assert_eq!(received, again);
        assert_eq!(received.receipts.len(), 2);
        assert_eq!(fx.stock(bolts), 20);
        assert_eq!(fx.stock(nuts), 40);
        assert_eq!(
            fx.movement_types(bolts),
            vec![(MovementType::Inbound, 20, po.number.clone())]
        );

        let price = fx
            .services
            .read_models
            .purchase_prices
            .latest(fx.ctx.tenant_id(), &bolts)
            .unwrap();
        assert_eq!(price.unit_price, 150);
    }

    #[test]
    fn replenishment_suggestion_is_deterministic() {
        let fx = Fixture::new();
        let low = fx.product(
            "L-1",
            100,
            ReorderPolicy {
                reorder_point: 30,
                daily_consumption: Decimal::from(2),
                lead_time_days: 7,
                criticality: Criticality::High,
                last_purchase_price: 80,
            },
        );
        let plenty = fx.product(
            "H-1",
            100,
            ReorderPolicy {
                reorder_point: 30,
                ..ReorderPolicy::default()
            },
        );
        fx.record(low, MovementType::Inbound, 5).unwrap();
        fx.record(plenty, MovementType::Inbound, 500).unwrap();

        let first = fx.services.replenishment.suggest(&fx.ctx, None, None, None).unwrap();
        let second = fx.services.replenishment.suggest(&fx.ctx, None, None, None).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total, 1);
        let item = &first.items[0];
        assert_eq!(item.product_id, low);
        assert!(item.is_critical);
        assert_eq!(item.suggested_qty, 39);
        assert_eq!(item.estimated_cost, 39 * 80);

        let filtered = fx
            .services
            .replenishment
            .suggest(&fx.ctx, None, None, Some("h-1"))
            .unwrap();
        assert_eq!(filtered.total, 0);
    }

    #[test]
    fn concurrent_outbounds_never_drive_stock_negative() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 100, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 50).unwrap();

        let outcomes: Vec<Result<i64, ServiceError>> = thread::scope(|scope| {
            let workers: Vec<_> = (0..10)
                .map(|_| {
                    scope.spawn(|| loop {
                        match fx.record(widget, MovementType::Outbound, 7) {
                            Err(err) if err.is_concurrency() => continue,
                            outcome => break outcome,
                        }
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        assert_eq!(succeeded, 7);
        assert!(outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .all(|e| matches!(e, ServiceError::InsufficientStock { .. })));
        assert_eq!(fx.stock(widget), 1);
        assert_eq!(fx.projected_stock(widget), Some(1));
    }

    #[test]
    fn failing_audit_log_does_not_undo_the_movement() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 100, ReorderPolicy::default());
        let worker = fx.services.spawn_side_effect_worker().unwrap();
        fx.services.audit.set_failing(true);

        assert_eq!(fx.record(widget, MovementType::Inbound, 12).unwrap(), 12);
        worker.shutdown();

        assert_eq!(fx.stock(widget), 12);
        assert!(fx.services.audit.entries(fx.ctx.tenant_id()).is_empty());
        assert_eq!(fx.services.notifier.sent(fx.ctx.tenant_id()).len(), 1);
    }

    #[test]
    fn rebuild_reproduces_live_read_models() -> anyhow::Result<()> {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 100, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 30)?;
        fx.record(widget, MovementType::Outbound, 4)?;
        let live = fx.services.read_models.stock_levels.list(fx.ctx.tenant_id());

        let replayed = fx
            .services
            .rebuild_read_models(fx.ctx.tenant_id())
            .context("rebuilding the active tenant")?;

        assert_eq!(replayed, 2);
        assert_eq!(fx.services.read_models.stock_levels.list(fx.ctx.tenant_id()), live);
        assert_eq!(fx.services.rebuild_read_models(TenantId::new())?, 0);
        Ok(())
    }

    #[test]
    fn tenants_do_not_see_each_other() {
        let fx = Fixture::new();
        let widget = fx.product("W-1", 100, ReorderPolicy::default());
        fx.record(widget, MovementType::Inbound, 9).unwrap();

        let other = RequestContext::new(TenantId::new(), UserId::new());
        assert_eq!(
            fx.services
                .movements
                .stock_level(&other, widget, fx.warehouse_id)
                .unwrap(),
            0
        );
        assert!(fx.services.read_models.stock_levels.list(other.tenant_id()).is_empty());

        let err = fx
            .services
            .movements
            .record_movement(&other, fx.request(widget, MovementType::Inbound, 1))
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn order_numbers_continue_across_instances_sharing_a_store() {
        let first = Fixture::new();
        let widget = first.product("W-1", 100, ReorderPolicy::default());
        let second = first.restart();

        assert_eq!(first.place(widget, 1), "ORD-000001");
        assert_eq!(second.place(widget, 1), "ORD-000002");
        assert_eq!(first.place(widget, 1), "ORD-000003");

        let third = second.restart();
        assert_eq!(third.place(widget, 1), "ORD-000004");

        let po = third
            .services
            .purchasing
            .create_purchase_order(
                &third.ctx,
                NewPurchaseOrder {
                    supplier_id: SupplierId::new(),
                    warehouse_id: third.warehouse_id,
                    lines: vec![],
                },
            )
            .unwrap();
        assert_eq!(po.number, "PO-000001");
    }

    #[test]
    fn restarted_services_restore_read_models_from_the_store() {
        let before = Fixture::new();
        let low = before.product(
            "L-1",
            100,
            ReorderPolicy {
                reorder_point: 30,
                daily_consumption: Decimal::from(2),
                lead_time_days: 7,
                criticality: Criticality::High,
                last_purchase_price: 80,
            },
        );
        before.record(low, MovementType::Inbound, 5).unwrap();
        let suggested_before =
            before.services.replenishment.suggest(&before.ctx, None, None, None).unwrap();
        assert_eq!(suggested_before.total, 1);

        let after = before.restart();
        assert_eq!(after.stock(low), 5);
        assert_eq!(after.projected_stock(low), Some(5));

        let suggested_after =
            after.services.replenishment.suggest(&after.ctx, None, None, None).unwrap();
        assert_eq!(suggested_after, suggested_before);
        assert_eq!(suggested_after.items[0].suggested_qty, 39);

        // Live updates continue from the replayed cursor.
        assert_eq!(after.record(low, MovementType::Outbound, 2).unwrap(), 3);
        assert_eq!(after.projected_stock(low), Some(3));
    }

    #[test]
    fn observed_consumption_window_ends_on_the_as_of_day() {
        let fx = Fixture::new();
        let unplanned = fx.product(
            "U-1",
            100,
            ReorderPolicy {
                reorder_point: 30,
                daily_consumption: Decimal::ZERO,
                lead_time_days: 10,
                ..ReorderPolicy::default()
            },
        );
        fx.record(unplanned, MovementType::Inbound, 100).unwrap();
        fx.record(unplanned, MovementType::Outbound, 80).unwrap();

        let replenishment = &fx.services.replenishment;
        let today = Utc::now().date_naive();
        let now = replenishment.suggest_as_of(&fx.ctx, today, None, None, None).unwrap();
        let again = replenishment.suggest_as_of(&fx.ctx, today, None, None, None).unwrap();
        assert_eq!(now, again);
        assert_eq!(now.items[0].daily_consumption, Decimal::from(80) / Decimal::from(30));

        let later = today.checked_add_days(Days::new(40)).unwrap();
        let stale = replenishment.suggest_as_of(&fx.ctx, later, None, None, None).unwrap();
        assert_eq!(stale.items[0].daily_consumption, Decimal::ZERO);
        assert!(stale.items[0].suggested_qty < now.items[0].suggested_qty);
    }
}
