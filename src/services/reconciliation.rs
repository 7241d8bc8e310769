//! Reconciliation sweep: the safety net for payments whose asynchronous
//! confirmation never arrived. Runs on a fixed interval as an independent
//! writer over the same order/payment/inventory rows the webhook mutates;
//! correctness comes from the shared guarded transitions, not from any
//! in-process lock. Each payment is resolved independently, so the task can
//! be stopped between ticks without leaving anything half-transitioned.

use chrono::{Duration, Utc};
use futures::{stream, StreamExt};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::{
    config::AppConfig,
    db::DbPool,
    entities::order::{OrderStatus, PaymentMode, PaymentStatus},
    entities::payment::{self, Entity as PaymentEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayPaymentStatus, PaymentGateway},
    services::orders::{CancelOutcome, OrderService, SettlementOutcome},
};

#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// Payments younger than this are left alone; must exceed the webhook's
    /// worst-case latency so the sweep never races a slow-but-legitimate
    /// confirmation.
    pub grace_secs: i64,
    /// An uncaptured payment older than this is treated as abandoned
    pub abandon_secs: i64,
    pub batch_size: u64,
    pub concurrency: usize,
    /// Consecutive gateway failures before parking a payment for review
    pub failure_threshold: i32,
}

impl SweepConfig {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            interval_secs: cfg.sweep_interval_secs,
            grace_secs: cfg.sweep_grace_secs,
            abandon_secs: cfg.sweep_abandon_secs,
            batch_size: cfg.sweep_batch_size,
            concurrency: cfg.sweep_concurrency.max(1),
            failure_threshold: cfg.sweep_failure_threshold,
        }
    }
}

/// Per-tick accounting, surfaced in logs and asserted on by tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub settled: usize,
    pub cancelled: usize,
    pub refunded: usize,
    pub deferred: usize,
    pub flagged: usize,
    pub errors: usize,
}

enum Resolution {
    Settled,
    Cancelled,
    Refunded,
    Deferred,
    Flagged,
    Errored,
    NoOp,
}

#[derive(Clone)]
pub struct ReconciliationSweeper {
    db: Arc<DbPool>,
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    config: SweepConfig,
}

impl ReconciliationSweeper {
    pub fn new(
        db: Arc<DbPool>,
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: SweepConfig,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
            event_sender,
            config,
        }
    }

    /// Runs ticks until the shutdown channel flips. A failing tick is logged
    /// and retried on the next interval; the loop itself never dies.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval_secs,
            grace_secs = self.config.grace_secs,
            "reconciliation sweeper started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(stats) if stats.scanned > 0 => {
                            info!(?stats, "reconciliation tick complete");
                        }
                        Ok(_) => {}
                        Err(err) => {
                            error!(error = %err, "reconciliation tick failed");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciliation sweeper stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One sweep over stuck payments: ONLINE, still PENDING/PROCESSING, not
    /// parked for review, older than the grace window. COD orders are never
    /// selected; manual settlement owns those.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<SweepStats, ServiceError> {
        let cutoff = Utc::now() - Duration::seconds(self.config.grace_secs);

        let stuck = PaymentEntity::find()
            .filter(payment::Column::PaymentMode.eq(PaymentMode::Online))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .filter(payment::Column::OrderStatus.eq(OrderStatus::Processing))
            .filter(payment::Column::NeedsReview.eq(false))
            .filter(payment::Column::CreatedAt.lt(cutoff))
            .order_by_asc(payment::Column::CreatedAt)
            .limit(self.config.batch_size)
            .all(&*self.db)
            .await?;

        let mut stats = SweepStats {
            scanned: stuck.len(),
            ..Default::default()
        };

        let resolutions: Vec<Resolution> = stream::iter(stuck)
            .map(|row| async move { self.reconcile_payment(row).await })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for resolution in resolutions {
            match resolution {
                Resolution::Settled => stats.settled += 1,
                Resolution::Cancelled => stats.cancelled += 1,
                Resolution::Refunded => stats.refunded += 1,
                Resolution::Deferred => stats.deferred += 1,
                Resolution::Flagged => stats.flagged += 1,
                Resolution::Errored => stats.errors += 1,
                Resolution::NoOp => {}
            }
        }

        Ok(stats)
    }

    async fn reconcile_payment(&self, row: payment::Model) -> Resolution {
        // A payment with no gateway reference never got its link: nothing to
        // query, nothing captured. Expire it directly.
        let Some(link_id) = row.gateway_link_id.clone() else {
            return self
                .cancel(&row, "abandoned before a payment link was issued")
                .await;
        };

        match self.gateway.fetch_payment(&link_id).await {
            Ok(ground_truth) => {
                if row.sweep_failures > 0 {
                    let _ = self.reset_failures(&row).await;
                }
                match ground_truth.status {
                    GatewayPaymentStatus::Captured => {
                        // The webhook was lost; perform the identical guarded
                        // settlement it would have performed.
                        match self
                            .orders
                            .settle_captured(row.order_id, ground_truth.payment_id.clone())
                            .await
                        {
                            Ok(SettlementOutcome::Settled) => Resolution::Settled,
                            Ok(SettlementOutcome::AlreadyPaid) => Resolution::NoOp,
                            Ok(SettlementOutcome::Superseded) => {
                                // A previous tick cancelled this order and the
                                // shopper paid afterwards; send the money back.
                                match self
                                    .orders
                                    .refund_after_cancellation(row.order_id, ground_truth.payment_id)
                                    .await
                                {
                                    Ok(_) => Resolution::Refunded,
                                    Err(err) => {
                                        error!(order_id = %row.order_id, error = %err, "refund compensation failed");
                                        Resolution::Errored
                                    }
                                }
                            }
                            Err(err) => {
                                error!(order_id = %row.order_id, error = %err, "settlement from sweep failed");
                                Resolution::Errored
                            }
                        }
                    }
                    GatewayPaymentStatus::Failed => {
                        self.cancel(&row, "gateway reports the payment failed").await
                    }
                    GatewayPaymentStatus::Pending => {
                        let abandoned_before =
                            Utc::now() - Duration::seconds(self.config.abandon_secs);
                        if row.created_at < abandoned_before {
                            self.cancel(&row, "checkout abandoned").await
                        } else {
                            Resolution::Deferred
                        }
                    }
                }
            }
            Err(err) => {
                // Transient gateway trouble: count it and retry next tick.
                // The payment is never dropped silently: past the threshold
                // it goes to a human instead of being auto-cancelled.
                warn!(
                    payment_id = %row.id,
                    order_id = %row.order_id,
                    failures = row.sweep_failures + 1,
                    error = %err,
                    "gateway query failed during sweep"
                );
                self.record_failure(&row).await
            }
        }
    }

    async fn cancel(&self, row: &payment::Model, reason: &str) -> Resolution {
        match self.orders.cancel_unpaid(row.order_id, reason).await {
            Ok(CancelOutcome::Cancelled) => Resolution::Cancelled,
            Ok(CancelOutcome::AlreadyResolved) => Resolution::NoOp,
            Err(err) => {
                error!(order_id = %row.order_id, error = %err, "cancellation from sweep failed");
                Resolution::Errored
            }
        }
    }

    async fn record_failure(&self, row: &payment::Model) -> Resolution {
        let failures = row.sweep_failures + 1;
        let park = failures >= self.config.failure_threshold;

        let update = PaymentEntity::update_many()
            .col_expr(payment::Column::SweepFailures, Expr::value(failures))
            .col_expr(payment::Column::NeedsReview, Expr::value(park))
            .filter(payment::Column::Id.eq(row.id))
            .filter(payment::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await;

        if let Err(err) = update {
            error!(payment_id = %row.id, error = %err, "failed to record sweep failure");
            return Resolution::Errored;
        }

        if park {
            let _ = self
                .event_sender
                .send(Event::PaymentFlaggedForReview {
                    payment_id: row.id,
                    order_id: row.order_id,
                    consecutive_failures: failures,
                })
                .await;
            Resolution::Flagged
        } else {
            Resolution::Errored
        }
    }

    async fn reset_failures(&self, row: &payment::Model) -> Result<(), ServiceError> {
        PaymentEntity::update_many()
            .col_expr(payment::Column::SweepFailures, Expr::value(0))
            .filter(payment::Column::Id.eq(row.id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
