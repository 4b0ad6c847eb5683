//! Startup and shutdown ordering (§4.10), plus the two periodic
//! background tasks driven off the delayed scheduler: routing-table GC
//! (§9 Open Question) and the routed-message summary log (§6
//! `routedMessagePrintIntervalS`).

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use fabric_core::scheduler::{DelayedScheduler, Runnable};

use crate::dispatcher::Dispatcher;

/// A component participating in ordered shutdown (§4.10: "Components
/// expose `shutdown()` with idempotence"). Transports, the capabilities
/// directory client, and transport skeletons are external collaborators
/// (§1 Non-goals) that implement this outside the core.
pub trait Shutdown: Send + Sync {
    fn shutdown(&self);
}

/// Drives the dispatcher's background maintenance and the required
/// shutdown order: dispatcher -> publication/subscription collaborators
/// -> directory client -> local-capabilities -> transport skeletons.
pub struct Lifecycle {
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<DelayedScheduler>,
    downstream: Vec<Arc<dyn Shutdown>>,
    gc_interval: Duration,
    print_interval: Duration,
}

impl Lifecycle {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        scheduler: Arc<DelayedScheduler>,
        downstream: Vec<Arc<dyn Shutdown>>,
        gc_interval: Duration,
        print_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            scheduler,
            downstream,
            gc_interval,
            print_interval,
        }
    }

    /// Schedules the recurring GC and summary-log passes. Each pass
    /// reschedules itself on the delayed scheduler, so no dedicated
    /// background thread is needed.
    pub fn start_background_tasks(&self) {
        self.schedule_gc_pass();
        self.schedule_print_pass();
    }

    fn schedule_gc_pass(&self) {
        let dispatcher = self.dispatcher.clone();
        let scheduler = self.scheduler.clone();
        let interval = self.gc_interval;
        let runnable: Runnable = Box::new(move || {
            let expired = dispatcher.collect_expired_routes();
            if !expired.is_empty() {
                info!(count = expired.len(), "routing-table GC pass removed expired entries");
            }
            reschedule_gc(dispatcher, scheduler, interval);
        });
        self.scheduler.schedule(runnable, self.gc_interval);
    }

    fn schedule_print_pass(&self) {
        let dispatcher = self.dispatcher.clone();
        let scheduler = self.scheduler.clone();
        let interval = self.print_interval;
        let runnable: Runnable = Box::new(move || {
            dispatcher.log_routing_summary();
            reschedule_print(dispatcher, scheduler, interval);
        });
        self.scheduler.schedule(runnable, self.print_interval);
    }

    /// `shutdown()` of §4.10. Idempotent: marks the dispatcher as
    /// shutting down (rejecting new `route` calls), cancels the delayed
    /// scheduler, then shuts down downstream collaborators in the
    /// required order.
    pub fn shutdown(&self) {
        self.dispatcher.begin_shutdown();
        self.scheduler.shutdown();
        for component in &self.downstream {
            component.shutdown();
        }
    }
}

fn reschedule_gc(dispatcher: Arc<Dispatcher>, scheduler: Arc<DelayedScheduler>, interval: Duration) {
    if dispatcher.is_shutting_down() {
        return;
    }
    let scheduler_clone = scheduler.clone();
    let runnable: Runnable = Box::new(move || {
        let expired = dispatcher.collect_expired_routes();
        if !expired.is_empty() {
            info!(count = expired.len(), "routing-table GC pass removed expired entries");
        }
        reschedule_gc(dispatcher, scheduler_clone, interval);
    });
    scheduler.schedule(runnable, interval);
}

fn reschedule_print(dispatcher: Arc<Dispatcher>, scheduler: Arc<DelayedScheduler>, interval: Duration) {
    if dispatcher.is_shutting_down() {
        return;
    }
    let scheduler_clone = scheduler.clone();
    let runnable: Runnable = Box::new(move || {
        dispatcher.log_routing_summary();
        reschedule_print(dispatcher, scheduler_clone, interval);
    });
    scheduler.schedule(runnable, interval);
}
