//! Exchange simulator.
//!
//! Consumes `PendingNew`/`PendingCancel` order events from the bus, decides
//! accept/reject, and synthesises fills. Deferred fills run on a single
//! scheduler thread holding a delay queue keyed by wall-clock deadline;
//! instant fills run synchronously on the publishing thread.
//!
//! Per order the simulator publishes `New`, zero or one
//! `PartiallyFilled`, one or two `Fill`s, and exactly one terminal status
//! (`Filled`, `Cancelled` or `Rejected`). Fills always precede the terminal
//! `Filled` on the publishing thread.

use crate::conf::ExchangeConfig;
use crate::connector::ExchangeConnector;
use bus::{EventBus, SubscriptionId};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use types::{
    EventBody, EventKind, FillEvent, OrderEvent, OrderId, OrderStatus, OrderType, Price, Quantity,
    Side, Symbol,
};

struct PendingOrder {
    symbol: Symbol,
    side: Side,
    order_type: OrderType,
    price: Price,
    quantity: Quantity,
    filled: Quantity,
}

#[derive(Clone)]
enum FillPhase {
    Initial,
    Remainder { fill_price: Price, remaining: Quantity },
}

#[derive(Clone)]
struct FillJob {
    order_id: OrderId,
    symbol: Symbol,
    side: Side,
    order_type: OrderType,
    price: Price,
    quantity: Quantity,
    phase: FillPhase,
}

struct ScheduledFill {
    due: Instant,
    seq: u64,
    job: FillJob,
}

impl PartialEq for ScheduledFill {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledFill {}

impl PartialOrd for ScheduledFill {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledFill {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

enum SchedulerMsg {
    Schedule { due: Instant, job: FillJob },
    Shutdown,
}

struct SchedulerHandle {
    tx: Sender<SchedulerMsg>,
    join: JoinHandle<()>,
}

struct ExchangeShared {
    bus: EventBus,
    config: ExchangeConfig,
    running: AtomicBool,
    pending: Mutex<HashMap<OrderId, PendingOrder>>,
    market_prices: Mutex<HashMap<Symbol, Price>>,
    rng: Mutex<StdRng>,
    exec_seq: AtomicU64,
}

/// Exchange simulator for testing and backtesting.
pub struct SimulatedExchange {
    shared: Arc<ExchangeShared>,
    order_sub: Mutex<Option<SubscriptionId>>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl SimulatedExchange {
    pub fn new(bus: EventBus, config: ExchangeConfig) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            shared: Arc::new(ExchangeShared {
                bus,
                config,
                running: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                market_prices: Mutex::new(HashMap::new()),
                rng: Mutex::new(rng),
                exec_seq: AtomicU64::new(0),
            }),
            order_sub: Mutex::new(None),
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.shared.config
    }

    /// Record the last known market price for a symbol; it feeds the
    /// slippage base for market orders.
    pub fn set_market_price(&self, symbol: impl Into<Symbol>, price: Price) {
        self.shared.market_prices.lock().insert(symbol.into(), price);
    }

    pub fn market_price(&self, symbol: &str) -> Option<Price> {
        self.shared.market_prices.lock().get(symbol).copied()
    }

    /// Orders accepted but not yet terminal.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

impl ExchangeConnector for SimulatedExchange {
    fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = unbounded();
        let scheduler_shared = self.shared.clone();
        let join = std::thread::Builder::new()
            .name("exchange-scheduler".to_string())
            .spawn(move || scheduler_loop(scheduler_shared, rx))
            .expect("failed to spawn exchange scheduler");

        let weak: Weak<ExchangeShared> = Arc::downgrade(&self.shared);
        let submit_tx = tx.clone();
        let sub = self.shared.bus.subscribe(EventKind::Order, move |ev| {
            let Some(shared) = weak.upgrade() else { return };
            if let EventBody::Order(order) = ev.body() {
                match order.status {
                    OrderStatus::PendingNew => handle_submit(
                        &shared,
                        &submit_tx,
                        order.order_id.clone(),
                        order.symbol.clone(),
                        order.side,
                        order.order_type,
                        order.price,
                        order.quantity,
                    ),
                    OrderStatus::PendingCancel => handle_cancel(&shared, &order.order_id),
                    _ => {}
                }
            }
        });

        *self.order_sub.lock() = Some(sub);
        *self.scheduler.lock() = Some(SchedulerHandle { tx, join });
        tracing::info!(target: "exchange", config = ?self.shared.config, "simulated exchange started");
    }

    fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(sub) = self.order_sub.lock().take() {
            self.shared.bus.unsubscribe(sub);
        }
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.tx.send(SchedulerMsg::Shutdown);
            let _ = handle.join.join();
        }

        // Orders still pending never reached a terminal state; cancel them
        // so no consumer is left waiting.
        let leftovers: Vec<(OrderId, PendingOrder)> =
            self.shared.pending.lock().drain().collect();
        for (order_id, order) in leftovers {
            tracing::info!(target: "exchange", %order_id, "cancelling in-flight order on stop");
            publish_status(
                &self.shared,
                &order_id,
                &order.symbol,
                order.side,
                order.order_type,
                order.price,
                order.quantity,
                OrderStatus::Cancelled,
                order.filled,
                None,
            );
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn submit_order(
        &self,
        order_id: OrderId,
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
    ) {
        let tx = self.scheduler.lock().as_ref().map(|h| h.tx.clone());
        let Some(tx) = tx else {
            tracing::warn!(target: "exchange", %order_id, "submit ignored: exchange not started");
            return;
        };
        handle_submit(&self.shared, &tx, order_id, symbol, side, order_type, price, quantity);
    }

    fn cancel_order(&self, order_id: &OrderId) {
        handle_cancel(&self.shared, order_id);
    }
}

impl Drop for SimulatedExchange {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduler_loop(shared: Arc<ExchangeShared>, rx: Receiver<SchedulerMsg>) {
    let latency = Duration::from_millis(shared.config.fill_latency_ms);
    let mut heap: BinaryHeap<Reverse<ScheduledFill>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let now = Instant::now();
        while heap.peek().is_some_and(|Reverse(s)| s.due <= now) {
            let Reverse(entry) = heap.pop().expect("peeked");
            if let Some(follow_up) = run_fill_job(&shared, entry.job) {
                seq += 1;
                heap.push(Reverse(ScheduledFill {
                    due: Instant::now() + latency,
                    seq,
                    job: follow_up,
                }));
            }
        }

        let msg = match heap.peek() {
            Some(Reverse(next)) => {
                let wait = next.due.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(msg) => Some(msg),
                Err(_) => return,
            },
        };

        match msg {
            Some(SchedulerMsg::Schedule { due, job }) => {
                seq += 1;
                heap.push(Reverse(ScheduledFill { due, seq, job }));
            }
            Some(SchedulerMsg::Shutdown) => return,
            None => {}
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_submit(
    shared: &Arc<ExchangeShared>,
    tx: &Sender<SchedulerMsg>,
    order_id: OrderId,
    symbol: Symbol,
    side: Side,
    order_type: OrderType,
    price: Price,
    quantity: Quantity,
) {
    if !shared.running.load(Ordering::SeqCst) {
        return;
    }

    if draw(shared, shared.config.rejection_rate) {
        tracing::debug!(target: "exchange", %order_id, "submission rejected");
        publish_status(
            shared,
            &order_id,
            &symbol,
            side,
            order_type,
            price,
            quantity,
            OrderStatus::Rejected,
            Quantity::ZERO,
            Some("rejected by exchange"),
        );
        return;
    }

    publish_status(
        shared,
        &order_id,
        &symbol,
        side,
        order_type,
        price,
        quantity,
        OrderStatus::New,
        Quantity::ZERO,
        None,
    );
    shared.pending.lock().insert(
        order_id.clone(),
        PendingOrder {
            symbol: symbol.clone(),
            side,
            order_type,
            price,
            quantity,
            filled: Quantity::ZERO,
        },
    );

    let job = FillJob {
        order_id,
        symbol,
        side,
        order_type,
        price,
        quantity,
        phase: FillPhase::Initial,
    };
    if shared.config.instant_fills {
        let mut next = run_fill_job(shared, job);
        while let Some(follow_up) = next {
            next = run_fill_job(shared, follow_up);
        }
    } else {
        let due = Instant::now() + Duration::from_millis(shared.config.fill_latency_ms);
        let _ = tx.send(SchedulerMsg::Schedule { due, job });
    }
}

fn handle_cancel(shared: &Arc<ExchangeShared>, order_id: &OrderId) {
    let removed = shared.pending.lock().remove(order_id);
    let Some(order) = removed else {
        tracing::debug!(target: "exchange", %order_id, "cancel ignored: not pending");
        return;
    };
    publish_status(
        shared,
        order_id,
        &order.symbol,
        order.side,
        order.order_type,
        order.price,
        order.quantity,
        OrderStatus::Cancelled,
        order.filled,
        None,
    );
}

/// Execute one fill phase. Returns a follow-up job when a remainder must be
/// scheduled after another latency interval.
fn run_fill_job(shared: &Arc<ExchangeShared>, job: FillJob) -> Option<FillJob> {
    // A delayed fill must re-check liveness: the exchange may have stopped,
    // or the order may have been cancelled while it waited.
    if !shared.running.load(Ordering::SeqCst) {
        return None;
    }
    if !shared.pending.lock().contains_key(&job.order_id) {
        return None;
    }

    match job.phase {
        FillPhase::Initial => {
            let fill_price = match job.order_type {
                OrderType::Market => slippage_price(shared, &job.symbol, job.side, job.price),
                _ => job.price,
            };

            let first_qty = if draw(shared, shared.config.partial_fill_rate) {
                let fraction: f64 = shared.rng.lock().random_range(0.5..0.9);
                let first = (job.quantity.raw() as f64 * fraction).floor() as u64;
                Quantity(first.max(1))
            } else {
                job.quantity
            };

            publish_fill(shared, &job, first_qty, fill_price);

            if first_qty < job.quantity {
                publish_status(
                    shared,
                    &job.order_id,
                    &job.symbol,
                    job.side,
                    job.order_type,
                    job.price,
                    job.quantity,
                    OrderStatus::PartiallyFilled,
                    first_qty,
                    None,
                );
                let remaining = job.quantity - first_qty;
                Some(FillJob {
                    phase: FillPhase::Remainder { fill_price, remaining },
                    ..job
                })
            } else {
                finalize(shared, &job);
                None
            }
        }
        FillPhase::Remainder { fill_price, remaining } => {
            publish_fill(shared, &job, remaining, fill_price);
            finalize(shared, &job);
            None
        }
    }
}

/// Publish the terminal `Filled` status and retire the pending entry.
fn finalize(shared: &Arc<ExchangeShared>, job: &FillJob) {
    publish_status(
        shared,
        &job.order_id,
        &job.symbol,
        job.side,
        job.order_type,
        job.price,
        job.quantity,
        OrderStatus::Filled,
        job.quantity,
        None,
    );
    shared.pending.lock().remove(&job.order_id);
}

fn publish_fill(shared: &Arc<ExchangeShared>, job: &FillJob, quantity: Quantity, price: Price) {
    if let Some(pending) = shared.pending.lock().get_mut(&job.order_id) {
        pending.filled += quantity;
    }
    let exec = shared.exec_seq.fetch_add(1, Ordering::Relaxed) + 1;
    shared.bus.publish(
        &FillEvent {
            order_id: job.order_id.clone(),
            symbol: job.symbol.clone(),
            side: job.side,
            fill_price: price,
            fill_quantity: quantity,
            execution_id: Some(format!("exec-{}", exec)),
        }
        .into(),
    );
}

#[allow(clippy::too_many_arguments)]
fn publish_status(
    shared: &ExchangeShared,
    order_id: &OrderId,
    symbol: &Symbol,
    side: Side,
    order_type: OrderType,
    price: Price,
    quantity: Quantity,
    status: OrderStatus,
    filled: Quantity,
    reject_reason: Option<&str>,
) {
    shared.bus.publish(
        &OrderEvent {
            order_id: order_id.clone(),
            symbol: symbol.clone(),
            side,
            order_type,
            status,
            price,
            quantity,
            filled,
            reject_reason: reject_reason.map(str::to_string),
        }
        .into(),
    );
}

/// Bernoulli draw against `rate`; `rate <= 0` never fires.
fn draw(shared: &ExchangeShared, rate: f64) -> bool {
    if rate <= 0.0 {
        return false;
    }
    shared.rng.lock().random::<f64>() < rate
}

/// Slippage base is the last known market price, falling back to the order
/// price; buys pay up, sells receive less.
fn slippage_price(shared: &ExchangeShared, symbol: &str, side: Side, order_price: Price) -> Price {
    let base = shared
        .market_prices
        .lock()
        .get(symbol)
        .copied()
        .unwrap_or(order_price);
    let bps = shared.config.slippage_bps as i64;
    match side {
        Side::Buy => base.adjust_bps(bps),
        Side::Sell => base.adjust_bps(-bps),
    }
}
