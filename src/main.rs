//! tickmesh demo binary.
//!
//! Runs a synthetic trading session end to end: a feed thread generates a
//! random-walk market and streams ticks over a channel; the main thread
//! publishes them onto the event mesh where the SMA strategy, risk gate,
//! order manager, book manager and simulated exchange react. A performance
//! report is printed when the session ends.
//!
//! ```text
//! ┌──────────────┐    FeedTick     ┌───────────────────────────────┐
//! │  feed thread │ ──────────────► │ main thread: publish -> mesh  │
//! └──────────────┘    (channel)    └───────────────────────────────┘
//! ```
//!
//! Usage: `tickmesh [config-file] [trades.csv]`. With a CSV of historical
//! trades (`timestamp,symbol,price,volume`) the binary runs a deterministic
//! backtest instead of the synthetic session. See `ConfigStore` for the
//! config format; the interesting keys are `portfolio.*`, `exchange.*`,
//! `strategy.sma.*`, and `demo.{symbol,ticks,initial_price,seed}`.

use backtest::Backtester;
use bus::EventBus;
use config::ConfigStore;
use crossbeam_channel::{bounded, Receiver, Sender};
use exchange::{ExchangeConfig, ExchangeConnector, SimulatedExchange};
use marketdata::BookManager;
use oms::{Portfolio, RiskLimits};
use quant::{PerformanceReport, PortfolioSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use strategies::{SmaCrossover, SmaParams, StrategyManager};
use types::{now_ms, Price, Quantity, QuoteEvent, Symbol, TradeEvent};

/// One synthetic market tick from the feed thread.
struct FeedTick {
    quote: QuoteEvent,
    trade: TradeEvent,
}

/// Demo knobs, read from the `demo.*` config section.
struct DemoParams {
    symbol: Symbol,
    ticks: u64,
    initial_price: Price,
    seed: u64,
}

impl DemoParams {
    fn from_store(store: &ConfigStore) -> Self {
        Self {
            symbol: store.get_str("demo.symbol", "AAPL"),
            ticks: store.get_u64("demo.ticks", 500),
            initial_price: Price::from_float(store.get_f64("demo.initial_price", 150.0)),
            seed: store.get_u64("demo.seed", 7),
        }
    }
}

/// Defaults used when no config file is supplied: a small, fast session.
const DEMO_CONFIG: &str = r#"
[portfolio]
initial_capital = 1000000.0

[exchange]
fill_latency_ms = 2
slippage_bps = 5.0

[strategy.sma]
fast_period = 5
slow_period = 20
position_size = 200
"#;

fn run_feed(tx: Sender<FeedTick>, params: &DemoParams) {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut price = params.initial_price.to_float();

    for _ in 0..params.ticks {
        // Random walk with a mild drift and a half-percent spread.
        price = (price * (1.0 + rng.random_range(-0.004..0.0045))).max(1.0);
        let half_spread = price * 0.0025;

        let tick = FeedTick {
            quote: QuoteEvent {
                symbol: params.symbol.clone(),
                bid_price: Price::from_float(price - half_spread),
                ask_price: Price::from_float(price + half_spread),
                bid_size: Quantity(rng.random_range(100..1_000)),
                ask_size: Quantity(rng.random_range(100..1_000)),
            },
            trade: TradeEvent {
                symbol: params.symbol.clone(),
                price: Price::from_float(price),
                size: Quantity(rng.random_range(10..500)),
            },
        };
        if tx.send(tick).is_err() {
            break;
        }
    }
}

fn run_session(store: &ConfigStore) {
    let demo = DemoParams::from_store(store);

    let bus = EventBus::new();
    let portfolio = Arc::new(Portfolio::new(bus.clone(), RiskLimits::from_store(store)));
    let exchange = SimulatedExchange::new(bus.clone(), ExchangeConfig::from_store(store));
    let books = BookManager::new(bus.clone());
    let strategies = StrategyManager::new(bus.clone());

    strategies.add(Arc::new(SmaCrossover::new(
        "sma",
        portfolio.clone(),
        demo.symbol.clone(),
        SmaParams::from_store(store),
    )));

    exchange.start();
    strategies.start_all();

    let (tx, rx): (Sender<FeedTick>, Receiver<FeedTick>) = bounded(64);
    let feed = {
        let params = DemoParams {
            symbol: demo.symbol.clone(),
            ..demo
        };
        thread::spawn(move || run_feed(tx, &params))
    };

    let mut marks: HashMap<Symbol, Price> = HashMap::new();
    let mut snapshots: Vec<PortfolioSnapshot> = Vec::new();
    let mut tick_count: u64 = 0;

    for tick in rx.iter() {
        exchange.set_market_price(tick.trade.symbol.clone(), tick.trade.price);
        marks.insert(tick.trade.symbol.clone(), tick.trade.price);

        bus.publish(&tick.quote.into());
        bus.publish(&tick.trade.into());

        snapshots.push(PortfolioSnapshot {
            timestamp_ms: now_ms(),
            portfolio_value: portfolio.portfolio_value(&marks),
            cash: portfolio.cash(),
            realized_pnl: portfolio.realized_pnl(),
            unrealized_pnl: portfolio.unrealized_pnl(&marks),
        });

        tick_count += 1;
        if tick_count % 100 == 0 {
            if let Some(top) = books.top_of_book(&demo.symbol) {
                tracing::info!(
                    target: "demo",
                    tick = tick_count,
                    bid = ?top.bid.map(|l| l.price),
                    ask = ?top.ask.map(|l| l.price),
                    value = %portfolio.portfolio_value(&marks),
                    "session progress"
                );
            }
        }
    }
    let _ = feed.join();

    strategies.stop_all();
    exchange.stop();

    let report = PerformanceReport::from_snapshots(
        &snapshots,
        portfolio.initial_capital(),
        0.02,
    );

    let position = portfolio
        .order_manager()
        .position(&demo.symbol)
        .map_or(0, |p| p.quantity());
    println!("\nSession finished: {} ticks on {}", tick_count, demo.symbol);
    println!(
        "Final position: {} | cash: {} | realized P&L: {}",
        position,
        portfolio.cash(),
        portfolio.realized_pnl()
    );
    println!("Events dispatched: {}\n", bus.processed_count());
    println!("{}", report);
}

fn run_backtest(store: &ConfigStore, data_path: &str) {
    let demo = DemoParams::from_store(store);
    let mut bt = Backtester::new(RiskLimits::from_store(store).initial_capital);

    if let Err(e) = bt.load_csv(data_path) {
        eprintln!("failed to load trade data '{}': {}", data_path, e);
        std::process::exit(1);
    }
    bt.add_strategy(Arc::new(SmaCrossover::new(
        "sma",
        bt.portfolio().clone(),
        demo.symbol.clone(),
        SmaParams::from_store(store),
    )));

    match bt.run() {
        Ok(report) => {
            let position = bt
                .portfolio()
                .order_manager()
                .position(&demo.symbol)
                .map_or(0, |p| p.quantity());
            println!("\nBacktest finished on {}", demo.symbol);
            println!(
                "Final position: {} | cash: {} | realized P&L: {}\n",
                position,
                bt.portfolio().cash(),
                bt.portfolio().realized_pnl()
            );
            println!("{}", report);
        }
        Err(e) => {
            eprintln!("backtest failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store = match std::env::args().nth(1) {
        Some(path) => match ConfigStore::from_file(&path) {
            Ok(store) => {
                tracing::info!(target: "demo", %path, "loaded config");
                store
            }
            Err(e) => {
                eprintln!("failed to load config '{}': {}", path, e);
                std::process::exit(1);
            }
        },
        None => ConfigStore::parse(DEMO_CONFIG),
    };

    match std::env::args().nth(2) {
        Some(data_path) => run_backtest(&store, &data_path),
        None => run_session(&store),
    }
}
