use anyhow::Result;
use clap::Parser;
use std::collections::VecDeque;
use tracing::info;

use tickedge::config::Config;
use tickedge::db::TradeStore;
use tickedge::engine::{BetRequest, TradeOutcome, TradeParams, TradingEngine};

mod paper;

use paper::SyntheticMarket;

/// Assets with a bet in the recent past, used for correlation damping.
const ACTIVE_SET: usize = 2;

fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!(
        "Paper session: {} instruments, {} ticks, bankroll ${:.2}, seed {}",
        config.instruments.len(),
        config.ticks,
        config.initial_balance,
        config.seed
    );

    let mut engine = TradingEngine::new(config.engine_config())?;

    let store = match &config.database_path {
        Some(path) => {
            let store = TradeStore::open(path)?;
            info!("Database opened: {}", path);
            store.record_balance(config.initial_balance)?;
            Some(store)
        }
        None => None,
    };

    let mut market = SyntheticMarket::new(&config.instruments, config.seed);
    let mut active: VecDeque<String> = VecDeque::with_capacity(ACTIVE_SET + 1);
    let mut evaluated = 0usize;
    let mut placed = 0usize;

    for step in 1..=config.ticks {
        for (instrument, value) in market.step() {
            engine.on_tick(&instrument, value)?;
        }
        if step % config.bet_every != 0 {
            continue;
        }

        let asset = config.instruments[(step / config.bet_every) % config.instruments.len()].clone();
        let request = BetRequest {
            asset: asset.clone(),
            pattern_id: market.pattern(&asset),
            estimated_ticks: config.estimated_ticks,
            growth_rate: None,
        };
        let others: Vec<String> = active.iter().filter(|a| **a != asset).cloned().collect();
        let decision = engine.evaluate_bet(&request, &others)?;
        evaluated += 1;
        if !decision.approved {
            continue;
        }

        let truth = TradeParams {
            win_probability: market.true_win_probability(&asset),
            ..decision.params.clone()
        };
        let (won, profit) = engine.simulator_mut().simulate_resolution(&truth)?;
        let (outcome, duration) = if won {
            (TradeOutcome::Win, config.estimated_ticks)
        } else {
            (TradeOutcome::Loss, market.loss_duration(config.estimated_ticks))
        };
        let record = engine.record_result(&decision, outcome, profit, duration)?;
        placed += 1;

        if let Some(store) = &store {
            store.insert_trade(&record)?;
            store.record_balance(record.balance_after)?;
        }

        active.retain(|a| *a != asset);
        active.push_back(asset);
        if active.len() > ACTIVE_SET {
            active.pop_front();
        }
    }

    let ledger = engine.ledger();
    info!(
        evaluated,
        placed,
        balance = format!("{:.2}", ledger.current_balance()),
        win_rate = format!("{:.3}", ledger.win_rate()),
        effective_bets = format!(
            "{:.2}",
            engine.correlations().calculate_effective_n_bets(&config.instruments)
        ),
        "Session finished"
    );

    if !config.no_summary {
        println!("{}", serde_json::to_string_pretty(&ledger.summary())?);
    }

    Ok(())
}
