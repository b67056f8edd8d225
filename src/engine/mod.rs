pub mod bayes;
pub mod correlation;
pub mod kelly;
pub mod ledger;
pub mod regime;
pub mod session;
pub mod simulator;
pub mod stats;

pub use bayes::{BayesianEstimator, WinEstimate, WinQuery};
pub use correlation::CorrelationTracker;
pub use ledger::{PerformanceLedger, TradeOutcome, TradeRecord};
pub use regime::{Regime, RegimeClassifier};
pub use session::{BetDecision, BetRequest, EngineConfig, TradingEngine};
pub use simulator::{OutcomeSimulator, SimulationBudget, TradeParams};
