//! Strategy lifecycle epochs and single-symbol experiments.
//!
//! Epochs are ordered lifecycle stages; promotion to the next stage is
//! gated by a caller-supplied predicate over the run's summary metrics.
//! Experiments group multiple runs of the same symbol (timeframe mix,
//! multi-strategy, parameter sweep) under one experiment id, executed in
//! parallel across runs and never within one.

use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use perplab_core::data::MarketDataProvider;
use perplab_core::error::Result;
use perplab_core::metrics::Summary;
use perplab_core::play::Play;
use perplab_core::strategy::StrategyRegistry;

use crate::engine::{BacktestEngine, RunOptions, RunReport, RunWindow};

/// Lifecycle stage of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Epoch {
    Idea,
    Creation,
    Backtest,
    Demo,
    Live,
}

impl Epoch {
    pub const ALL: [Epoch; 5] = [
        Epoch::Idea,
        Epoch::Creation,
        Epoch::Backtest,
        Epoch::Demo,
        Epoch::Live,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Epoch::Idea => "IDEA",
            Epoch::Creation => "CREATION",
            Epoch::Backtest => "BACKTEST",
            Epoch::Demo => "DEMO",
            Epoch::Live => "LIVE",
        }
    }

    /// The next stage in the chain, if any.
    pub fn next(&self) -> Option<Epoch> {
        let idx = Epoch::ALL.iter().position(|e| e == self).expect("member");
        Epoch::ALL.get(idx + 1).copied()
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked run of a strategy within an epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRun {
    pub run_id: String,
    pub epoch: Epoch,
    pub symbol: String,
    pub completed: bool,
    pub metrics: Option<Summary>,
}

/// Outcome of a promotion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionDecision {
    Promoted(Epoch),
    Rejected,
    /// Already at the final stage.
    AtCeiling,
}

/// Tracks one strategy family through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochTracker {
    pub strategy_id: String,
    pub current_epoch: Epoch,
    pub runs: Vec<EpochRun>,
}

impl EpochTracker {
    pub fn new(strategy_id: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            current_epoch: Epoch::Idea,
            runs: Vec::new(),
        }
    }

    /// Start tracking a run in the current epoch; returns its run id.
    pub fn epoch_start(&mut self, symbol: &str) -> String {
        let run_id = Uuid::new_v4().to_string();
        self.runs.push(EpochRun {
            run_id: run_id.clone(),
            epoch: self.current_epoch,
            symbol: symbol.to_string(),
            completed: false,
            metrics: None,
        });
        tracing::info!(
            strategy = %self.strategy_id,
            epoch = %self.current_epoch,
            run_id = %run_id,
            "epoch run started"
        );
        run_id
    }

    /// Record a completed run's metrics.
    pub fn epoch_complete(&mut self, run_id: &str, metrics: Summary) {
        if let Some(run) = self.runs.iter_mut().find(|r| r.run_id == run_id) {
            run.completed = true;
            run.metrics = Some(metrics);
        }
    }

    /// The most recent completed run in the current epoch.
    pub fn latest_completed(&self) -> Option<&EpochRun> {
        self.runs
            .iter()
            .rev()
            .find(|r| r.completed && r.epoch == self.current_epoch)
    }

    /// Attempt promotion to the next epoch. The predicate inspects the
    /// latest completed run's metrics; a rejected promotion leaves the
    /// tracker in its current epoch.
    pub fn promote_if<F>(&mut self, predicate: F) -> PromotionDecision
    where
        F: Fn(&Summary) -> bool,
    {
        let Some(next) = self.current_epoch.next() else {
            return PromotionDecision::AtCeiling;
        };
        let passes = self
            .latest_completed()
            .and_then(|r| r.metrics.as_ref())
            .map(&predicate)
            .unwrap_or(false);
        if passes {
            tracing::info!(
                strategy = %self.strategy_id,
                from = %self.current_epoch,
                to = %next,
                "strategy promoted"
            );
            self.current_epoch = next;
            PromotionDecision::Promoted(next)
        } else {
            tracing::info!(
                strategy = %self.strategy_id,
                epoch = %self.current_epoch,
                "promotion rejected"
            );
            PromotionDecision::Rejected
        }
    }
}

/// What varies across the runs of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    TimeframeMix,
    MultiStrategy,
    ParameterSweep,
}

/// A group of runs over one symbol sharing an experiment id.
#[derive(Debug, Clone)]
pub struct Experiment {
    pub experiment_id: String,
    pub symbol: String,
    pub kind: ExperimentKind,
    pub plays: Vec<Play>,
}

impl Experiment {
    pub fn new(symbol: impl Into<String>, kind: ExperimentKind, plays: Vec<Play>) -> Self {
        Self {
            experiment_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            kind,
            plays,
        }
    }

    /// Run every play of the experiment. Parallelism lives strictly at the
    /// run boundary: each run gets its own engine, provider handle, and
    /// artifact directory.
    pub fn run_all<P>(
        &self,
        provider_for_play: impl Fn(&Play) -> P + Sync,
        registry: &StrategyRegistry,
        window: RunWindow,
        out_root: &Path,
        options: &RunOptions,
    ) -> Vec<Result<RunReport>>
    where
        P: MarketDataProvider,
    {
        tracing::info!(
            experiment_id = %self.experiment_id,
            kind = ?self.kind,
            runs = self.plays.len(),
            "experiment starting"
        );
        self.plays
            .par_iter()
            .map(|play| {
                let provider = provider_for_play(play);
                let engine = BacktestEngine::new(play, &provider, registry);
                let run_id = Uuid::new_v4().to_string();
                engine.run(window, out_root, &run_id, options)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perplab_core::metrics::compute_summary;
    use perplab_core::timeframe::Timeframe;

    fn dummy_metrics() -> Summary {
        compute_summary(&[], &[], Timeframe::H1, 10_000.0)
    }

    #[test]
    fn epoch_chain_is_ordered() {
        assert!(Epoch::Idea < Epoch::Backtest);
        assert_eq!(Epoch::Idea.next(), Some(Epoch::Creation));
        assert_eq!(Epoch::Live.next(), None);
    }

    #[test]
    fn promotion_requires_passing_metrics() {
        let mut tracker = EpochTracker::new("ema_rsi_atr");
        let run_id = tracker.epoch_start("BTCUSDT");
        tracker.epoch_complete(&run_id, dummy_metrics());

        // Reject: predicate demands positive net PnL, dummy has zero.
        let decision = tracker.promote_if(|m| m.net_pnl_usdt > 0.0);
        assert_eq!(decision, PromotionDecision::Rejected);
        assert_eq!(tracker.current_epoch, Epoch::Idea);

        // Accept anything: promoted one stage.
        let decision = tracker.promote_if(|_| true);
        assert_eq!(decision, PromotionDecision::Promoted(Epoch::Creation));
        assert_eq!(tracker.current_epoch, Epoch::Creation);
    }

    #[test]
    fn promotion_without_completed_run_is_rejected() {
        let mut tracker = EpochTracker::new("ema_rsi_atr");
        tracker.epoch_start("BTCUSDT"); // never completed
        assert_eq!(tracker.promote_if(|_| true), PromotionDecision::Rejected);
    }

    #[test]
    fn promotion_stops_at_live() {
        let mut tracker = EpochTracker::new("ema_rsi_atr");
        for _ in 0..4 {
            let run_id = tracker.epoch_start("BTCUSDT");
            tracker.epoch_complete(&run_id, dummy_metrics());
            tracker.promote_if(|_| true);
        }
        assert_eq!(tracker.current_epoch, Epoch::Live);
        assert_eq!(tracker.promote_if(|_| true), PromotionDecision::AtCeiling);
    }

    #[test]
    fn experiment_ids_are_unique() {
        let a = Experiment::new("BTCUSDT", ExperimentKind::TimeframeMix, vec![]);
        let b = Experiment::new("BTCUSDT", ExperimentKind::TimeframeMix, vec![]);
        assert_ne!(a.experiment_id, b.experiment_id);
    }
}
