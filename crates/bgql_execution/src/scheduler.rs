//! Wave scheduler.
//!
//! Drives an [`ExecutionTree`] to completion. Ready nodes are started in
//! enqueue order up to the concurrency bound; work that does not finish
//! immediately is spawned and joined as one wave. When nothing is ready or
//! in flight, deferred nodes are flushed, prioritized ones first.

use crate::classifier::DeferredClassifier;
use crate::error::{ExecutionError, ResolverError};
use crate::executor::{ExecutionContext, NodeOutcome, Started};
use crate::metrics::{PerfCategory, PerfRecord, PerfRecorder};
use crate::node::{ExecutionTree, NodeId, ResolutionState};
use crate::pool::{BufferPool, WaveBuffers};
use futures::future::join_all;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// How a run treats concurrency and deferred values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Parallel, flushing deferred nodes that unlock other batches first.
    #[default]
    PrioritizedParallel,
    /// Parallel, flushing all deferred nodes together.
    Parallel,
    /// One asynchronous node at a time, deferred nodes flushed together.
    Serial,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrioritizedParallel => "prioritized_parallel",
            Self::Parallel => "parallel",
            Self::Serial => "serial",
        }
    }
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "prioritized_parallel" | "prioritized" => Ok(Self::PrioritizedParallel),
            "parallel" => Ok(Self::Parallel),
            "serial" => Ok(Self::Serial),
            other => Err(format!("unknown execution strategy: {other}")),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub strategy: ExecutionStrategy,

    /// Maximum asynchronous nodes in flight. `None` is unbounded.
    pub max_parallelism: Option<usize>,

    /// Keep wave buffers between runs.
    pub reuse_buffers: bool,

    /// Collect [`PerfRecord`]s.
    pub enable_metrics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            max_parallelism: None,
            reuse_buffers: true,
            enable_metrics: false,
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration for a strategy.
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_max_parallelism(mut self, max: Option<usize>) -> Self {
        self.max_parallelism = max;
        self
    }

    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Effective in-flight bound.
    pub fn bound(&self) -> usize {
        match self.strategy {
            ExecutionStrategy::Serial => 1,
            _ => self.max_parallelism.map_or(usize::MAX, |max| max.max(1)),
        }
    }

    /// Whether deferred flushes are prioritized.
    pub fn prioritize(&self) -> bool {
        self.strategy == ExecutionStrategy::PrioritizedParallel
    }
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub waves: usize,
    pub flushes: usize,
    pub nodes_started: usize,
    pub perf: Vec<PerfRecord>,
}

/// A run that ended without a usable tree, with what it did up to then.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: ExecutionError,
    pub summary: RunSummary,
}

impl From<ExecutionError> for RunFailure {
    fn from(error: ExecutionError) -> Self {
        Self {
            error,
            summary: RunSummary::default(),
        }
    }
}

/// Scheduler statistics across runs.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Runs started.
    pub runs: AtomicUsize,

    /// Runs stopped by cancellation.
    pub cancelled: AtomicUsize,

    /// Waves joined.
    pub waves: AtomicUsize,

    /// Deferred flushes.
    pub flushes: AtomicUsize,

    /// Nodes started.
    pub nodes_started: AtomicUsize,
}

/// Runs execution trees wave by wave.
#[derive(Debug)]
pub struct WaveScheduler {
    config: SchedulerConfig,
    pool: BufferPool,
    stats: SchedulerStats,
}

impl WaveScheduler {
    /// Creates a scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        let pool = if config.reuse_buffers {
            BufferPool::new()
        } else {
            BufferPool::disabled()
        };
        Self {
            config,
            pool,
            stats: SchedulerStats::default(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Resolves every node reachable from the root of `tree`.
    ///
    /// Faults stay on their nodes. The run fails only when the root faults,
    /// the cancellation token fires, or the scheduler hits an impossible
    /// state. A failed run still reports its counters and timing records.
    #[tracing::instrument(
        level = "debug",
        name = "wave_scheduler_run",
        skip_all,
        fields(strategy = %self.config.strategy)
    )]
    pub(crate) async fn run(
        &self,
        exec: &ExecutionContext,
        tree: &mut ExecutionTree,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunFailure> {
        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        let mut perf = PerfRecorder::new(self.config.enable_metrics);
        let run_started = perf.start();
        let mut summary = RunSummary::default();

        let result = self.drive(exec, tree, cancel, &mut summary, &mut perf).await;

        self.record_stats(&summary, result.as_ref().is_err_and(ExecutionError::is_cancelled));
        perf.record(PerfCategory::Execution, run_started, || match &result {
            Ok(()) => format!("{} nodes", summary.nodes_started),
            Err(error) => format!("{} nodes, {error}", summary.nodes_started),
        });
        summary.perf = perf.into_records();
        match result {
            Ok(()) => Ok(summary),
            Err(error) => Err(RunFailure { error, summary }),
        }
    }

    async fn drive(
        &self,
        exec: &ExecutionContext,
        tree: &mut ExecutionTree,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
        perf: &mut PerfRecorder,
    ) -> Result<(), ExecutionError> {
        let mut buffers = self.pool.checkout();
        let WaveBuffers {
            ready,
            deferred,
            tasks,
            nodes,
        } = &mut *buffers;
        let classifier = DeferredClassifier::new(&exec.schema);
        let bound = self.config.bound();

        ready.push_back(tree.root());
        loop {
            let mut cancelled = false;
            while tasks.len() < bound {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                if cancel.is_cancelled() {
                    ready.push_front(id);
                    cancelled = true;
                    break;
                }

                summary.nodes_started += 1;
                trace!(node = id.index(), field = %tree.node(id).field().name, "starting node");
                tree.node_mut(id).state = ResolutionState::Resolving;
                match exec.start(tree, id)? {
                    Started::Completed(outcome) => apply(exec, tree, id, outcome, ready, deferred)?,
                    Started::Pending(work) => {
                        tasks.push(tokio::spawn(work));
                        nodes.push(id);
                    }
                }
            }

            if !tasks.is_empty() {
                let started = perf.start();
                let size = tasks.len();
                let outcomes = join_all(tasks.drain(..)).await;
                for (id, joined) in nodes.drain(..).zip(outcomes) {
                    let outcome = joined.unwrap_or_else(|e| {
                        NodeOutcome::Fault(ResolverError::Panicked(e.to_string()))
                    });
                    apply(exec, tree, id, outcome, ready, deferred)?;
                }
                summary.waves += 1;
                debug!(wave = summary.waves, size, "wave joined");
                perf.record(PerfCategory::Wave, started, || {
                    format!("wave {} ({size} nodes)", summary.waves)
                });
            }

            if cancelled {
                debug!(pending = ready.len() + deferred.len(), "run cancelled");
                return Err(ExecutionError::Cancelled);
            }
            if !ready.is_empty() {
                continue;
            }
            if deferred.is_empty() {
                break;
            }

            self.flush(&classifier, tree, ready, deferred, perf);
            summary.flushes += 1;
        }

        match tree.node(tree.root()).state() {
            ResolutionState::Faulted(error) => Err(ExecutionError::NoData(error.clone())),
            _ => Ok(()),
        }
    }

    /// Moves deferred nodes to the ready queue.
    ///
    /// Flushed nodes go through the ready queue so the in-flight bound
    /// covers their completion as well.
    fn flush(
        &self,
        classifier: &DeferredClassifier<'_>,
        tree: &ExecutionTree,
        ready: &mut VecDeque<NodeId>,
        deferred: &mut Vec<NodeId>,
        perf: &mut PerfRecorder,
    ) {
        let started = perf.start();
        let priority = if self.config.prioritize() {
            classifier.prioritize(tree, &deferred[..])
        } else {
            Vec::new()
        };
        perf.record(PerfCategory::Prioritize, started, || {
            format!("{} of {} deferred", priority.len(), deferred.len())
        });

        let started = perf.start();
        let total = deferred.len();
        if priority.is_empty() || priority.len() == deferred.len() {
            ready.extend(deferred.drain(..));
        } else {
            let chosen: FxHashSet<NodeId> = priority.iter().copied().collect();
            deferred.retain(|id| !chosen.contains(id));
            ready.extend(priority);
        }
        let flushed = ready.len();
        debug!(flushed, remaining = deferred.len(), "flushing deferred nodes");
        perf.record(PerfCategory::Flush, started, || {
            format!("{flushed} of {total} deferred")
        });
    }

    fn record_stats(&self, summary: &RunSummary, cancelled: bool) {
        self.stats.waves.fetch_add(summary.waves, Ordering::Relaxed);
        self.stats.flushes.fetch_add(summary.flushes, Ordering::Relaxed);
        self.stats
            .nodes_started
            .fetch_add(summary.nodes_started, Ordering::Relaxed);
        if cancelled {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Applies the outcome of a started node.
fn apply(
    exec: &ExecutionContext,
    tree: &mut ExecutionTree,
    id: NodeId,
    outcome: NodeOutcome,
    ready: &mut VecDeque<NodeId>,
    deferred: &mut Vec<NodeId>,
) -> Result<(), ExecutionError> {
    match outcome {
        NodeOutcome::Value(value) => {
            tree.node_mut(id).state = ResolutionState::Resolved(value);
            tree.expand(id, &exec.schema, &exec.resolvers, ready)
        }
        NodeOutcome::Deferred(placeholder) => {
            let node = tree.node_mut(id);
            node.state = ResolutionState::Deferred(placeholder.group().cloned());
            node.placeholder = Some(placeholder);
            deferred.push(id);
            Ok(())
        }
        NodeOutcome::Fault(error) => {
            trace!(node = id.index(), %error, "node faulted");
            tree.node_mut(id).state = ResolutionState::Faulted(error);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "prioritized-parallel".parse::<ExecutionStrategy>(),
            Ok(ExecutionStrategy::PrioritizedParallel)
        );
        assert_eq!("Serial".parse::<ExecutionStrategy>(), Ok(ExecutionStrategy::Serial));
        assert!("fastest".parse::<ExecutionStrategy>().is_err());
        assert_eq!(ExecutionStrategy::Parallel.to_string(), "parallel");
        assert_eq!(
            serde_json::to_value(ExecutionStrategy::PrioritizedParallel).unwrap(),
            serde_json::json!("prioritized_parallel")
        );
    }

    #[test]
    fn test_bound() {
        let config = SchedulerConfig::default();
        assert_eq!(config.bound(), usize::MAX);
        assert!(config.prioritize());

        let config = SchedulerConfig::new(ExecutionStrategy::Parallel).with_max_parallelism(Some(0));
        assert_eq!(config.bound(), 1);
        assert!(!config.prioritize());

        let config = SchedulerConfig::new(ExecutionStrategy::Serial).with_max_parallelism(Some(8));
        assert_eq!(config.bound(), 1);
    }

    #[test]
    fn test_scheduler_pool_follows_config() {
        let scheduler = WaveScheduler::new(SchedulerConfig::default().with_reuse_buffers(false));
        assert!(!scheduler.pool().is_enabled());
        assert!(WaveScheduler::new(SchedulerConfig::default()).pool().is_enabled());
    }
}
