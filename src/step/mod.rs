//! A single pipeline step and its estimate → execute state machine
//!
//! A step re-estimates whenever its input changes. Every estimate request
//! carries a generation number and a cancellation token; a result is only
//! applied when it belongs to the latest request. Once the sequencer has
//! activated the step, the first current estimate is executed and the
//! terminal status is reported back exactly once.

pub mod registry;

pub use registry::{StepRegistry, StepType};

use crate::adapter::{ChainAdapter, Estimate, ProgressSink, StepInput};
use crate::error::{BridgeError, BridgeResult};
use crate::wallet::WalletContexts;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifier issued by the sequencer, stable for the step's lifetime
pub type StepId = u64;

/// Operation a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    EthereumToTerra,
    TerraToEthereum,
    TerraToSolana,
    SolanaToTerra,
    SwapOnEthereum,
    DepositToAnchor,
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::EthereumToTerra => "ethereum_to_terra",
            StepKind::TerraToEthereum => "terra_to_ethereum",
            StepKind::TerraToSolana => "terra_to_solana",
            StepKind::SolanaToTerra => "solana_to_terra",
            StepKind::SwapOnEthereum => "swap_on_ethereum",
            StepKind::DepositToAnchor => "deposit_to_anchor",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum StepPhase {
    Idle,
    Estimating,
    Ready,
    Executing,
    Terminal(ExecutionStatus),
}

/// Notification sent to the sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    Executed {
        step_id: StepId,
        status: ExecutionStatus,
    },
}

struct StepInner {
    input: StepInput,
    phase: StepPhase,
    estimate: Option<Arc<Estimate>>,
    estimate_error: Option<String>,
    generation: u64,
    cancel: Option<CancellationToken>,
    is_to_execute: bool,
    /// Estimate handed to the adapter last, never submitted twice
    last_submitted: Option<Uuid>,
    result: Option<ExecutionStatus>,
    /// Wallet snapshot of the latest call, used when execution starts
    wallets: WalletContexts,
    retired: bool,
}

pub struct Step {
    id: StepId,
    kind: StepKind,
    title: String,
    adapter: Arc<dyn ChainAdapter>,
    events: mpsc::UnboundedSender<StepEvent>,
    progress: Arc<Mutex<Vec<String>>>,
    inner: Mutex<StepInner>,
}

/// Serializable view of a step
#[derive(Debug, Clone, Serialize)]
pub struct StepSnapshot {
    pub id: StepId,
    pub title: String,
    pub kind: StepKind,
    pub phase: StepPhase,
    pub is_to_execute: bool,
    pub input: StepInput,
    pub estimate_id: Option<Uuid>,
    pub estimate_amount: Option<String>,
    pub estimated_at: Option<DateTime<Utc>>,
    pub estimate: Option<String>,
    pub estimate_error: Option<String>,
    pub result: Option<ExecutionStatus>,
    pub progress: Vec<String>,
}

impl Step {
    pub fn new(
        id: StepId,
        step_type: &StepType,
        adapter: Arc<dyn ChainAdapter>,
        events: mpsc::UnboundedSender<StepEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind: step_type.kind,
            title: step_type.title.clone(),
            adapter,
            events,
            progress: Arc::new(Mutex::new(Vec::new())),
            inner: Mutex::new(StepInner {
                input: StepInput::default(),
                phase: StepPhase::Idle,
                estimate: None,
                estimate_error: None,
                generation: 0,
                cancel: None,
                is_to_execute: false,
                last_submitted: None,
                result: None,
                wallets: WalletContexts::default(),
                retired: false,
            }),
        })
    }

    pub fn id(&self) -> StepId {
        self.id
    }

    pub async fn phase(&self) -> StepPhase {
        self.inner.lock().await.phase
    }

    pub async fn estimate(&self) -> Option<Arc<Estimate>> {
        self.inner.lock().await.estimate.clone()
    }

    pub async fn result(&self) -> Option<ExecutionStatus> {
        self.inner.lock().await.result
    }

    pub async fn is_executing(&self) -> bool {
        self.inner.lock().await.phase == StepPhase::Executing
    }

    /// Replace the input and re-estimate
    pub async fn set_input(self: &Arc<Self>, input: StepInput, wallets: WalletContexts) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase == StepPhase::Executing {
            return Err(BridgeError::StepBusy { step_id: self.id });
        }

        inner.input = input;
        inner.wallets = wallets;
        self.restart_estimate(&mut inner);
        Ok(())
    }

    /// Mark the step for execution; runs now if a current estimate is ready
    pub async fn activate(self: &Arc<Self>, wallets: WalletContexts) {
        let mut inner = self.inner.lock().await;
        inner.is_to_execute = true;
        inner.wallets = wallets;
        debug!("Step {} activated in phase {:?}", self.id, inner.phase);
        self.maybe_start_execution(&mut inner);
    }

    /// Take over the finished activation of the step this one replaces.
    ///
    /// The step counts as executed for the rest of the run: later edits
    /// re-estimate but never execute again.
    pub async fn carry_result(&self, status: ExecutionStatus) {
        let mut inner = self.inner.lock().await;
        inner.is_to_execute = true;
        inner.result = Some(status);
        inner.phase = StepPhase::Terminal(status);
    }

    /// Take the step out of the sequence, abandoning any in-flight estimate
    pub async fn retire(&self) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase == StepPhase::Executing {
            return Err(BridgeError::StepBusy { step_id: self.id });
        }
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.generation += 1;
        inner.retired = true;
        Ok(())
    }

    /// Clear activation and result so the sequence can run again
    pub async fn reset(self: &Arc<Self>, wallets: WalletContexts) -> BridgeResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase == StepPhase::Executing {
            return Err(BridgeError::StepBusy { step_id: self.id });
        }

        inner.is_to_execute = false;
        inner.result = None;
        inner.last_submitted = None;
        inner.wallets = wallets;
        self.progress.lock().await.clear();
        self.restart_estimate(&mut inner);
        Ok(())
    }

    pub async fn snapshot(&self) -> StepSnapshot {
        let inner = self.inner.lock().await;
        StepSnapshot {
            id: self.id,
            title: self.title.clone(),
            kind: self.kind,
            phase: inner.phase,
            is_to_execute: inner.is_to_execute,
            input: inner.input.clone(),
            estimate_id: inner.estimate.as_ref().map(|e| e.id),
            estimate_amount: inner.estimate.as_ref().map(|e| e.amount_string.clone()),
            estimated_at: inner.estimate.as_ref().map(|e| e.created_at),
            estimate: inner.estimate.as_ref().map(|e| e.summary()),
            estimate_error: inner.estimate_error.clone(),
            result: inner.result,
            progress: self.progress.lock().await.clone(),
        }
    }

    /// Cancel the pending request and start estimating the current input
    fn restart_estimate(self: &Arc<Self>, inner: &mut StepInner) {
        if let Some(token) = inner.cancel.take() {
            token.cancel();
        }
        inner.generation += 1;
        inner.estimate = None;
        inner.estimate_error = None;

        if inner.input.amount.trim().is_empty() {
            inner.phase = StepPhase::Idle;
            return;
        }

        inner.phase = StepPhase::Estimating;
        let token = CancellationToken::new();
        inner.cancel = Some(token.clone());

        let generation = inner.generation;
        let input = inner.input.clone();
        let wallets = inner.wallets.clone();
        let step = self.clone();

        crate::metrics::record_estimate_started(self.kind);
        debug!("Step {} estimating '{}' (generation {})", self.id, input.amount, generation);

        tokio::spawn(async move {
            let result = step.adapter.estimate(&input, &wallets, &token).await;
            step.complete_estimate(generation, &token, result).await;
        });
    }

    async fn complete_estimate(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        result: BridgeResult<Estimate>,
    ) {
        let mut inner = self.inner.lock().await;

        if token.is_cancelled() || generation != inner.generation {
            debug!(
                "Step {} discarded estimate of generation {} (current {})",
                self.id, generation, inner.generation
            );
            crate::metrics::record_estimate_discarded(self.kind);
            return;
        }
        inner.cancel = None;

        match result {
            Ok(estimate) => {
                debug!("Step {} ready: {}", self.id, estimate.summary());
                inner.estimate = Some(Arc::new(estimate));
                inner.phase = StepPhase::Ready;
                self.maybe_start_execution(&mut inner);
            }
            Err(e) if !e.is_user_visible() => {
                debug!("Step {} estimate went stale", self.id);
                crate::metrics::record_estimate_discarded(self.kind);
            }
            Err(e) => {
                if e.is_estimation_failure() {
                    warn!("Step {} estimation failed: {}", self.id, e);
                } else {
                    error!("Step {} estimation hit an unexpected error: {}", self.id, e);
                }
                crate::metrics::record_estimate_failed(self.kind);
                inner.estimate_error = Some(e.to_string());
            }
        }
    }

    fn maybe_start_execution(self: &Arc<Self>, inner: &mut StepInner) {
        if !inner.is_to_execute || inner.retired || inner.result.is_some() {
            return;
        }
        if inner.phase != StepPhase::Ready {
            return;
        }
        let estimate = match &inner.estimate {
            Some(estimate) => estimate.clone(),
            None => return,
        };
        if inner.last_submitted == Some(estimate.id) || estimate.amount_string != inner.input.amount {
            return;
        }

        inner.phase = StepPhase::Executing;
        inner.last_submitted = Some(estimate.id);

        let wallets = inner.wallets.clone();
        let step = self.clone();
        tokio::spawn(async move { step.run_execution(estimate, wallets).await });
    }

    async fn run_execution(self: Arc<Self>, estimate: Arc<Estimate>, wallets: WalletContexts) {
        let sink = ProgressSink::new(self.id, self.progress.clone());
        info!("Step {} ({}) executing: {}", self.id, self.title, estimate.summary());

        let status = match self.adapter.execute(&estimate, &wallets, &sink).await {
            Ok(outcome) => {
                sink.report(format!(
                    "Completed with {} transaction(s)",
                    outcome.tx_hashes.len()
                ))
                .await;
                ExecutionStatus::Success
            }
            Err(e) => {
                error!("Step {} ({}) failed: {}", self.id, self.title, e);
                sink.report(format!("Failed: {}", e)).await;
                ExecutionStatus::Failed
            }
        };
        crate::metrics::record_execution(self.kind, status);

        {
            let mut inner = self.inner.lock().await;
            inner.phase = StepPhase::Terminal(status);
            inner.result = Some(status);
        }

        if self
            .events
            .send(StepEvent::Executed {
                step_id: self.id,
                status,
            })
            .is_err()
        {
            warn!("Step {} finished after the sequencer stopped", self.id);
        }
    }
}
