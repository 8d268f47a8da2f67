//! Ordered list of steps and the activation rule between them

use crate::adapter::{AdapterResolver, StepInput};
use crate::error::{BridgeError, BridgeResult};
use crate::step::{ExecutionStatus, Step, StepEvent, StepId, StepRegistry, StepSnapshot};
use crate::wallet::WalletHub;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Position-independent identity of a row in the sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDescriptor {
    pub id: StepId,
    pub title: String,
    /// Only ever changed by the sequencer
    pub is_to_execute: bool,
}

struct StepSlot {
    descriptor: StepDescriptor,
    step: Arc<Step>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceSnapshot {
    pub steps: Vec<StepSnapshot>,
    pub last_completed_index: Option<usize>,
    pub halted: bool,
}

/// Owns the steps and drives them strictly in order
pub struct StepsBuilder {
    registry: Arc<StepRegistry>,
    adapters: Arc<dyn AdapterResolver>,
    wallets: Arc<WalletHub>,
    events: mpsc::UnboundedSender<StepEvent>,
    slots: Vec<StepSlot>,
    next_id: StepId,
    last_completed_index: Option<usize>,
    halt_on_failure: bool,
    halted: bool,
}

impl StepsBuilder {
    pub fn new(
        registry: Arc<StepRegistry>,
        adapters: Arc<dyn AdapterResolver>,
        wallets: Arc<WalletHub>,
        events: mpsc::UnboundedSender<StepEvent>,
        halt_on_failure: bool,
    ) -> Self {
        Self {
            registry,
            adapters,
            wallets,
            events,
            slots: Vec::new(),
            next_id: 0,
            last_completed_index: None,
            halt_on_failure,
            halted: false,
        }
    }

    #[cfg(test)]
    pub fn descriptors(&self) -> Vec<StepDescriptor> {
        self.slots.iter().map(|s| s.descriptor.clone()).collect()
    }

    fn slot(&self, index: usize) -> BridgeResult<&StepSlot> {
        self.slots
            .get(index)
            .ok_or_else(|| BridgeError::not_found(format!("Step #{}", index)))
    }

    /// Append a step of the first catalog type
    pub fn add_step(&mut self) -> BridgeResult<StepDescriptor> {
        let step_type = self.registry.by_index(0)?.clone();
        let id = self.next_id;
        self.next_id += 1;

        let step = Step::new(
            id,
            &step_type,
            self.adapters.adapter_for(step_type.kind),
            self.events.clone(),
        );
        let descriptor = StepDescriptor {
            id,
            title: step_type.title,
            is_to_execute: false,
        };
        self.slots.push(StepSlot {
            descriptor: descriptor.clone(),
            step,
        });

        info!("Added step {} at index {}", id, self.slots.len() - 1);
        Ok(descriptor)
    }

    pub async fn remove_step(&mut self, index: usize) -> BridgeResult<StepDescriptor> {
        let step = self.slot(index)?.step.clone();
        step.retire().await?;

        // An active step hands its position in the run to the step that
        // takes its place, including a finished one whose completion event
        // is still queued
        let in_run = self.slots[index].descriptor.is_to_execute && !self.completed_through(index);
        let unreported = if in_run { step.result().await } else { None };
        let removed = self.slots.remove(index);

        self.last_completed_index = match self.last_completed_index {
            Some(last) if index <= last => last.checked_sub(1),
            other => other,
        };

        info!("Removed step {} from index {}", removed.descriptor.id, index);
        match unreported {
            Some(status) => {
                debug!("Step {} removed before its completion was handled", removed.descriptor.id);
                self.last_completed_index = index.checked_sub(1);
                self.activate_successor(index, removed.descriptor.id, status).await;
            }
            None if in_run => self.activate_at(index).await,
            None => {}
        }
        Ok(removed.descriptor)
    }

    fn completed_through(&self, index: usize) -> bool {
        matches!(self.last_completed_index, Some(last) if last >= index)
    }

    /// Change the kind of a step, keeping its id, activation and result
    pub async fn select_step_type(&mut self, index: usize, title: &str) -> BridgeResult<StepDescriptor> {
        let step_type = self.registry.by_title(title)?.clone();
        let slot = self.slot(index)?;
        slot.step.retire().await?;

        let id = slot.descriptor.id;
        let is_to_execute = slot.descriptor.is_to_execute;
        let finished = slot.step.result().await;
        let step = Step::new(
            id,
            &step_type,
            self.adapters.adapter_for(step_type.kind),
            self.events.clone(),
        );
        match (is_to_execute, finished) {
            (true, Some(status)) => step.carry_result(status).await,
            (true, None) => step.activate(self.wallets.snapshot().await).await,
            (false, _) => {}
        }

        let slot = &mut self.slots[index];
        slot.step = step;
        slot.descriptor.title = step_type.title;

        info!("Step {} is now '{}'", id, slot.descriptor.title);
        Ok(slot.descriptor.clone())
    }

    pub async fn set_input(&mut self, index: usize, input: StepInput) -> BridgeResult<()> {
        let step = self.slot(index)?.step.clone();
        step.set_input(input, self.wallets.snapshot().await).await
    }

    /// Start a run by activating the first step; later steps follow completions
    pub async fn execute(&mut self) -> BridgeResult<()> {
        let wallets = self.wallets.snapshot().await;
        let first = match self.slots.first_mut() {
            Some(first) => first,
            None => {
                debug!("Execute requested with no steps");
                return Ok(());
            }
        };

        if first.descriptor.is_to_execute {
            debug!("Run already started");
            return Ok(());
        }

        self.halted = false;
        first.descriptor.is_to_execute = true;
        first.step.activate(wallets).await;
        crate::metrics::set_active_step(Some(0));

        info!("Run started with {} step(s)", self.slots.len());
        Ok(())
    }

    /// Completion of a step: activate its successor
    pub async fn on_executed(&mut self, step_id: StepId, status: ExecutionStatus) {
        let index = match self.slots.iter().position(|s| s.descriptor.id == step_id) {
            Some(index) => index,
            None => {
                warn!("Completion of unknown step {}", step_id);
                return;
            }
        };
        self.last_completed_index = Some(index);
        info!("Step {} at index {} finished: {:?}", step_id, index, status);

        self.activate_successor(index + 1, step_id, status).await;
    }

    /// Activate the step at `next` after `step_id` finished with `status`
    async fn activate_successor(&mut self, next: usize, step_id: StepId, status: ExecutionStatus) {
        if status == ExecutionStatus::Failed && self.halt_on_failure {
            warn!("Run halted after step {} failed", step_id);
            self.halted = true;
            crate::metrics::set_active_step(None);
            return;
        }
        self.activate_at(next).await;
    }

    async fn activate_at(&mut self, next: usize) {
        let wallets = self.wallets.snapshot().await;
        match self.slots.get_mut(next) {
            Some(slot) if !slot.descriptor.is_to_execute => {
                slot.descriptor.is_to_execute = true;
                slot.step.activate(wallets).await;
                crate::metrics::set_active_step(Some(next));
            }
            Some(_) => debug!("Step at index {} already activated", next),
            None => {
                info!("Run complete");
                crate::metrics::set_active_step(None);
            }
        }
    }

    /// Clear activation and results of every step
    pub async fn reset(&mut self) -> BridgeResult<()> {
        for slot in &self.slots {
            if slot.step.is_executing().await {
                return Err(BridgeError::StepBusy {
                    step_id: slot.descriptor.id,
                });
            }
        }

        let wallets = self.wallets.snapshot().await;
        for slot in &mut self.slots {
            slot.step.reset(wallets.clone()).await?;
            slot.descriptor.is_to_execute = false;
        }
        self.last_completed_index = None;
        self.halted = false;
        crate::metrics::set_active_step(None);

        info!("Sequence reset");
        Ok(())
    }

    pub async fn snapshot(&self) -> SequenceSnapshot {
        let mut steps = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            steps.push(slot.step.snapshot().await);
        }
        SequenceSnapshot {
            steps,
            last_completed_index: self.last_completed_index,
            halted: self.halted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAdapter, FakeResolver};
    use crate::step::StepPhase;
    use std::time::Duration;
    use tokio::time::sleep;

    fn builder(adapter: Arc<FakeAdapter>) -> (StepsBuilder, mpsc::UnboundedReceiver<StepEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let builder = StepsBuilder::new(
            Arc::new(StepRegistry::default()),
            Arc::new(FakeResolver::new(adapter)),
            Arc::new(WalletHub::default()),
            tx,
            false,
        );
        (builder, rx)
    }

    #[tokio::test]
    async fn ids_are_issued_per_sequencer() {
        let (mut a, _rx_a) = builder(FakeAdapter::new());
        let (mut b, _rx_b) = builder(FakeAdapter::new());

        assert_eq!(a.add_step().unwrap().id, 0);
        assert_eq!(a.add_step().unwrap().id, 1);
        assert_eq!(b.add_step().unwrap().id, 0);
        assert_eq!(a.add_step().unwrap().title, "Ethereum → Terra");
    }

    #[tokio::test]
    async fn retyping_keeps_id_and_activation() {
        let (mut builder, _rx) = builder(FakeAdapter::new());
        builder.add_step().unwrap();
        builder.execute().await.unwrap();

        let descriptor = builder.select_step_type(0, "Swap on Ethereum").await.unwrap();
        assert_eq!(descriptor.id, 0);
        assert!(descriptor.is_to_execute);
        assert_eq!(descriptor.title, "Swap on Ethereum");

        assert!(builder.select_step_type(0, "Nowhere").await.is_err());
        assert!(builder.select_step_type(3, "Swap on Ethereum").await.is_err());
    }

    #[tokio::test]
    async fn execute_activates_only_the_first_step() {
        let (mut builder, _rx) = builder(FakeAdapter::new());
        builder.add_step().unwrap();
        builder.add_step().unwrap();

        builder.execute().await.unwrap();
        builder.execute().await.unwrap();

        let flags: Vec<_> = builder.descriptors().iter().map(|d| d.is_to_execute).collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn completion_of_last_step_ends_the_run() {
        let (mut builder, _rx) = builder(FakeAdapter::new());
        builder.add_step().unwrap();
        builder.execute().await.unwrap();

        builder.on_executed(0, ExecutionStatus::Success).await;
        let snapshot = builder.snapshot().await;
        assert_eq!(snapshot.last_completed_index, Some(0));

        // unknown ids are ignored
        builder.on_executed(42, ExecutionStatus::Success).await;
        assert_eq!(builder.snapshot().await.last_completed_index, Some(0));
    }

    #[tokio::test]
    async fn removing_before_last_completed_shifts_it() {
        let (mut builder, _rx) = builder(FakeAdapter::new());
        for _ in 0..3 {
            builder.add_step().unwrap();
        }
        builder.execute().await.unwrap();
        builder.on_executed(0, ExecutionStatus::Success).await;
        builder.on_executed(1, ExecutionStatus::Success).await;

        builder.remove_step(0).await.unwrap();
        assert_eq!(builder.snapshot().await.last_completed_index, Some(0));
        assert!(builder.remove_step(5).await.is_err());
    }

    async fn with_inputs(builder: &mut StepsBuilder, amounts: &[&str]) {
        for (index, amount) in amounts.iter().enumerate() {
            builder.add_step().unwrap();
            builder.set_input(index, StepInput::amount(*amount)).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;
    }

    async fn next_completion(rx: &mut mpsc::UnboundedReceiver<StepEvent>) -> (StepId, ExecutionStatus) {
        let StepEvent::Executed { step_id, status } = rx.recv().await.unwrap();
        (step_id, status)
    }

    #[tokio::test(start_paused = true)]
    async fn retyping_a_finished_step_never_runs_it_again() {
        let adapter = FakeAdapter::new();
        let (mut builder, mut rx) = builder(adapter.clone());
        with_inputs(&mut builder, &["1", "2"]).await;
        adapter.set_execute_delay(Duration::from_secs(10));

        builder.execute().await.unwrap();
        let (step_id, status) = next_completion(&mut rx).await;
        builder.on_executed(step_id, status).await;

        let descriptor = builder.select_step_type(0, "Swap on Ethereum").await.unwrap();
        assert!(descriptor.is_to_execute);
        builder.set_input(0, StepInput::amount("7")).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        let snapshot = builder.snapshot().await;
        assert_eq!(snapshot.steps[0].result, Some(ExecutionStatus::Success));
        assert_ne!(snapshot.steps[0].phase, StepPhase::Executing);
        assert_eq!(snapshot.steps[1].phase, StepPhase::Executing);

        let (step_id, _) = next_completion(&mut rx).await;
        assert_eq!(step_id, 1);
        sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(adapter.executed_amounts(), vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_finished_step_before_its_completion_is_handled() {
        let adapter = FakeAdapter::new();
        let (mut builder, mut rx) = builder(adapter.clone());
        with_inputs(&mut builder, &["1", "2"]).await;

        builder.execute().await.unwrap();
        let (step_id, status) = next_completion(&mut rx).await;
        assert_eq!(step_id, 0);

        // completion still queued in the engine when the step goes away
        let removed = builder.remove_step(0).await.unwrap();
        assert_eq!(removed.id, 0);
        builder.on_executed(step_id, status).await;

        let (step_id, status) = next_completion(&mut rx).await;
        assert_eq!(step_id, 1);
        builder.on_executed(step_id, status).await;

        assert_eq!(adapter.executed_amounts(), vec!["1".to_string(), "2".to_string()]);
        assert_eq!(builder.snapshot().await.last_completed_index, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn removing_the_active_step_hands_over_to_its_successor() {
        let adapter = FakeAdapter::new();
        let (mut builder, mut rx) = builder(adapter.clone());
        with_inputs(&mut builder, &["1", "", "3"]).await;

        builder.execute().await.unwrap();
        let (step_id, status) = next_completion(&mut rx).await;
        builder.on_executed(step_id, status).await;
        assert!(builder.descriptors()[1].is_to_execute);

        builder.remove_step(1).await.unwrap();
        assert!(builder.descriptors()[1].is_to_execute);

        let (step_id, _) = next_completion(&mut rx).await;
        assert_eq!(step_id, 2);
        assert_eq!(adapter.executed_amounts(), vec!["1".to_string(), "3".to_string()]);
    }
}
