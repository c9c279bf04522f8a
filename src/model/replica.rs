use ndarray::ArrayView4;

use super::network::{LearningPhase, Network, RawOutputs};
use super::ModelError;

/// Copies of one network on several devices. Batches are single images, so calls
/// rotate across the replicas instead of splitting a batch.
pub struct ReplicatedNetwork {
    replicas: Vec<Box<dyn Network>>,
    next: usize,
}

impl ReplicatedNetwork {
    pub fn new(first: Box<dyn Network>, rest: Vec<Box<dyn Network>>) -> Self {
        let mut replicas = Vec::with_capacity(rest.len() + 1);
        replicas.push(first);
        replicas.extend(rest);
        Self { replicas, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }
}

impl Network for ReplicatedNetwork {
    fn output_channels(&self) -> &[usize] {
        self.replicas[0].output_channels()
    }

    fn infer(
        &mut self,
        input: ArrayView4<'_, f32>,
        phase: LearningPhase,
    ) -> Result<RawOutputs, ModelError> {
        let index = self.next;
        self.next = (self.next + 1) % self.replicas.len();
        self.replicas[index].infer(input, phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNetwork;
    use ndarray::Array4;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_single_replica_takes_every_call() {
        let only = FakeNetwork::new(vec![255]);
        let calls = only.calls.clone();
        let mut replicated = ReplicatedNetwork::new(Box::new(only), Vec::new());
        assert_eq!(replicated.len(), 1);
        let input = Array4::<f32>::zeros((1, 3, 32, 32));
        for _ in 0..2 {
            replicated
                .infer(input.view(), LearningPhase::Inference)
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_calls_rotate_across_replicas() {
        let a = FakeNetwork::new(vec![255]);
        let b = FakeNetwork::new(vec![255]);
        let (calls_a, calls_b) = (a.calls.clone(), b.calls.clone());

        let mut replicated = ReplicatedNetwork::new(Box::new(a), vec![Box::new(b)]);
        assert_eq!(replicated.len(), 2);
        let input = Array4::<f32>::zeros((1, 3, 32, 32));
        for _ in 0..3 {
            replicated
                .infer(input.view(), LearningPhase::Inference)
                .unwrap();
        }

        assert_eq!(calls_a.load(Ordering::SeqCst), 2);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }
}
