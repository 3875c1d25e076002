// tests/scheduler_property.rs
//
// Property test over the pure engine core: for arbitrary pool sizes, retry
// budgets and attempt outcomes, a simulated run must terminate with every
// task in a terminal status, the attempt bound respected, and the outcome
// partition matching the discovered count.

mod common;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use skytest::cluster::{ClusterBackend, ClusterGroup, InstanceState};
use skytest::config::ExecutionConfig;
use skytest::engine::{Command, CoreEngine, CoreEvent, OperationEvent};
use skytest::model::{TestEntry, TestOutcome};
use skytest_test_utils::{ExecutionConfigBuilder, FakeClusterBackend, ProviderConfigBuilder};

fn build_core(instances: usize, retries: u32, num_tests: usize) -> CoreEngine {
    let execution = {
        let mut builder = ExecutionConfigBuilder::new("suite").retries(retries);
        for i in 0..num_tests {
            builder = builder.test(&format!("Test{i}"));
        }
        Arc::new(builder.build())
    };

    let tasks: Vec<TestEntry> = execution
        .tests
        .iter()
        .map(|name| TestEntry::new(0, &execution.name, name.clone()))
        .collect();

    let provider = Arc::new(
        ProviderConfigBuilder::new("alpha")
            .instances(instances)
            .retry_count(3)
            .build(),
    );
    let backend: Arc<dyn ClusterBackend> = Arc::new(FakeClusterBackend::new("./kubeconfig"));
    let group = ClusterGroup::new(
        0,
        provider,
        backend,
        instances,
        PathBuf::from("./target/property-test"),
    );

    CoreEngine::new(vec![execution], tasks, vec![group])
}

fn outcome_for(code: u8) -> TestOutcome {
    match code % 4 {
        0 | 1 => TestOutcome::Success,
        2 => TestOutcome::Failed(1),
        _ => TestOutcome::Timeout,
    }
}

proptest! {
    #[test]
    fn simulated_runs_terminate_with_consistent_state(
        instances in 1usize..4,
        retries in 0u32..3,
        num_tests in 1usize..8,
        outcome_codes in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let mut core = build_core(instances, retries, num_tests);
        let execution: Arc<ExecutionConfig> = Arc::clone(&core.executions()[0]);

        let mut events: VecDeque<CoreEvent> = VecDeque::new();
        let mut outcome_idx = 0usize;
        let mut step = core.bootstrap();
        let mut steps = 0usize;

        loop {
            // Translate commands into the events the workers would emit.
            for command in &step.commands {
                match command {
                    Command::StartCluster { instance, .. } => {
                        events.push_back(CoreEvent::Operation(OperationEvent::ClusterReady {
                            instance: instance.id().to_string(),
                            config_location: PathBuf::from("./kubeconfig"),
                        }));
                    }
                    Command::RunTest(job) => {
                        let outcome = outcome_for(outcome_codes[outcome_idx % outcome_codes.len()]);
                        outcome_idx += 1;
                        events.push_back(CoreEvent::Operation(OperationEvent::TaskFinished {
                            task: job.task,
                            dispatch: job.dispatch,
                            outcome,
                            log_file: None,
                            duration: Duration::from_millis(1),
                        }));
                    }
                    Command::DestroyCluster { instance, .. } => {
                        events.push_back(CoreEvent::Operation(OperationEvent::ClusterDestroyed {
                            instance: instance.id().to_string(),
                        }));
                    }
                    Command::CancelProvision { .. } | Command::CancelTest { .. } => {}
                }
            }

            if !step.keep_running {
                break;
            }

            let event = events
                .pop_front()
                .expect("engine kept running with no event in flight");
            step = core.step(event);

            steps += 1;
            prop_assert!(steps < 10_000, "simulation did not terminate");
        }

        // Invariant: every task terminal, exactly once in the partition.
        prop_assert!(core.tasks().iter().all(|t| t.status.is_terminal()));
        prop_assert_eq!(core.completed().len(), num_tests);

        // Invariant: attempts never exceed retries + 1.
        for task in core.tasks() {
            prop_assert!(
                task.attempts <= execution.retries + 1,
                "task {} ran {} times with retries={}",
                task.key,
                task.attempts,
                execution.retries,
            );
        }

        // Invariant: no instance is left Busy or holding a task.
        for group in core.groups() {
            for slot in group.slots() {
                prop_assert!(slot.inst.state().load() != InstanceState::Busy);
                prop_assert!(slot.task_in_flight.is_none());
            }
        }
    }
}
