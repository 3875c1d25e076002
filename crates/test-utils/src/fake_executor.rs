use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use skytest::engine::OperationEvent;
use skytest::exec::{TestExecutor, TestJob};
use skytest::model::TestOutcome;

/// A fake test executor that:
/// - records which test keys were dispatched, in order
/// - immediately reports a scripted outcome (default: Success).
pub struct FakeTestExecutor {
    events: mpsc::Sender<OperationEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    /// Outcome script per test key, consumed front to back.
    outcomes: HashMap<String, VecDeque<TestOutcome>>,
}

impl FakeTestExecutor {
    pub fn new(
        events: mpsc::Sender<OperationEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            events,
            executed,
            outcomes: HashMap::new(),
        }
    }

    /// Script the outcomes of a test key; once the script is exhausted the
    /// executor reports Success.
    pub fn with_outcomes(mut self, key: &str, outcomes: Vec<TestOutcome>) -> Self {
        self.outcomes.insert(key.to_string(), outcomes.into());
        self
    }
}

impl TestExecutor for FakeTestExecutor {
    fn dispatch(
        &mut self,
        job: TestJob,
        _cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let outcome = self
            .outcomes
            .get_mut(&job.key)
            .and_then(|script| script.pop_front())
            .unwrap_or(TestOutcome::Success);

        let events = self.events.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            executed.lock().unwrap().push(job.key.clone());

            events
                .send(OperationEvent::TaskFinished {
                    task: job.task,
                    dispatch: job.dispatch,
                    outcome,
                    log_file: None,
                    duration: Duration::from_millis(1),
                })
                .await?;
            Ok(())
        })
    }
}
