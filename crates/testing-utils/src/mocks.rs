//! Mock implementations of the capability interfaces

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use shepherd_domain::{
    DataStub, DataStubIter, ExecutionOutcome, Executor, Expression, FileAttrs, FilesystemDriver,
    QuerySource, ResourceRequest,
};
use shepherd_errors::{ShepherdError, ShepherdResult};

/// Mock executor handing out a scripted sequence of exit codes
///
/// Once the queue is exhausted every submission succeeds with exit
/// code 0. All submissions are recorded for assertion.
pub struct MockExecutor {
    outcomes: Mutex<VecDeque<i32>>,
    submissions: Mutex<Vec<(i64, String)>>,
    delay: Option<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Queue exit codes to be returned in submission order
    pub fn with_outcomes(self, exit_codes: &[i32]) -> Self {
        self.outcomes.lock().unwrap().extend(exit_codes);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn submissions(&self) -> Vec<(i64, String)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(
        &self,
        attempt_id: i64,
        script: &str,
        _resources: &ResourceRequest,
    ) -> ShepherdResult<ExecutionOutcome> {
        let started_at = Utc::now();
        self.submissions
            .lock()
            .unwrap()
            .push((attempt_id, script.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let exit_code = self.outcomes.lock().unwrap().pop_front().unwrap_or(0);
        Ok(ExecutionOutcome {
            exit_code,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Mock filesystem driver over a fixed file listing
pub struct MockFilesystemDriver {
    files: Vec<DataStub>,
    default_concurrency: i32,
}

impl MockFilesystemDriver {
    pub fn new(addresses: &[&str]) -> Self {
        Self {
            files: addresses
                .iter()
                .map(|a| DataStub {
                    address: a.to_string(),
                    size: None,
                })
                .collect(),
            default_concurrency: 1,
        }
    }

    pub fn with_sizes(addresses: &[(&str, i64)]) -> Self {
        Self {
            files: addresses
                .iter()
                .map(|(a, size)| DataStub {
                    address: a.to_string(),
                    size: Some(*size),
                })
                .collect(),
            default_concurrency: 1,
        }
    }
}

impl FilesystemDriver for MockFilesystemDriver {
    fn driver_key(&self) -> &str {
        "mock"
    }

    fn query(
        &self,
        _source: &QuerySource,
        criteria: Option<&Expression>,
    ) -> ShepherdResult<DataStubIter> {
        if criteria.is_some() {
            return Err(ShepherdError::UnsupportedPredicate(
                "mock driver evaluates no criteria".to_string(),
            ));
        }
        let files = self.files.clone();
        Ok(Box::new(files.into_iter().map(Ok)))
    }

    fn stat(&self, address: &str) -> ShepherdResult<FileAttrs> {
        self.files
            .iter()
            .find(|f| f.address == address)
            .map(|f| FileAttrs {
                size: f.size,
                ..FileAttrs::default()
            })
            .ok_or_else(|| {
                ShepherdError::UnsupportedOperation(format!("no such mock file: {address}"))
            })
    }

    fn max_concurrency_default(&self) -> i32 {
        self.default_concurrency
    }
}
