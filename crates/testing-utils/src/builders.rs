//! Test data builders and scenario seeding
//!
//! This module provides helpers for seeding a state store with known
//! jobs, filesystems, data items and task chains, so that view-level
//! behaviour can be asserted against a fixed fixture.

use shepherd_domain::{FilesystemSpec, Job, JobPhase, JobStore, NewData, NewTask, Task};
use shepherd_errors::ShepherdResult;

/// Builder for a single-filesystem job fixture
pub struct JobFixtureBuilder {
    client_ref: String,
    max_attempts: i32,
    filesystem: FilesystemSpec,
}

impl JobFixtureBuilder {
    pub fn new() -> Self {
        Self {
            client_ref: "test-client".to_string(),
            max_attempts: 3,
            filesystem: FilesystemSpec {
                name: "xyzzy".to_string(),
                driver: "posix".to_string(),
                max_concurrency: 10,
            },
        }
    }

    pub fn with_client_ref(mut self, client_ref: &str) -> Self {
        self.client_ref = client_ref.to_string();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_filesystem(mut self, name: &str, max_concurrency: i32) -> Self {
        self.filesystem.name = name.to_string();
        self.filesystem.max_concurrency = max_concurrency;
        self
    }

    pub async fn build(self, store: &dyn JobStore) -> ShepherdResult<JobFixture> {
        let job = store.create_job(&self.client_ref, self.max_attempts).await?;
        let filesystem = store.register_filesystem(job.id, &self.filesystem).await?;
        Ok(JobFixture {
            job,
            filesystem_id: filesystem.id,
            filesystem_name: filesystem.name,
        })
    }
}

impl Default for JobFixtureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct JobFixture {
    pub job: Job,
    pub filesystem_id: i64,
    pub filesystem_name: String,
}

impl JobFixture {
    /// Insert a task on this fixture's filesystem
    pub async fn insert_task(
        &self,
        store: &dyn JobStore,
        source: &str,
        target: &str,
        script: &str,
    ) -> ShepherdResult<Task> {
        let chain = [NewTask {
            source: NewData {
                filesystem: self.filesystem_id,
                address: source.to_string(),
                size: None,
            },
            target: NewData {
                filesystem: self.filesystem_id,
                address: target.to_string(),
                size: None,
            },
            script: script.to_string(),
        }];
        let mut inserted = store.insert_task_chain(self.job.id, &chain).await?;
        Ok(inserted.remove(0))
    }
}

/// Canonical two-task fixture: one filesystem "xyzzy" with concurrency
/// cap 10, three data items `foo`, `bar`, `quux`, task T1 `foo -> bar`
/// and task T2 `bar -> quux` depending on T1, with `max_attempts = 3`.
/// The transfer phase is opened so the tasks are observable through
/// `todo` (a job with no open transfer phase produces no rows).
pub struct XyzzyScenario {
    pub fixture: JobFixture,
    pub t1: Task,
    pub t2: Task,
}

pub async fn seed_xyzzy_scenario(store: &dyn JobStore) -> ShepherdResult<XyzzyScenario> {
    let fixture = JobFixtureBuilder::new()
        .with_filesystem("xyzzy", 10)
        .with_max_attempts(3)
        .build(store)
        .await?;

    let chain = [
        NewTask {
            source: NewData {
                filesystem: fixture.filesystem_id,
                address: "foo".to_string(),
                size: None,
            },
            target: NewData {
                filesystem: fixture.filesystem_id,
                address: "bar".to_string(),
                size: None,
            },
            script: "abc123".to_string(),
        },
        NewTask {
            source: NewData {
                filesystem: fixture.filesystem_id,
                address: "bar".to_string(),
                size: None,
            },
            target: NewData {
                filesystem: fixture.filesystem_id,
                address: "quux".to_string(),
                size: None,
            },
            script: "123abc".to_string(),
        },
    ];

    let mut tasks = store.insert_task_chain(fixture.job.id, &chain).await?;
    let t2 = tasks.remove(1);
    let t1 = tasks.remove(0);

    store
        .open_phase(fixture.job.id, JobPhase::Transfer)
        .await?;

    Ok(XyzzyScenario { fixture, t1, t2 })
}
