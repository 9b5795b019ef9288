//! Shepherd 领域模型
//!
//! 实体、派生视图行类型、类型化查询模型、能力接口与状态库抽象。

pub mod entities;
pub mod ports;
pub mod query;
pub mod repositories;
pub mod views;

pub use entities::{
    Attempt, ClaimedTask, DataItem, DataLocation, Filesystem, FilesystemSpec, Job, JobPhase,
    NewData, NewTask, PhaseWindow, Task, TaskState,
};
pub use ports::{
    DataStub, DataStubIter, ExecutionOutcome, Executor, FileAttrs, FilesystemDriver,
    ResourceRequest,
};
pub use query::{Attribute, Comparator, Expression, Key, Predicate, QuerySource, Value};
pub use repositories::JobStore;
pub use views::{
    FilesystemStatusRow, JobStatusRow, JobStatusTotals, TaskStatusRow, ThroughputRow, TodoRow,
};
