pub mod api;
pub mod dataset;
pub mod job;
pub mod ops;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod task;
pub mod worker;

pub use api::{
    ApiError, ConfigureTaskRequest, ConfigureTaskResponse, CreateTaskRequest,
    CreateTaskResponse, TaskListQuery,
};
pub use job::{
    Job, JobClaimRequest, JobClaimResponse, JobCompleteRequest, JobCompleteResponse, JobId,
    JobState, JobStatusResponse, ProgressUpdateRequest, ProgressUpdateResponse,
};
pub use progress::{merged_view, ProgressEvent, TaskProgressView};
pub use task::{
    operations_from_config, OperationSpec, Task, TaskConfig, TaskId, TaskStatus,
};
pub use worker::{
    WorkerHeartbeatRequest, WorkerHeartbeatResponse, WorkerId, WorkerMetrics,
    WorkerRegisterRequest, WorkerRegisterResponse,
};
