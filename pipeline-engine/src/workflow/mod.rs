// Workflow Model
// Raw YAML document types and the validated, indexed definition built from them

pub mod definition;
pub mod models;

pub use definition::{
    JobSpec, MatrixStrategy, MatrixValue, StepAction, StepSpec, WorkflowDefinition,
};
pub use models::{
    Concurrency, EventConfig, Job, JobList, JobNeeds, Matrix, Step, Strategy, Trigger, Workflow,
};
