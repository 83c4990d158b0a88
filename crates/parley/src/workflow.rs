//! Workflows run a fixed sequence of model calls, each step seeding the
//! prompt of the next one.
mod context;
pub mod pipeline;
pub mod research;
pub mod router;
pub mod suggestions;
pub mod title;

pub use context::{WorkflowContext, WorkflowStepResult};
pub use pipeline::{DraftReviseStep, DraftReviseWorkflow};
pub use research::{ResearchConfig, ResearchPlan, ResearchWorkflow};
pub use router::{ModelRoute, ModelRouter, RouterConfig};
pub use suggestions::FollowUpSuggestions;
pub use title::TitleGenerator;
