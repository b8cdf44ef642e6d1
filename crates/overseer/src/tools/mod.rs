//! The action surface exposed to driving models.
//!
//! Each scope has a closed set of actions. The orchestrator's model sees
//! [`SupervisorAction`]; a triage pipeline's model sees [`TriageAction`].
//! Both share the worker-lifecycle actions, which run against the scope's own
//! [`Supervisor`](crate::instance::Supervisor) through [`lifecycle::execute`].
//!
//! # Submodules
//!
//! - [`spec`]: [`ActionSpec`] builder for action descriptions with
//!   `when_to_use` / `when_not_to_use` guidance.
//! - [`core`]: [`ActionOutput`], schema validation and argument parsing.
//! - [`actions`]: argument types and the per-scope action enums.
//! - [`lifecycle`]: the shared worker-lifecycle executor.
//! - [`shell`]: `exec_command` and `create_test_file` for triage.
//! - [`names`]: canonical action names.

pub mod actions;
pub mod core;
pub mod lifecycle;
pub mod names;
pub mod shell;
pub mod spec;

pub use actions::{LifecycleAction, SupervisorAction, TriageAction};
pub use core::{ActionOutput, DEFAULT_MAX_RESULT_CHARS, log_action_call, truncate_result};
pub use lifecycle::{LifecycleDefaults, WorkspacePlacement};
pub use spec::ActionSpec;
