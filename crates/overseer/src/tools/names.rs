//! Canonical action name constants.
//!
//! Action-name string literals reference these constants so that renames
//! touch only this file.

// Worker lifecycle (both scopes).
pub const SPAWN_INSTANCE: &str = "spawn_instance";
pub const TERMINATE_INSTANCE: &str = "terminate_instance";
pub const SEND_FOLLOWUP: &str = "send_followup";
pub const LIST_INSTANCES: &str = "list_instances";
pub const READ_INSTANCE_LOGS: &str = "read_instance_logs";
pub const WAIT_FOR_INSTANCE: &str = "wait_for_instance";

// Top level.
pub const WRITE_NOTE: &str = "write_note";
pub const READ_NOTES: &str = "read_notes";
pub const READ_SUPERVISOR_CONVERSATION: &str = "read_supervisor_conversation";
pub const SEARCH_SUPERVISOR_HISTORY: &str = "search_supervisor_history";
pub const SUBMIT_FINDING: &str = "submit_finding";
pub const FINISHED: &str = "finished";

// Triage.
pub const EXEC_COMMAND: &str = "exec_command";
pub const CREATE_TEST_FILE: &str = "create_test_file";
pub const LOG_FINDING: &str = "log_finding";
pub const FINISHED_PHASE_1: &str = "finished_phase_1";
pub const FINISHED_PHASE_2: &str = "finished_phase_2";
pub const FINISHED_PHASE_3: &str = "finished_phase_3";
