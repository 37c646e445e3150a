//! Canonical event kind constants shared across services.
//!
//! Centralizes the string tags used when journaling and filtering events so
//! the kernel, the stream server, and external viewers stay in sync. Keep
//! each section alphabetized and favor snake_case names.

// Agents
pub const KIND_AGENT_REGISTERED: &str = "agent_registered";

// Messaging
pub const KIND_MESSAGE_ACKED: &str = "message_acked";
pub const KIND_MESSAGE_READ: &str = "message_read";
pub const KIND_MESSAGE_SENT: &str = "message_sent";

// File reservations
pub const KIND_FILE_RELEASED: &str = "file_released";
pub const KIND_FILE_RESERVED: &str = "file_reserved";

// Beads (work items)
pub const KIND_BEAD_CLOSED: &str = "bead_closed";
pub const KIND_BEAD_COMMENT_ADDED: &str = "bead_comment_added";
pub const KIND_BEAD_COMMENT_DELETED: &str = "bead_comment_deleted";
pub const KIND_BEAD_COMMENT_UPDATED: &str = "bead_comment_updated";
pub const KIND_BEAD_CREATED: &str = "bead_created";
pub const KIND_BEAD_DELETED: &str = "bead_deleted";
pub const KIND_BEAD_DEPENDENCY_ADDED: &str = "bead_dependency_added";
pub const KIND_BEAD_DEPENDENCY_REMOVED: &str = "bead_dependency_removed";
pub const KIND_BEAD_LABEL_ADDED: &str = "bead_label_added";
pub const KIND_BEAD_LABEL_REMOVED: &str = "bead_label_removed";
pub const KIND_BEAD_REOPENED: &str = "bead_reopened";
pub const KIND_BEAD_STATUS_CHANGED: &str = "bead_status_changed";
pub const KIND_BEAD_UPDATED: &str = "bead_updated";
pub const KIND_EPIC_CHILD_ADDED: &str = "epic_child_added";
pub const KIND_EPIC_CHILD_REMOVED: &str = "epic_child_removed";

// Memory
pub const KIND_MEMORY_REMOVED: &str = "memory_removed";
pub const KIND_MEMORY_STORED: &str = "memory_stored";
pub const KIND_MEMORY_VALIDATED: &str = "memory_validated";

// Outcomes / checkpoints
pub const KIND_CHECKPOINT_CREATED: &str = "checkpoint_created";
pub const KIND_OUTCOME_RECORDED: &str = "outcome_recorded";

/// Every kind the kernel journals, in one place for filters and viewers.
pub const ALL_KINDS: &[&str] = &[
    KIND_AGENT_REGISTERED,
    KIND_MESSAGE_SENT,
    KIND_MESSAGE_READ,
    KIND_MESSAGE_ACKED,
    KIND_FILE_RESERVED,
    KIND_FILE_RELEASED,
    KIND_BEAD_CREATED,
    KIND_BEAD_UPDATED,
    KIND_BEAD_STATUS_CHANGED,
    KIND_BEAD_CLOSED,
    KIND_BEAD_REOPENED,
    KIND_BEAD_DELETED,
    KIND_BEAD_DEPENDENCY_ADDED,
    KIND_BEAD_DEPENDENCY_REMOVED,
    KIND_BEAD_LABEL_ADDED,
    KIND_BEAD_LABEL_REMOVED,
    KIND_BEAD_COMMENT_ADDED,
    KIND_BEAD_COMMENT_UPDATED,
    KIND_BEAD_COMMENT_DELETED,
    KIND_EPIC_CHILD_ADDED,
    KIND_EPIC_CHILD_REMOVED,
    KIND_MEMORY_STORED,
    KIND_MEMORY_VALIDATED,
    KIND_MEMORY_REMOVED,
    KIND_OUTCOME_RECORDED,
    KIND_CHECKPOINT_CREATED,
];
