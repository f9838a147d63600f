pub mod agents;
pub mod approvals;
pub mod events;
pub mod messages;
pub mod monitoring;
pub mod plans;
pub mod projects;
pub mod sessions;
