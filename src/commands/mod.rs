// Stack lifecycle
pub mod apply;
pub mod destroy;
pub mod init;
pub mod plan;
pub mod validate;

// Inspection
pub mod graph;
pub mod show;

// Tooling
pub mod doctor;
pub mod workflow;
