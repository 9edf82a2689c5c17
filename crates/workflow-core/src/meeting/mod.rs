//! Simulated multi-participant deliberation producing structured minutes

pub mod agenda;
pub mod participants;
pub mod opinion;
pub mod coordinator;

pub use coordinator::MeetingCoordinator;
pub use opinion::{OpinionContext, OpinionGenerator, TemplateOpinionGenerator};
