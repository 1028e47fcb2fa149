pub mod assignment;
pub mod coordinator;
pub mod shift;

pub use assignment::AssignmentEngine;
pub use coordinator::{DispatchCoordinator, DispatchSettings};
pub use shift::ShiftTracker;
