pub mod attendance;
pub mod batches;
pub mod core;
pub mod dashboard;
pub mod fees;
pub mod students;
