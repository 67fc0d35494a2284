//! Repository traits for metadata operations.

pub mod records;
pub mod sweep_runs;

pub use records::RecordRepo;
pub use sweep_runs::SweepRunRepo;
