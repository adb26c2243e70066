pub mod outcome;
pub mod report;
pub mod size;
