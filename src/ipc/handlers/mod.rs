pub mod attendance;
pub mod backup;
pub mod core;
pub mod fees;
pub mod grades;
pub mod roster;
pub mod salaries;
