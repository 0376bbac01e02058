pub mod attempt;
pub mod exam;
pub mod result;
