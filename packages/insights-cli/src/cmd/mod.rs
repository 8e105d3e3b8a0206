pub mod gaps;
pub mod run;
