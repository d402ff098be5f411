pub mod constants;
pub mod profiles;

pub use profiles::{
    AuxiliaryInput, BlockedKeyword, CalculationTypeSource, CodeProfile, ParallelizationFlag,
    StdoutDialect,
};
