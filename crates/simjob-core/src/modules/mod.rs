pub mod exit_codes;
pub mod job;
pub mod logs;
pub mod namelist;
pub mod output;
pub mod retrieved;
pub mod serialization;
pub mod settings;

mod traits;

pub use exit_codes::ExitCode;
pub use job::{JobDescriptor, JobInputs, prepare_job};
pub use logs::{LogContainer, LogEntry, LogSeverity};
pub use output::{ParseOutcome, ParseRequest, ParserOptions, parse_output};
pub use retrieved::{DirectoryRetrieved, InMemoryRetrieved, RetrievedFiles};
pub use settings::Settings;
pub use traits::CalculationPlugin;
