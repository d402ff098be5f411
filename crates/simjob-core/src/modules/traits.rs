use crate::common::CodeProfile;
use crate::domain::JobResult;
use crate::modules::job::{JobDescriptor, JobInputs, prepare_job};
use crate::modules::output::{ParseOutcome, ParseRequest, parse_output};

/// The two halves of a calculation plugin: assembling a job and reading its
/// retrieved outputs back.
pub trait CalculationPlugin {
    fn prepare(&self, inputs: &JobInputs) -> JobResult<JobDescriptor>;

    fn parse(&self, request: &ParseRequest<'_>) -> ParseOutcome;
}

impl CalculationPlugin for CodeProfile {
    fn prepare(&self, inputs: &JobInputs) -> JobResult<JobDescriptor> {
        prepare_job(self, inputs)
    }

    fn parse(&self, request: &ParseRequest<'_>) -> ParseOutcome {
        parse_output(self, request)
    }
}

#[cfg(test)]
mod tests {
    use super::CalculationPlugin;
    use crate::common::CodeProfile;
    use crate::domain::{Parameters, SimJobErrorCategory};
    use crate::modules::exit_codes::ExitCode;
    use crate::modules::job::JobInputs;
    use crate::modules::output::ParseRequest;
    use crate::modules::retrieved::InMemoryRetrieved;
    use serde_json::json;

    fn plugins() -> Vec<Box<dyn CalculationPlugin>> {
        vec![
            Box::new(CodeProfile::dakota_study()),
            Box::new(CodeProfile::mpet_run()),
        ]
    }

    #[test]
    fn plugins_are_usable_as_trait_objects() {
        let retrieved = InMemoryRetrieved::new();
        for plugin in plugins() {
            let outcome = plugin.parse(&ParseRequest::new(&retrieved));
            assert_eq!(outcome.exit_code, Some(ExitCode::BothOutputsUnusable));
            assert!(outcome.output_parameters.is_none());
        }
    }

    #[test]
    fn prepare_surfaces_validation_errors() {
        let parameters: Parameters = serde_json::from_value(json!({"UNKNOWN": {"a": 1}}))
            .expect("parameters fixture should deserialize");
        for plugin in plugins() {
            let error = plugin
                .prepare(&JobInputs::new(parameters.clone()))
                .expect_err("unknown namelist should fail");
            assert_eq!(error.category(), SimJobErrorCategory::InputValidationError);
            assert_eq!(error.placeholder(), "INPUT.UNKNOWN_NAMELIST");
        }
    }
}
