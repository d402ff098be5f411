mod parallelization;

pub use parallelization::{Parallelization, add_parallelization_flags, validate_parallelization};

use crate::common::CodeProfile;
use crate::domain::{JobResult, Parameters, ParentFolder, RemoteTransfer, SandboxFile, SimJobError};
use crate::modules::namelist::{format_namelists, generate_input};
use crate::modules::serialization::write_text_artifact;
use crate::modules::settings::{
    ADDITIONAL_RETRIEVE_LIST_KEY, CMDLINE_KEY, ONLY_INITIALIZATION_KEY,
    PARENT_FOLDER_SYMLINK_KEY, Settings,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Everything a caller hands over to assemble one job.
#[derive(Debug, Clone, Default)]
pub struct JobInputs {
    pub parameters: Parameters,
    pub settings: Settings,
    pub parallelization: Option<Map<String, Value>>,
    pub parent_folder: Option<ParentFolder>,
    /// Extra parameter sets keyed by the profile's auxiliary input names.
    pub auxiliary_parameters: BTreeMap<String, Parameters>,
    pub input_filename: Option<String>,
    pub output_filename: Option<String>,
}

impl JobInputs {
    pub fn new(parameters: Parameters) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptor {
    pub input_filename: String,
    pub input_content: String,
    pub sandbox_files: Vec<SandboxFile>,
    pub cmdline_params: Vec<String>,
    pub stdout_name: String,
    pub local_copy_list: Vec<RemoteTransfer>,
    pub remote_copy_list: Vec<RemoteTransfer>,
    pub remote_symlink_list: Vec<RemoteTransfer>,
    pub retrieve_list: Vec<String>,
}

impl JobDescriptor {
    /// Writes the main input and every sandbox file below `directory`.
    pub fn write_sandbox(&self, directory: &Path) -> JobResult<()> {
        let files = std::iter::once((self.input_filename.as_str(), self.input_content.as_str()))
            .chain(
                self.sandbox_files
                    .iter()
                    .map(|file| (file.relative_path.as_str(), file.content.as_str())),
            );
        for (relative_path, content) in files {
            let path = directory.join(relative_path);
            write_text_artifact(&path, content).map_err(|source| {
                SimJobError::io_system(
                    "IO.SANDBOX_WRITE",
                    format!("failed to write '{}': {source}", path.display()),
                )
            })?;
            debug!(path = %path.display(), "wrote sandbox file");
        }
        Ok(())
    }
}

/// Assembles the job descriptor: main input, sandbox files, command line,
/// restart transfers and retrieve list.
pub fn prepare_job(profile: &CodeProfile, inputs: &JobInputs) -> JobResult<JobDescriptor> {
    let mut settings = inputs.settings.clone();
    let input_filename = inputs
        .input_filename
        .clone()
        .unwrap_or_else(|| profile.default_input_filename.clone());
    let stdout_name = inputs
        .output_filename
        .clone()
        .unwrap_or_else(|| profile.default_output_filename.clone());

    let parallelization = match &inputs.parallelization {
        Some(value) => validate_parallelization(profile, value)?,
        None => Parallelization::new(),
    };

    let namelists = settings.take_namelists()?;
    let input_content = generate_input(profile, &inputs.parameters, namelists.as_deref())?;

    let mut sandbox_files = auxiliary_inputs(profile, &inputs.auxiliary_parameters)?;

    let local_copy_list = Vec::new();
    let mut remote_copy_list = Vec::new();
    let mut remote_symlink_list = Vec::new();
    let symlink = settings
        .take_bool(PARENT_FOLDER_SYMLINK_KEY)?
        .unwrap_or(profile.default_symlink_usage);
    if let Some(parent) = &inputs.parent_folder {
        let transfer = RemoteTransfer {
            computer_uuid: parent.computer_uuid.clone(),
            source_path: join_remote(&parent.remote_path, &profile.restart_copy_from),
            destination: profile.restart_copy_to.clone(),
        };
        info!(
            source = %transfer.source_path,
            symlink,
            "restarting from parent folder"
        );
        if symlink {
            remote_symlink_list.push(transfer);
        } else {
            remote_copy_list.push(transfer);
        }
    }

    if settings.take_bool(ONLY_INITIALIZATION_KEY)?.unwrap_or(false) {
        sandbox_files.push(SandboxFile::new(profile.stop_filename(), "\n"));
    }

    let mut retrieve_list = vec![stdout_name.clone()];
    retrieve_list.extend(settings.take_string_list(ADDITIONAL_RETRIEVE_LIST_KEY)?);
    retrieve_list.extend(profile.internal_retrieve_list.iter().cloned());

    let cmdline = settings.take_string_list(CMDLINE_KEY)?;
    let mut cmdline_params = add_parallelization_flags(profile, &cmdline, &parallelization)?;
    if let Some(flag) = &profile.input_flag {
        cmdline_params.push(flag.clone());
    }
    cmdline_params.push(input_filename.clone());

    // validated here, consumed by the parser
    settings.take_parser_options()?;
    settings.ensure_consumed()?;

    Ok(JobDescriptor {
        input_filename,
        input_content,
        sandbox_files,
        cmdline_params,
        stdout_name,
        local_copy_list,
        remote_copy_list,
        remote_symlink_list,
        retrieve_list,
    })
}

fn auxiliary_inputs(
    profile: &CodeProfile,
    auxiliary_parameters: &BTreeMap<String, Parameters>,
) -> JobResult<Vec<SandboxFile>> {
    let unknown: Vec<&str> = auxiliary_parameters
        .keys()
        .filter(|name| profile.auxiliary_input(name).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        let declared = profile
            .auxiliary_inputs
            .iter()
            .map(|input| input.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SimJobError::input_validation(
            "INPUT.UNKNOWN_AUXILIARY_INPUT",
            format!(
                "auxiliary inputs {} are not used by '{}'; declared auxiliary inputs: [{declared}]",
                unknown.join(", "),
                profile.entry_point
            ),
        ));
    }

    let mut files = Vec::new();
    for auxiliary in &profile.auxiliary_inputs {
        let Some(parameters) = auxiliary_parameters.get(&auxiliary.name) else {
            continue;
        };
        let content = format_namelists(parameters.clone(), &auxiliary.namelists)?;
        files.push(SandboxFile::new(auxiliary.filename.clone(), content));
    }
    Ok(files)
}

fn join_remote(base: &str, relative: &str) -> String {
    let relative = relative.strip_prefix("./").unwrap_or(relative);
    if base.ends_with('/') {
        format!("{base}{relative}")
    } else {
        format!("{base}/{relative}")
    }
}
