use super::CliError;
use super::helpers::*;
use anyhow::Context;
use serde_json::json;
use simjob_core::domain::ParentFolder;
use simjob_core::modules::namelist::{read_namelist_input, strip_blocked_keywords};
use simjob_core::modules::{CalculationPlugin, DirectoryRetrieved, JobInputs, ParseRequest};
use std::fs;
use std::path::PathBuf;

#[derive(clap::Args)]
pub(super) struct PrepareArgs {
    /// Code entry point (dakota.study or mpet.mpetrun)
    #[arg(long)]
    code: String,

    /// Parameters JSON file
    #[arg(long)]
    parameters: PathBuf,

    /// Settings JSON file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Parallelization JSON file
    #[arg(long)]
    parallelization: Option<PathBuf>,

    /// Auxiliary parameters as NAME=FILE, repeatable
    #[arg(long = "auxiliary", value_name = "NAME=FILE")]
    auxiliary: Vec<String>,

    /// UUID of the computer holding the parent folder
    #[arg(long, requires = "parent_path")]
    parent_computer: Option<String>,

    /// Remote path of the parent folder
    #[arg(long, requires = "parent_computer")]
    parent_path: Option<String>,

    /// Main input filename
    #[arg(long)]
    input_filename: Option<String>,

    /// Stdout filename
    #[arg(long)]
    output_filename: Option<String>,

    /// Directory the input files are written to
    #[arg(long)]
    sandbox: PathBuf,
}

#[derive(clap::Args)]
pub(super) struct ParseArgs {
    /// Code entry point (dakota.study or mpet.mpetrun)
    #[arg(long)]
    code: String,

    /// Retrieved folder
    #[arg(long)]
    retrieved: PathBuf,

    /// Retrieved temporary folder
    #[arg(long)]
    temporary: Option<PathBuf>,

    /// Fail when no temporary folder is given
    #[arg(long)]
    requires_temporary: bool,

    /// Parameters JSON file the job was prepared with
    #[arg(long)]
    parameters: Option<PathBuf>,

    /// Settings JSON file the job was prepared with
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Stdout filename
    #[arg(long)]
    output_filename: Option<String>,

    /// Do not expect an XML output file
    #[arg(long)]
    without_xml: bool,
}

#[derive(clap::Args)]
pub(super) struct ImmigrateArgs {
    /// Code entry point (dakota.study or mpet.mpetrun)
    #[arg(long)]
    code: String,

    /// Existing input file
    #[arg(long)]
    input: PathBuf,
}

pub(super) fn run_prepare_command(args: PrepareArgs) -> Result<i32, CliError> {
    let profile = load_profile(&args.code)?;
    let mut inputs = JobInputs::new(read_parameters(&args.parameters)?);
    inputs.settings = read_settings(args.settings.as_deref())?;
    inputs.parallelization = args
        .parallelization
        .as_deref()
        .map(read_object)
        .transpose()?;
    inputs.auxiliary_parameters = read_auxiliary(&args.auxiliary)?;
    inputs.parent_folder = args
        .parent_computer
        .zip(args.parent_path)
        .map(|(computer, path)| ParentFolder::new(computer, path));
    inputs.input_filename = args.input_filename;
    inputs.output_filename = args.output_filename;

    let descriptor = profile.prepare(&inputs)?;
    descriptor.write_sandbox(&args.sandbox)?;
    tracing::info!(sandbox = %args.sandbox.display(), "prepared job");
    print_json(&descriptor)?;
    Ok(0)
}

pub(super) fn run_parse_command(args: ParseArgs) -> Result<i32, CliError> {
    let profile = load_profile(&args.code)?;
    let settings = read_settings(args.settings.as_deref())?;
    let retrieved = DirectoryRetrieved::new(&args.retrieved);
    let temporary = args.temporary.as_ref().map(DirectoryRetrieved::new);

    let mut request = ParseRequest::new(&retrieved);
    if let Some(temporary) = &temporary {
        request = request.with_temporary(temporary);
    }
    request.requires_temporary = args.requires_temporary;
    request.output_filename = args.output_filename;
    request.parameters = read_optional_parameters(args.parameters.as_deref())?;
    request.parser_options = settings.parser_options()?;
    request.without_xml = args.without_xml;

    let outcome = profile.parse(&request);
    let fatal = outcome.is_fatal();
    print_json(&json!({
        "exit_code": outcome.exit_code.map(|code| code.label()),
        "exit_status": outcome.exit_code.map_or(0, |code| code.status()),
        "exit_message": outcome.exit_code.map(|code| code.message()),
        "output_parameters": outcome.output_parameters,
        "logs": outcome.logs,
    }))?;

    if fatal { Ok(1) } else { Ok(0) }
}

pub(super) fn run_immigrate_command(args: ImmigrateArgs) -> Result<i32, CliError> {
    let profile = load_profile(&args.code)?;
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read '{}'", args.input.display()))?;
    let mut parameters = read_namelist_input(&content)?;
    for removed in strip_blocked_keywords(&profile, &mut parameters) {
        tracing::warn!(flag = %removed, "dropped blocked keyword from the immigrated input");
    }
    print_json(&parameters)?;
    Ok(0)
}
