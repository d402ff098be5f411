//! Per-code capability tables.
//!
//! Every lookup table that drives input formatting, job assembly and output
//! parsing for one wrapped code lives in a [`CodeProfile`] value. Callers that
//! need a variation build a modified profile instead of overriding tables.

use crate::domain::{JobResult, ParamValue, Parameters, SimJobError};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParallelizationFlag {
    Nimage,
    Npool,
    Nband,
    Ntg,
    Ndiag,
    Nhw,
}

impl ParallelizationFlag {
    pub const ALL: [ParallelizationFlag; 6] = [
        Self::Nimage,
        Self::Npool,
        Self::Nband,
        Self::Ntg,
        Self::Ndiag,
        Self::Nhw,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Nimage => "nimage",
            Self::Npool => "npool",
            Self::Nband => "nband",
            Self::Ntg => "ntg",
            Self::Ndiag => "ndiag",
            Self::Nhw => "nhw",
        }
    }

    /// Historical command-line spellings accepted for the flag.
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Nimage => &["ni", "nimages", "npot"],
            Self::Npool => &["nk", "npools"],
            Self::Nband => &["nb", "nbgrp", "nband_group"],
            Self::Ntg => &["nt", "ntask_groups", "nyfft"],
            Self::Ndiag => &["northo", "nd", "nproc_diag", "nproc_ortho"],
            Self::Nhw => &["nh", "n_howmany", "howmany"],
        }
    }

    pub const fn help(self) -> &'static str {
        match self {
            Self::Nimage => {
                "The number of 'images', each corresponding to a different self-consistent or linear-response calculation."
            }
            Self::Npool => "The number of 'pools', each taking care of a group of k-points.",
            Self::Nband => {
                "The number of 'band groups', each taking care of a group of Kohn-Sham orbitals."
            }
            Self::Ntg => "The number of 'task groups' across which the FFT planes are distributed.",
            Self::Ndiag => {
                "The number of 'linear algebra groups' used when parallelizing the subspace diagonalization / iterative orthonormalization."
            }
            Self::Nhw => "The 'nmany' FFT bands parallelization option.",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|flag| flag.name() == name)
    }
}

impl Display for ParallelizationFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).name())
    }
}

/// A flag the user may not set in a namelist; when `default` is present the
/// plugin sets it instead.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedKeyword {
    pub namelist: String,
    pub flag: String,
    pub default: Option<ParamValue>,
}

impl BlockedKeyword {
    pub fn new(namelist: impl Into<String>, flag: impl Into<String>) -> Self {
        Self {
            namelist: namelist.into(),
            flag: flag.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalculationTypeSource {
    Fixed(String),
    Key { namelist: String, key: String },
}

impl CalculationTypeSource {
    pub fn resolve(&self, parameters: &Parameters) -> JobResult<String> {
        match self {
            Self::Fixed(name) => Ok(name.clone()),
            Self::Key { namelist, key } => parameters
                .get(namelist)
                .and_then(|values| values.get(key))
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    SimJobError::input_validation(
                        "INPUT.CALCULATION_TYPE",
                        format!(
                            "no '{key}' in the '{namelist}' namelist; it is required for automatic detection of the namelists to print, otherwise set NAMELISTS in the settings"
                        ),
                    )
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdoutDialect {
    Dakota,
    Mpet,
}

/// A parameter set written to its own input file next to the main one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxiliaryInput {
    pub name: String,
    pub filename: String,
    pub namelists: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeProfile {
    pub entry_point: String,
    pub prefix: String,
    pub default_input_filename: String,
    pub default_output_filename: String,
    pub automatic_namelists: Vec<(String, Vec<String>)>,
    pub calculation_type: CalculationTypeSource,
    pub blocked_keywords: Vec<BlockedKeyword>,
    pub enabled_parallelization_flags: Vec<ParallelizationFlag>,
    pub default_symlink_usage: bool,
    pub restart_copy_from: String,
    pub restart_copy_to: String,
    pub input_flag: Option<String>,
    pub internal_retrieve_list: Vec<String>,
    pub xml_filenames: Vec<String>,
    pub stdout_dialect: StdoutDialect,
    pub auxiliary_inputs: Vec<AuxiliaryInput>,
}

pub const DAKOTA_STUDY_ENTRY_POINT: &str = "dakota.study";
pub const MPET_RUN_ENTRY_POINT: &str = "mpet.mpetrun";

const XML_FILENAME_SCHEMA: &str = "data-file-schema.xml";
const XML_FILENAME_LEGACY: &str = "data-file.xml";

impl CodeProfile {
    pub fn dakota_study() -> Self {
        Self {
            entry_point: DAKOTA_STUDY_ENTRY_POINT.to_string(),
            prefix: "aiida".to_string(),
            default_input_filename: "aiida.in".to_string(),
            default_output_filename: "aiida.out".to_string(),
            automatic_namelists: vec![(
                "default".to_string(),
                strings(&[
                    "ENVIRONMENT",
                    "METHOD",
                    "MODEL",
                    "VARIABLES",
                    "INTERFACE",
                    "RESPONSES",
                ]),
            )],
            calculation_type: CalculationTypeSource::Fixed("default".to_string()),
            blocked_keywords: Vec::new(),
            enabled_parallelization_flags: Vec::new(),
            default_symlink_usage: true,
            restart_copy_from: "./out/*".to_string(),
            restart_copy_to: "./out/".to_string(),
            input_flag: Some("-in".to_string()),
            internal_retrieve_list: Vec::new(),
            xml_filenames: strings(&[XML_FILENAME_SCHEMA, XML_FILENAME_LEGACY]),
            stdout_dialect: StdoutDialect::Dakota,
            auxiliary_inputs: Vec::new(),
        }
    }

    pub fn mpet_run() -> Self {
        let electrode_namelists = strings(&["Particles", "Material", "Reactions"]);
        Self {
            entry_point: MPET_RUN_ENTRY_POINT.to_string(),
            prefix: "aiida".to_string(),
            default_input_filename: "aiida.in".to_string(),
            default_output_filename: "aiida.out".to_string(),
            automatic_namelists: vec![(
                "default".to_string(),
                strings(&[
                    "Sim Params",
                    "Electrodes",
                    "Particles",
                    "Conductivity",
                    "Geometry",
                    "Electrolyte",
                    "Material",
                    "Reactions",
                ]),
            )],
            calculation_type: CalculationTypeSource::Fixed("default".to_string()),
            blocked_keywords: Vec::new(),
            enabled_parallelization_flags: vec![
                ParallelizationFlag::Npool,
                ParallelizationFlag::Nband,
                ParallelizationFlag::Ntg,
                ParallelizationFlag::Ndiag,
            ],
            // multiple runs may start from the same parent, so restarts copy
            default_symlink_usage: false,
            restart_copy_from: "./out/*".to_string(),
            restart_copy_to: "./out/".to_string(),
            input_flag: Some("-in".to_string()),
            internal_retrieve_list: Vec::new(),
            xml_filenames: strings(&[XML_FILENAME_SCHEMA, XML_FILENAME_LEGACY]),
            stdout_dialect: StdoutDialect::Mpet,
            auxiliary_inputs: vec![
                AuxiliaryInput {
                    name: "cathode".to_string(),
                    filename: "aiida_c.in".to_string(),
                    namelists: electrode_namelists.clone(),
                },
                AuxiliaryInput {
                    name: "anode".to_string(),
                    filename: "aiida_a.in".to_string(),
                    namelists: electrode_namelists,
                },
            ],
        }
    }

    pub fn from_entry_point(entry_point: &str) -> JobResult<Self> {
        match entry_point {
            DAKOTA_STUDY_ENTRY_POINT => Ok(Self::dakota_study()),
            MPET_RUN_ENTRY_POINT => Ok(Self::mpet_run()),
            other => Err(SimJobError::input_validation(
                "INPUT.UNKNOWN_ENTRY_POINT",
                format!(
                    "unknown code entry point '{other}'; expected '{DAKOTA_STUDY_ENTRY_POINT}' or '{MPET_RUN_ENTRY_POINT}'"
                ),
            )),
        }
    }

    pub fn automatic_namelists_for(&self, calculation_type: &str) -> Option<&[String]> {
        self.automatic_namelists
            .iter()
            .find(|(name, _)| name == calculation_type)
            .map(|(_, namelists)| namelists.as_slice())
    }

    pub fn auxiliary_input(&self, name: &str) -> Option<&AuxiliaryInput> {
        self.auxiliary_inputs.iter().find(|input| input.name == name)
    }

    pub fn stop_filename(&self) -> String {
        format!("{}.EXIT", self.prefix)
    }

    pub fn parallelization_help(&self) -> String {
        self.enabled_parallelization_flags
            .iter()
            .map(|flag| format!("{:<7}: {}", flag.name(), flag.help()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}
