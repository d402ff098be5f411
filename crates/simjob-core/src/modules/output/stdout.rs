use crate::common::StdoutDialect;
use crate::domain::{Parameters, ResultRecord, number};
use crate::modules::logs::LogContainer;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

pub const OUT_OF_WALLTIME_LABEL: &str = "ERROR_OUT_OF_WALLTIME";
pub const STDOUT_INCOMPLETE_LABEL: &str = "ERROR_OUTPUT_STDOUT_INCOMPLETE";

const WALLTIME_MARKERS: [&str; 3] = [
    "Maximum CPU time exceeded",
    "DUE TO TIME LIMIT",
    "job killed: walltime",
];

const DAKOTA_COMPLETION_MARKER: &str = "Dakota execution time in seconds";
const MPET_COMPLETION_MARKER: &str = "The simulation has finished successfully";
const PYTHON_TRACEBACK_MARKER: &str = "Traceback (most recent call last)";

static DAKOTA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Dakota version (\S+)").expect("valid regex"));
static DAKOTA_EVALUATIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Function evaluation summary(?: \([^)]*\))?: (\d+) total \((\d+) new, (\d+) duplicate\)",
    )
    .expect("valid regex")
});
static DAKOTA_CPU_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total CPU\s*=\s*([-+0-9.eE]+)").expect("valid regex"));
static DAKOTA_WALL_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total wall clock\s*=\s*([-+0-9.eE]+)").expect("valid regex"));
static MPET_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"DAE Tools Version:?\s*(\S+)").expect("valid regex"));
static MPET_RUN_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total run time:?\s*([-+0-9.eE]+)").expect("valid regex"));

impl StdoutDialect {
    /// Line printed once the code exits cleanly, matched ignoring ASCII case.
    pub const fn completion_marker(self) -> &'static str {
        match self {
            Self::Dakota => DAKOTA_COMPLETION_MARKER,
            Self::Mpet => MPET_COMPLETION_MARKER,
        }
    }
}

/// Decodes a stdout file into a partial result and its log.
///
/// Keys already present in `xml_partial` are left to the XML; a differing
/// stdout value is reported as a warning and dropped.
pub fn decode_stdout(
    dialect: StdoutDialect,
    stdout: &str,
    parameters: &Parameters,
    xml_partial: &ResultRecord,
) -> (ResultRecord, LogContainer) {
    let mut logs = LogContainer::new();
    let mut record = ResultRecord::new();

    for line in stdout.lines().map(str::trim) {
        if line.starts_with("Error") || line.starts_with("ERROR") {
            logs.error(line);
        } else if line.starts_with("Warning") || line.starts_with("WARNING") {
            logs.warning(line);
        }
    }

    if WALLTIME_MARKERS.iter().any(|marker| stdout.contains(marker)) {
        logs.error(OUT_OF_WALLTIME_LABEL);
    }

    match dialect {
        StdoutDialect::Dakota => decode_dakota(stdout, parameters, &mut record, &mut logs),
        StdoutDialect::Mpet => decode_mpet(stdout, &mut record, &mut logs),
    }

    let completion_marker = dialect.completion_marker().to_ascii_lowercase();
    if !stdout.to_ascii_lowercase().contains(&completion_marker) {
        logs.error(STDOUT_INCOMPLETE_LABEL);
    }

    let shared: Vec<String> = record
        .keys()
        .filter(|key| xml_partial.contains_key(*key))
        .cloned()
        .collect();
    for key in shared {
        let stdout_value = record.remove(&key);
        if stdout_value.as_ref() != xml_partial.get(&key) {
            logs.warning(format!(
                "'{key}' differs between the XML and stdout outputs, keeping the XML value"
            ));
        }
    }

    (record, logs)
}

fn decode_dakota(
    stdout: &str,
    parameters: &Parameters,
    record: &mut ResultRecord,
    logs: &mut LogContainer,
) {
    if let Some(captures) = DAKOTA_VERSION.captures(stdout) {
        record.insert("code_version".into(), json!(&captures[1]));
    }

    if let Some(captures) = DAKOTA_EVALUATIONS.captures_iter(stdout).last() {
        for (index, key) in [
            "number_of_function_evaluations",
            "number_of_function_evaluations_new",
            "number_of_function_evaluations_duplicate",
        ]
        .into_iter()
        .enumerate()
        {
            if let Ok(count) = captures[index + 1].parse::<i64>() {
                record.insert(key.into(), json!(count));
            }
        }
    }

    if let Some(value) = capture_f64(&DAKOTA_CPU_TIME, stdout) {
        record.insert("cpu_time_seconds".into(), number(value));
    }
    if let Some(value) = capture_f64(&DAKOTA_WALL_TIME, stdout) {
        record.insert("wall_time_seconds".into(), number(value));
    }

    let best_parameters = block_after(stdout, "Best parameters");
    if !best_parameters.is_empty() {
        let mut named = Map::new();
        for line in &best_parameters {
            let mut tokens = line.split_whitespace();
            let (Some(raw), Some(_)) = (tokens.next(), tokens.clone().next()) else {
                continue;
            };
            let name = tokens.collect::<Vec<_>>().join(" ");
            match raw.parse::<f64>() {
                Ok(value) => {
                    named.insert(name, number(value));
                }
                // string-valued variables are reported verbatim
                Err(_) => {
                    named.insert(name, json!(raw));
                }
            }
        }
        for descriptor in descriptors(parameters) {
            if !named.contains_key(&descriptor) {
                logs.warning(format!(
                    "variable '{descriptor}' is missing from the best parameters"
                ));
            }
        }
        record.insert("best_parameters".into(), Value::Object(named));
    }

    let best_objectives: Vec<Value> = block_after(stdout, "Best objective function")
        .iter()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse::<f64>().ok())
        .map(number)
        .collect();
    if !best_objectives.is_empty() {
        record.insert("best_objective_functions".into(), Value::Array(best_objectives));
    }
}

fn decode_mpet(
    stdout: &str,
    record: &mut ResultRecord,
    logs: &mut LogContainer,
) {
    if let Some(captures) = MPET_VERSION.captures(stdout) {
        record.insert("code_version".into(), json!(&captures[1]));
    }
    if let Some(value) = capture_f64(&MPET_RUN_TIME, stdout) {
        record.insert("wall_time_seconds".into(), number(value));
    }

    let traceback = stdout.contains(PYTHON_TRACEBACK_MARKER);
    if traceback {
        let last_line = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .unwrap_or_default();
        logs.error(format!("the simulation raised a Python exception: {last_line}"));
    }
    record.insert("python_traceback".into(), json!(traceback));
}

fn capture_f64(pattern: &Regex, haystack: &str) -> Option<f64> {
    pattern
        .captures_iter(haystack)
        .last()
        .and_then(|captures| captures[1].parse::<f64>().ok())
}

/// Lines following the last `<<<<< {header}` line, up to the next `<<<<<`
/// line or blank line.
fn block_after<'a>(stdout: &'a str, header: &str) -> Vec<&'a str> {
    let lines: Vec<&str> = stdout.lines().collect();
    let Some(start) = lines
        .iter()
        .rposition(|line| line.trim_start().starts_with("<<<<<") && line.contains(header))
    else {
        return Vec::new();
    };
    lines[start + 1..]
        .iter()
        .map(|line| line.trim())
        .take_while(|line| !line.is_empty() && !line.starts_with("<<<<<"))
        .collect()
}

fn descriptors(parameters: &Parameters) -> Vec<String> {
    match parameters
        .get("VARIABLES")
        .and_then(|variables| variables.get("descriptors"))
    {
        Some(Value::String(name)) => vec![name.clone()],
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
