use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .join("simjob-core/tests/fixtures")
        .join(name)
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent directory should be created");
    }
    fs::write(path, content).expect("file should be written");
}

fn run_simjob(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_simjob"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("simjob binary should run")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|error| {
        panic!(
            "stdout should be JSON ({error}), stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn prepare_writes_the_sandbox_and_prints_the_descriptor() {
    let temp = TempDir::new().expect("tempdir should be created");
    let parameters = temp.path().join("parameters.json");
    let cathode = temp.path().join("cathode.json");
    let parallelization = temp.path().join("parallelization.json");
    let sandbox = temp.path().join("sandbox");
    write_file(
        &parameters,
        r#"{"Sim Params": {"profileType": "CC", "Crate": 1, "tend": 1200.0}}"#,
    );
    write_file(&cathode, r#"{"Material": {"muRfunc": "LiFePO4"}}"#);
    write_file(&parallelization, r#"{"npool": 2}"#);

    let output = run_simjob(&[
        "prepare",
        "--code",
        "mpet.mpetrun",
        "--parameters",
        parameters.to_str().unwrap(),
        "--parallelization",
        parallelization.to_str().unwrap(),
        "--auxiliary",
        &format!("cathode={}", cathode.display()),
        "--parent-computer",
        "c0ffee",
        "--parent-path",
        "/scratch/previous",
        "--sandbox",
        sandbox.to_str().unwrap(),
    ]);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let descriptor = stdout_json(&output);
    assert_eq!(
        descriptor["cmdline_params"],
        serde_json::json!(["-npool", "2", "-in", "aiida.in"])
    );
    assert_eq!(
        descriptor["remote_copy_list"][0]["source_path"],
        "/scratch/previous/out/*"
    );

    let input = fs::read_to_string(sandbox.join("aiida.in")).expect("main input written");
    assert!(input.starts_with("Sim Params\n    Crate = 1\n"));
    let electrode = fs::read_to_string(sandbox.join("aiida_c.in")).expect("cathode input written");
    assert!(electrode.contains("    muRfunc = 'LiFePO4'\n"));
}

#[test]
fn prepare_reports_validation_errors_with_placeholders() {
    let temp = TempDir::new().expect("tempdir should be created");
    let parameters = temp.path().join("parameters.json");
    let settings = temp.path().join("settings.json");
    write_file(&parameters, r#"{"METHOD": {"keywords": "list_parameter_study"}}"#);
    write_file(&settings, r#"{"FIXED_COORDS": []}"#);

    let output = run_simjob(&[
        "prepare",
        "--code",
        "dakota.study",
        "--parameters",
        parameters.to_str().unwrap(),
        "--settings",
        settings.to_str().unwrap(),
        "--sandbox",
        temp.path().join("sandbox").to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR: [INPUT.SETTINGS_UNEXPECTED_KEYS]"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"));
}

#[test]
fn parse_prints_a_successful_classification() {
    let temp = TempDir::new().expect("tempdir should be created");
    let retrieved = temp.path().join("retrieved");
    fs::create_dir_all(&retrieved).expect("retrieved folder");
    fs::copy(fixture_path("dakota.out"), retrieved.join("aiida.out")).expect("stdout copied");
    fs::copy(
        fixture_path("data-file-schema.xml"),
        retrieved.join("data-file-schema.xml"),
    )
    .expect("xml copied");

    let output = run_simjob(&[
        "parse",
        "--code",
        "dakota.study",
        "--retrieved",
        retrieved.to_str().unwrap(),
    ]);

    assert!(
        output.status.success(),
        "command should succeed, stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = stdout_json(&output);
    assert_eq!(report["exit_code"], Value::Null);
    assert_eq!(report["exit_status"], 0);
    assert_eq!(report["output_parameters"]["code_version"], "6.15");
    assert_eq!(report["output_parameters"]["format_name"], "QEXSD");
}

#[test]
fn parse_exits_nonzero_for_fatal_classifications() {
    let temp = TempDir::new().expect("tempdir should be created");
    let retrieved = temp.path().join("retrieved");
    write_file(&retrieved.join("aiida.out"), "DAE Tools Version: 2.2.0\n");

    let output = run_simjob(&[
        "parse",
        "--code",
        "mpet.mpetrun",
        "--retrieved",
        retrieved.to_str().unwrap(),
        "--without-xml",
    ]);

    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["exit_code"], "ERROR_OUTPUT_STDOUT_INCOMPLETE");
    assert_eq!(report["exit_status"], 312);
    assert_eq!(report["output_parameters"], Value::Null);
    assert!(
        report["logs"]
            .as_array()
            .expect("logs should be a list")
            .iter()
            .any(|entry| entry["message"] == "ERROR_OUTPUT_STDOUT_INCOMPLETE")
    );
}

#[test]
fn parse_keeps_results_when_only_the_walltime_was_hit() {
    let temp = TempDir::new().expect("tempdir should be created");
    let retrieved = temp.path().join("retrieved");
    let stdout = fs::read_to_string(fixture_path("mpet.out")).expect("mpet fixture");
    write_file(
        &retrieved.join("aiida.out"),
        &format!("{stdout}job killed: walltime 3600 exceeded limit 3600\n"),
    );

    let output = run_simjob(&[
        "parse",
        "--code",
        "mpet.mpetrun",
        "--retrieved",
        retrieved.to_str().unwrap(),
        "--without-xml",
    ]);

    assert_eq!(output.status.code(), Some(0));
    let report = stdout_json(&output);
    assert_eq!(report["exit_code"], "ERROR_OUT_OF_WALLTIME");
    assert_eq!(report["exit_status"], 400);
    assert_eq!(report["output_parameters"]["code_version"], "2.2.0");
}

#[test]
fn immigrate_reads_an_existing_input_file() {
    let temp = TempDir::new().expect("tempdir should be created");
    let input = temp.path().join("aiida.in");
    write_file(
        &input,
        "Sim Params\n    Crate = 1\n    tsteps = 200\n    prevDir = .false.\n\nGeometry\n    L_c = 5e-5 6e-5\n\n",
    );

    let output = run_simjob(&[
        "immigrate",
        "--code",
        "mpet.mpetrun",
        "--input",
        input.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    let parameters = stdout_json(&output);
    assert_eq!(parameters["Sim Params"]["tsteps"], 200);
    assert_eq!(parameters["Sim Params"]["prevDir"], false);
    assert_eq!(parameters["Geometry"]["L_c"], serde_json::json!([5e-5, 6e-5]));
}

#[test]
fn unknown_entry_points_and_usage_errors_are_rejected() {
    let output = run_simjob(&["immigrate", "--code", "quantumespresso.pw", "--input", "x"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.UNKNOWN_ENTRY_POINT"));

    let output = run_simjob(&["prepare"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("INPUT.CLI_USAGE"));
}
