use std::process::{Command, Output};

const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/exports.csv");

/// Run the exportdash binary with the given arguments
fn run_exportdash(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_exportdash"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to spawn exportdash")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "exportdash failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

#[test]
fn test_list_views() {
    let output = run_exportdash(&["--list-views"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert_eq!(text.lines().count(), 8);
    assert!(text.contains("pais-regimen"));
    assert!(text.contains("Logística y Modalidades de Exportación"));
}

#[test]
fn test_view_json_on_stdout() {
    let output = run_exportdash(&["mapa-kg", "--source", FIXTURE]);
    let json = stdout_json(&output);
    assert_eq!(json["slug"], "mapa-kg");
    assert_eq!(json["panels"][0]["kind"], "choropleth");
}

#[test]
fn test_default_view_is_summary() {
    let output = run_exportdash(&["--source", FIXTURE]);
    let json = stdout_json(&output);
    assert_eq!(json["view"], "Resumen General");
    assert_eq!(json["metrics"][0]["value"], "12");
}

#[test]
fn test_controls_flag() {
    let output = run_exportdash(&["comparativo", "--source", FIXTURE, "--controls", r#"country: "México""#]);
    let json = stdout_json(&output);
    assert_eq!(json["selections"]["country"], "México");
    assert_eq!(json["panels"][0]["title"], "Exportaciones de México por Año");
}

#[test]
fn test_options_flag() {
    let output = run_exportdash(&["--options", "--source", FIXTURE]);
    let json = stdout_json(&output);
    assert_eq!(json["transport_modes"][0], "Aéreo");
}

#[test]
fn test_bad_controls_fail() {
    let output = run_exportdash(&["comparativo", "--source", FIXTURE, "--controls", "country = Perú"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--controls"));
}

#[test]
fn test_unknown_view_fails() {
    let output = run_exportdash(&["ventas", "--source", FIXTURE]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ventas"));
}

#[test]
fn test_missing_source_fails() {
    let output = run_exportdash(&["resumen", "--source", "/nonexistent/exports.csv"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load dataset"));
}

#[test]
fn test_png_for_map_is_rejected() {
    let output = run_exportdash(&["mapa-kg", "--source", FIXTURE, "--format", "png"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no PNG renderer"));
}
