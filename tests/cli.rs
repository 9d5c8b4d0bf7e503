mod common;

use std::fs;

use assert_cmd::Command;
use csv_harmonizer::data::Value;
use predicates::str::contains;

use common::{TestWorkspace, fixture_path};

fn ingest(workspace: &TestWorkspace, fixture: &str) -> assert_cmd::assert::Assert {
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "ingest",
            "-i",
            fixture_path(fixture).to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
            "--store",
            workspace.store_path().to_str().unwrap(),
        ])
        .assert()
}

#[test]
fn ingest_prints_summary_and_persists_records() {
    let workspace = TestWorkspace::new();
    ingest(&workspace, "trial_a_visits.csv")
        .success()
        .stdout(contains("=== Ingestion Summary ==="))
        .stdout(contains("Source dataset:"))
        .stdout(contains("trial_a"))
        .stdout(contains("Records created:         3"))
        .stdout(contains("✓ Ingestion completed successfully"));

    let store = workspace.load_store();
    assert_eq!(store.len(), 3);
    assert_eq!(store.records()[1].get("age"), Some(&Value::Integer(47)));
    assert_eq!(
        store.records()[1].get("treatment_group"),
        Some(&Value::from("Treatment"))
    );
}

#[test]
fn reingesting_the_same_file_only_skips_duplicates() {
    let workspace = TestWorkspace::new();
    ingest(&workspace, "trial_a_visits.csv").success();
    ingest(&workspace, "trial_a_visits.csv")
        .success()
        .stdout(contains("Records created:         0"))
        .stdout(contains("Duplicates skipped:      3"))
        .stdout(contains("✓ Ingestion completed successfully"));
    assert_eq!(workspace.load_store().len(), 3);
}

#[test]
fn tab_separated_source_is_detected_by_extension() {
    let workspace = TestWorkspace::new();
    ingest(&workspace, "trial_b_visits.tsv")
        .success()
        .stdout(contains("trial_b"));
    let store = workspace.load_store();
    assert_eq!(store.records()[0].get("sex"), Some(&Value::from("Female")));
}

#[test]
fn climate_ingested_after_clinical_updates_visits() {
    let workspace = TestWorkspace::new();
    ingest(&workspace, "trial_a_visits.csv").success();
    ingest(&workspace, "trial_b_visits.tsv").success();
    ingest(&workspace, "station_climate.csv")
        .success()
        .stdout(contains("Records updated:         4"))
        .stdout(contains("Unattached climate rows: 1"));

    let store = workspace.load_store();
    let p003 = store
        .records()
        .iter()
        .find(|record| record.get("participant_id") == Some(&Value::from("P003")))
        .expect("P003 stored");
    assert_eq!(p003.get("temperature"), Some(&Value::Float(19.0)));
    assert_eq!(p003.get("humidity"), None);
    assert_eq!(p003.get("age"), Some(&Value::Integer(61)));
}

#[test]
fn row_level_problems_are_reported_without_failing_the_command() {
    let workspace = TestWorkspace::new();
    let diagnostics = workspace.file("diagnostics.jsonl");
    let summary = workspace.file("summary.json");
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "ingest",
            "-i",
            fixture_path("trial_a_messy.csv").to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
            "--store",
            workspace.store_path().to_str().unwrap(),
            "--diagnostics",
            diagnostics.to_str().unwrap(),
            "--summary-json",
            summary.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Total rows:     3"))
        .stdout(contains("✗ Ingestion completed with 5 errors"));

    let lines = fs::read_to_string(&diagnostics).expect("read diagnostics");
    let kinds = lines
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json line");
            value["kind"].as_str().expect("kind").to_string()
        })
        .collect::<Vec<_>>();
    assert!(kinds.contains(&"type-error".to_string()));
    assert!(kinds.contains(&"validation-error".to_string()));
    assert!(kinds.contains(&"missing-required".to_string()));

    let stats: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&summary).expect("read summary"))
            .expect("summary json");
    assert_eq!(stats["rows_read"], 3);
    assert_eq!(stats["missing_required"], 2);
    assert_eq!(stats["type_errors"], 2);
    assert_eq!(stats["validation_errors"], 1);
    assert_eq!(stats["created"], 1);
    assert!(
        !stats["columns"]
            .as_array()
            .expect("columns")
            .iter()
            .any(|column| *column == "notes")
    );
}

#[test]
fn dry_run_leaves_the_store_untouched() {
    let workspace = TestWorkspace::new();
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "ingest",
            "-i",
            fixture_path("trial_a_visits.csv").to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
            "--store",
            workspace.store_path().to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(contains("Records created:         3"));
    assert!(!workspace.store_path().exists());
}

#[test]
fn unrecognised_headers_abort_the_run() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("unknown.csv", "foo,bar\n1,2\n");
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "ingest",
            "-i",
            input.to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
            "--store",
            workspace.store_path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("Could not infer source dataset"));
    assert!(!workspace.store_path().exists());
}

#[test]
fn invalid_schema_is_rejected_before_reading_rows() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write(
        "bad.yml",
        "fields:\n  age:\n    datatype: decimal\n    source_mappings: { trial_a: age }\n",
    );
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "ingest",
            "-i",
            fixture_path("trial_a_visits.csv").to_str().unwrap(),
            "-s",
            schema.to_str().unwrap(),
            "--store",
            workspace.store_path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("Loading schema"))
        .stderr(contains("Field 'age': Unknown datatype 'decimal'"));
    assert!(!workspace.store_path().exists());
}

#[test]
fn malformed_schema_yaml_reports_the_parser_error() {
    let workspace = TestWorkspace::new();
    let schema = workspace.write("broken.yml", "fields:\n  age: [unclosed\n");
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args(["fields", "-s", schema.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("Parsing schema YAML: "));
}

#[test]
fn fields_lists_schema_fields_and_sources() {
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args(["fields", "-s", fixture_path("codebook.yml").to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("participant_id"))
        .stdout(contains("trial_a:patient_id, trial_b:subject_id"))
        .stdout(contains("0..=100"))
        .stdout(contains("temperature, humidity"));
}

#[test]
fn detect_reports_source_and_mapping() {
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "detect",
            "-i",
            fixture_path("station_climate.csv").to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("station"))
        .stdout(contains("climate"))
        .stdout(contains("daily_temp_c"))
        .stdout(contains("Unmapped (always null): participant_id"));
}

#[test]
fn export_writes_records_in_schema_order() {
    let workspace = TestWorkspace::new();
    ingest(&workspace, "trial_a_visits.csv").success();
    let output = workspace.file("export.csv");
    Command::cargo_bin("csv-harmonizer")
        .expect("binary exists")
        .args([
            "export",
            "--store",
            workspace.store_path().to_str().unwrap(),
            "-s",
            fixture_path("codebook.yml").to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&output).expect("read export");
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some(
            "id,participant_id,visit_date,location_id,age,sex,treatment_group,systolic_bp,temperature,humidity"
        )
    );
    assert_eq!(
        lines.next(),
        Some("1,P001,2024-01-15,S01,52,Female,Placebo,128,,")
    );
    assert_eq!(contents.lines().count(), 4);
}
