use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use physio_tidy::config::{Config, OutputFormat};
use physio_tidy::data::pickle::{self, NdArray, PyValue};
use physio_tidy::jobs::{self, JobOutcome};
use tempfile::TempDir;
use zip::write::FileOptions;

fn config_in(dir: &TempDir) -> Config {
    Config {
        raw_dir: dir.path().join("raw"),
        clean_dir: dir.path().join("clean"),
        ..Config::default()
    }
}

fn subject_pickle(labels: Vec<i64>) -> Vec<u8> {
    let n = labels.len();
    let column = |offset: f64| {
        PyValue::Array(NdArray::column_f64((0..n).map(|i| offset + i as f64).collect()).into())
    };
    let chest = vec![
        (PyValue::text("ECG"), column(0.0)),
        (PyValue::text("EDA"), column(10_000.0)),
        (PyValue::text("Temp"), column(20_000.0)),
        (PyValue::text("Resp"), column(30_000.0)),
    ];
    let value = PyValue::Dict(vec![
        (
            PyValue::text("signal"),
            PyValue::Dict(vec![(PyValue::text("chest"), PyValue::Dict(chest))]),
        ),
        (PyValue::text("label"), PyValue::Array(NdArray::vector_i32(labels).into())),
    ]);
    pickle::to_vec(&value)
}

fn write_zip(path: &Path, members: &[(&str, &str)]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, content) in members {
        let options: FileOptions<'_, ()> = FileOptions::default();
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path).unwrap().lines().map(str::to_string).collect()
}

// ---------------------------------------------------------------------------
// WESAD
// ---------------------------------------------------------------------------

#[test]
fn wesad_skips_missing_and_malformed_subjects() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let root = config.wesad_root();

    // 3000 baseline, 3000 stress, 1000 transient samples.
    let mut labels = vec![1; 3000];
    labels.extend(vec![2; 3000]);
    labels.extend(vec![0; 1000]);
    fs::create_dir_all(root.join("S2")).unwrap();
    fs::write(root.join("S2/S2.pkl"), subject_pickle(labels)).unwrap();

    fs::create_dir_all(root.join("S3")).unwrap();
    fs::create_dir_all(root.join("S4")).unwrap();
    fs::write(root.join("S4/S4.pkl"), b"\x80\x03}q\x00").unwrap();
    fs::create_dir_all(root.join("extras")).unwrap();

    let outcome = jobs::wesad::run(&config);
    let JobOutcome::Written { path, rows, succeeded, skipped } = &outcome else {
        panic!("expected a written table, got {outcome:?}");
    };
    assert_eq!((*rows, *succeeded, *skipped), (86, 1, 2));

    let lines = read_lines(&path);
    assert_eq!(lines[0], "SubjectID,EDA,Temperature,ECG,Respiration,LabelCode,ConditionName");
    assert_eq!(lines.len(), 87);
    assert_eq!(lines[1], "S2,10000.0,20000.0,0.0,30000.0,1,Baseline");
    // Filtered rows 0, 70, .., 2940 are baseline; 3010 is the first stress row.
    assert!(lines[43].ends_with(",1,Baseline"));
    assert!(lines[44].starts_with("S2,13010.0,"));
    assert!(lines[44].ends_with(",2,Stress"));
    assert!(lines[86].ends_with(",2,Stress"));
}

#[test]
fn wesad_rows_are_grouped_by_subject_in_name_order() {
    let s10: Vec<i64> = [vec![3; 140], vec![4; 70]].concat();
    let s2: Vec<i64> = [vec![0; 10], vec![1; 140], vec![5; 20]].concat();

    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let root = config.wesad_root();
    for (subject, bytes) in [("S10", subject_pickle(s10)), ("S2", subject_pickle(s2.clone()))] {
        fs::create_dir_all(root.join(subject)).unwrap();
        fs::write(root.join(subject).join(format!("{subject}.pkl")), bytes).unwrap();
    }
    let broken = subject_pickle(vec![1; 700]);
    fs::create_dir_all(root.join("S3")).unwrap();
    fs::write(root.join("S3/S3.pkl"), &broken[..broken.len() / 2]).unwrap();

    let outcome = jobs::wesad::run(&config);
    let JobOutcome::Written { path, rows, succeeded, skipped } = &outcome else {
        panic!("expected a written table, got {outcome:?}");
    };
    assert_eq!((*rows, *succeeded, *skipped), (5, 2, 1));
    assert_eq!(
        read_lines(path)[1..],
        [
            "S10,10000.0,20000.0,0.0,30000.0,3,Amusement",
            "S10,10070.0,20070.0,70.0,30070.0,3,Amusement",
            "S10,10140.0,20140.0,140.0,30140.0,4,Meditation",
            "S2,10010.0,20010.0,10.0,30010.0,1,Baseline",
            "S2,10080.0,20080.0,80.0,30080.0,1,Baseline",
        ]
    );

    // S2 on its own produces the same block.
    let solo_dir = tempfile::tempdir().unwrap();
    let solo = config_in(&solo_dir);
    fs::create_dir_all(solo.wesad_root().join("S2")).unwrap();
    fs::write(solo.wesad_root().join("S2/S2.pkl"), subject_pickle(s2)).unwrap();
    assert!(jobs::wesad::run(&solo).produced());
    let solo_lines = read_lines(&solo.output_path(&solo.wesad.output));
    assert_eq!(solo_lines[1..], read_lines(path)[4..]);
}

#[test]
fn wesad_with_no_usable_subject_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    fs::create_dir_all(config.wesad_root().join("S2")).unwrap();

    let outcome = jobs::wesad::run(&config);
    assert!(!outcome.produced());
    assert!(!config.output_path(&config.wesad.output).exists());
}

#[test]
fn wesad_missing_root_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(jobs::wesad::run(&config_in(&dir)), JobOutcome::Failed(_)));
}

// ---------------------------------------------------------------------------
// AffectiveROAD
// ---------------------------------------------------------------------------

#[test]
fn road_reads_hr_from_left_or_right_archive() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let root = config.road_root();

    let hr: String = std::iter::once("1493796000.0\n4.0\n".to_string())
        .chain((0..40).map(|i| format!("{}\n", 70 + i % 3)))
        .collect();

    let drv1 = root.join("2017-05-03-E4-Drv1");
    fs::create_dir_all(&drv1).unwrap();
    write_zip(&drv1.join("Left.zip"), &[("HR.csv", &hr)]);

    let drv2 = root.join("2017-05-04-E4-Drv2");
    fs::create_dir_all(&drv2).unwrap();
    write_zip(&drv2.join("Right.zip"), &[("HR.csv", "1000\n1\n80\n81\n")]);

    let drv3 = root.join("2017-05-05-E4-Drv3");
    fs::create_dir_all(&drv3).unwrap();
    write_zip(&drv3.join("Left.zip"), &[("TEMP.csv", "1000\n4\n33.0\n")]);

    fs::create_dir_all(root.join("2017-05-06-E4-Drv4")).unwrap();
    fs::create_dir_all(root.join("Annotations")).unwrap();

    let outcome = jobs::road::run(&config);
    let JobOutcome::Written { path, rows, succeeded, skipped } = &outcome else {
        panic!("expected a written table, got {outcome:?}");
    };
    assert_eq!((*rows, *succeeded, *skipped), (42, 2, 2));

    let lines = read_lines(&path);
    assert_eq!(lines[0], "DriveID,RelativeTimeSeconds,HeartRate,Dataset");
    assert_eq!(lines[1], "2017-05-03-E4-Drv1,0.0,70.0,AffectiveROAD");
    assert_eq!(lines[2], "2017-05-03-E4-Drv1,0.25,71.0,AffectiveROAD");
    assert!(lines[40].starts_with("2017-05-03-E4-Drv1,9.75,"));
    assert_eq!(lines[42], "2017-05-04-E4-Drv2,1.0,81.0,AffectiveROAD");
}

#[test]
fn road_writes_parquet_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.format = OutputFormat::Parquet;
    let drive = config.road_root().join("x-E4-Drv1");
    fs::create_dir_all(&drive).unwrap();
    write_zip(&drive.join("Left.zip"), &[("HR.csv", "1000\n2\n60\n61\n62\n")]);

    let outcome = jobs::road::run(&config);
    assert!(outcome.produced());
    let path = config.output_path(&config.road.output);
    assert_eq!(path.extension().unwrap(), "parquet");
    assert_eq!(&fs::read(&path).unwrap()[..4], b"PAR1");
}

// ---------------------------------------------------------------------------
// SWELL
// ---------------------------------------------------------------------------

#[test]
fn swell_is_tagged_then_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(&dir);
    config.swell.file = "swell.csv".into();
    fs::create_dir_all(&config.raw_dir).unwrap();
    fs::write(config.swell_source(), "PP,Condition,SCL\nPP1,N,5.5\nPP1,T,\n").unwrap();

    let outcome = jobs::swell::run(&config);
    assert!(matches!(outcome, JobOutcome::Written { rows: 2, .. }));
    let path = config.output_path(&config.swell.output);
    let first = fs::read(&path).unwrap();
    assert_eq!(
        String::from_utf8(first.clone()).unwrap(),
        "PP,Condition,SCL,Dataset\nPP1,N,5.5,SWELL\nPP1,T,,SWELL\n"
    );

    // A second run keeps the output even with the source gone.
    fs::remove_file(config.swell_source()).unwrap();
    assert!(matches!(jobs::swell::run(&config), JobOutcome::Cached { .. }));
    assert_eq!(fs::read(&path).unwrap(), first);

    // Forcing a rebuild without a source fails and leaves the old table alone.
    config.swell.skip_existing = false;
    assert!(!jobs::swell::run(&config).produced());
    assert_eq!(fs::read(&path).unwrap(), first);
}
