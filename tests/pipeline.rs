// tests/pipeline.rs

//! End-to-end pipeline tests against stub build tools.

mod common;

use common::{failing_build_system, install_fake_dep, make_archive, stub_build_system};
use crucible::{ComponentDescriptor, Error, Patch, Pipeline, PipelineConfig, Stage};
use std::fs;

const HELLO_C: &str = "int main(void) { return 1; }\n";

fn base_config(fixtures: &tempfile::TempDir) -> PipelineConfig {
    let prefix = fixtures.path().join("opt");
    fs::create_dir_all(&prefix).unwrap();
    let mut config = PipelineConfig::new(&prefix, fixtures.path().join("work"));
    config.build_system = stub_build_system(fixtures.path());
    config.base_path = Some("/usr/bin:/bin".to_string());
    config
}

fn demo_descriptor(fixtures: &tempfile::TempDir) -> ComponentDescriptor {
    let (archive, sha256) = make_archive(
        fixtures.path(),
        "demo",
        "1.3.9",
        &[("demo.c", HELLO_C), ("CMakeLists.txt", "project(demo)\n")],
    );
    ComponentDescriptor::new("demo", "1.3.9", &archive.to_string_lossy(), &sha256)
}

#[test]
fn full_build_with_dependencies_and_patch() {
    let fixtures = tempfile::tempdir().unwrap();
    let mut config = base_config(&fixtures);
    config.keep_workdir = true;
    install_fake_dep(&config.install_prefix, None, &["libpcre2-8"]);
    install_fake_dep(&config.install_prefix, None, &["libcurl"]);

    let descriptor = demo_descriptor(&fixtures)
        .with_dependency("pcre2")
        .with_dependency("curl")
        .with_option("ENABLE_PERL=OFF")
        .with_patch("fix-exit-code")
        .with_remove_path("share/demo/schemas");

    let patch = Patch::new(
        "fix-exit-code",
        format!(
            "--- a/demo.c\n+++ b/demo.c\n@@ -1,1 +1,1 @@\n-{}+int main(void) {{ return 0; }}\n",
            HELLO_C
        ),
    )
    .with_env("LDFLAGS_EXTRA", "-lhistory");

    let prefix = config.install_prefix.clone();
    let report = Pipeline::new(config).run(&descriptor, &[patch]).unwrap();

    // Patch landed before compile, so the stub compiled the fixed source.
    let compiled = fs::read_to_string(prefix.join("bin/demo")).unwrap();
    assert!(compiled.contains("return 0"));

    // Configure saw static options, generated dependency paths and the
    // install prefix.
    assert!(report.configure_args.contains(&"-DENABLE_PERL=OFF".to_string()));
    assert!(report
        .configure_args
        .iter()
        .any(|a| a.starts_with("-DPCRE2_INCLUDE_DIR:PATH=")));
    assert!(report
        .configure_args
        .iter()
        .any(|a| a.starts_with("-DCURL_LIBRARY_RELEASE:FILEPATH=")));

    // The cleaner removed the schema payload the install step created.
    assert!(!prefix.join("share/demo/schemas").exists());
    assert_eq!(report.removed_paths.len(), 1);

    // Every stage left a log line, in pipeline order.
    assert!(report.log.first().unwrap().starts_with("Fetching"));
    assert!(report.log.last().unwrap().starts_with("Cleaning"));

    assert_eq!(report.applied_patches.len(), 1);
    assert_eq!(
        report.applied_patches[0].env.get("LDFLAGS_EXTRA").map(String::as_str),
        Some("-lhistory")
    );
}

#[test]
fn patch_env_stays_out_of_build_steps() {
    let fixtures = tempfile::tempdir().unwrap();
    let mut config = base_config(&fixtures);
    config.keep_workdir = true;
    let work_root = config.work_root.clone();

    let descriptor = demo_descriptor(&fixtures).with_patch("fix-exit-code");
    let patch = Patch::new(
        "fix-exit-code",
        format!(
            "--- a/demo.c\n+++ b/demo.c\n@@ -1,1 +1,1 @@\n-{HELLO_C}+int main(void) {{ return 0; }}\n"
        ),
    )
    .with_env("PATCH_SCOPED_FLAG", "1");

    let report = Pipeline::new(config).run(&descriptor, &[patch]).unwrap();

    // The overlay is reported on the applied patch but the configure
    // step's environment never contained it.
    assert_eq!(
        report.applied_patches[0].env.get("PATCH_SCOPED_FLAG").map(String::as_str),
        Some("1")
    );
    let dumped =
        fs::read_to_string(work_root.join("demo-1.3.9/source/demo-1.3.9/build/build-env.txt"))
            .unwrap();
    assert!(dumped.contains("CFLAGS"));
    assert!(!dumped.contains("PATCH_SCOPED_FLAG"));
}

#[test]
fn tampered_archive_fails_in_fetching() {
    let fixtures = tempfile::tempdir().unwrap();
    let config = base_config(&fixtures);

    let mut descriptor = demo_descriptor(&fixtures);
    // Flip one digit of the pinned hash.
    let pinned = descriptor.sha256().unwrap().to_string();
    let flipped = if pinned.starts_with('0') {
        format!("1{}", &pinned[1..])
    } else {
        format!("0{}", &pinned[1..])
    };
    descriptor.source.sha256 = Some(flipped);

    let err = Pipeline::new(config).run(&descriptor, &[]).unwrap_err();
    assert_eq!(err.stage, Stage::Fetching);
    assert!(matches!(err.source, Error::ChecksumMismatch { .. }));
}

#[test]
fn missing_dependency_fails_in_resolving() {
    let fixtures = tempfile::tempdir().unwrap();
    let config = base_config(&fixtures);

    let descriptor = demo_descriptor(&fixtures).with_dependency("openssl");
    let err = Pipeline::new(config).run(&descriptor, &[]).unwrap_err();
    assert_eq!(err.stage, Stage::Resolving);
    assert!(matches!(
        err.source,
        Error::UnresolvedDependency { ref name, .. } if name == "openssl"
    ));
}

#[test]
fn mismatched_patch_set_fails_in_patching() {
    let fixtures = tempfile::tempdir().unwrap();
    let config = base_config(&fixtures);
    let work_root = config.work_root.clone();

    let descriptor = demo_descriptor(&fixtures).with_patch("declared-only");
    let err = Pipeline::new(config).run(&descriptor, &[]).unwrap_err();
    assert_eq!(err.stage, Stage::Patching);
    assert!(matches!(err.source, Error::InvalidDescriptor(_)));

    // Fetching had already completed when the mismatch was caught.
    assert!(work_root.join("demo-1.3.9").exists());
}

#[test]
fn compile_failure_is_attributed_to_building() {
    let fixtures = tempfile::tempdir().unwrap();
    let mut config = base_config(&fixtures);
    config.build_system = failing_build_system(fixtures.path());

    let descriptor = demo_descriptor(&fixtures);
    let err = Pipeline::new(config).run(&descriptor, &[]).unwrap_err();
    assert_eq!(err.stage, Stage::Building);
    match err.source {
        Error::BuildStepFailed { exit_code, ref output_tail, .. } => {
            assert_eq!(exit_code, 2);
            assert!(output_tail.contains("boom"));
        }
        ref other => panic!("expected BuildStepFailed, got {other:?}"),
    }
}

#[test]
fn identical_inputs_reproduce_the_artifact() {
    let run = || {
        let fixtures = tempfile::tempdir().unwrap();
        let config = base_config(&fixtures);
        let descriptor = demo_descriptor(&fixtures).with_remove_path("share/demo/schemas");
        let report = Pipeline::new(config).run(&descriptor, &[]).unwrap();
        let digest = report.artifact.digest().unwrap();
        (fixtures, digest)
    };

    let (_a, first) = run();
    let (_b, second) = run();
    assert_eq!(first, second);
}

#[test]
fn workdir_removed_after_success_by_default() {
    let fixtures = tempfile::tempdir().unwrap();
    let config = base_config(&fixtures);
    let work_root = config.work_root.clone();

    let descriptor = demo_descriptor(&fixtures);
    Pipeline::new(config).run(&descriptor, &[]).unwrap();
    assert!(!work_root.join("demo-1.3.9").exists());
}

#[test]
fn patch_conflict_stops_before_configure() {
    let fixtures = tempfile::tempdir().unwrap();
    let mut config = base_config(&fixtures);
    config.keep_workdir = true;
    let work_root = config.work_root.clone();

    let descriptor = demo_descriptor(&fixtures).with_patch("does-not-apply");
    let patch = Patch::new(
        "does-not-apply",
        "--- a/demo.c\n+++ b/demo.c\n@@ -1,1 +1,1 @@\n-no such line\n+replacement\n",
    );

    let err = Pipeline::new(config).run(&descriptor, &[patch]).unwrap_err();
    assert_eq!(err.stage, Stage::Patching);

    // Configure never ran.
    let build_dir = work_root.join("demo-1.3.9/source/demo-1.3.9/build");
    assert!(!build_dir.join("configure-args.txt").exists());
}
