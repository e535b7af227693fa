use std::fs;
use std::path::Path;
use std::sync::Arc;

use kiln_build::revision::RevManifest;
use kiln_build::{names, standard_registry, BuildError, Executor, OutcomeStatus, RunReport};
use kiln_core::{CommandSpec, Manifest, PhaseName, RunState};
use tempfile::TempDir;

const INDEX: &str = r#"<!doctype html>
<html>
<head>
  <!-- build:css styles/main.css -->
  <link rel="stylesheet" href="styles/a.css">
  <link rel="stylesheet" href="styles/b.css">
  <!-- endbuild -->
</head>
<body>
  <!-- build:js scripts/main.js -->
  <script src="scripts/app.js"></script>
  <script src="scripts/util.js"></script>
  <!-- endbuild -->
</body>
</html>
"#;

fn scaffold_project(root: &Path) {
    let src = root.join("src");
    fs::create_dir_all(src.join("styles")).unwrap();
    fs::create_dir_all(src.join("scripts")).unwrap();
    fs::write(src.join("index.html"), INDEX).unwrap();
    fs::write(src.join("robots.txt"), "User-agent: *\n").unwrap();
    fs::write(src.join("styles/a.css"), "a { color: red }\n").unwrap();
    fs::write(src.join("styles/b.css"), "b { color: blue }\n").unwrap();
    fs::write(src.join("scripts/app.js"), "app()\n").unwrap();
    fs::write(src.join("scripts/util.js"), "util()\n").unwrap();

    // A stale artifact the clean phase must remove.
    fs::create_dir_all(root.join("dist/old")).unwrap();
    fs::write(root.join("dist/old/leftover.js"), "x").unwrap();
}

/// Minifiers replaced by a plain copy so the pipeline runs anywhere.
fn manifest_with_copying_minifiers() -> Manifest {
    let mut manifest = Manifest::default();
    let copy = CommandSpec::new("cp", &["{{ input }}", "{{ target }}"]);
    manifest.tools.cssmin = copy.clone();
    manifest.tools.uglify = copy;
    manifest
}

fn executor(root: &Path, manifest: &Manifest) -> Executor {
    let registry = standard_registry(manifest).expect("registry");
    let config = manifest.context(root).expect("config");
    Executor::new(Arc::new(registry), config)
}

fn bundling_phases() -> Vec<PhaseName> {
    [
        names::CLEAN_DIST,
        names::USEMIN_PREPARE,
        names::COPY_STYLES,
        names::CONCAT,
        names::CSSMIN,
        names::UGLIFY,
        names::COPY_DIST,
        names::REV,
        names::USEMIN,
    ]
    .into_iter()
    .map(PhaseName::from)
    .collect()
}

#[tokio::test]
async fn bundles_are_concatenated_revved_and_referenced() {
    let project = TempDir::new().unwrap();
    let root = project.path();
    scaffold_project(root);

    let exec = executor(root, &manifest_with_copying_minifiers());
    let mut report = RunReport::new("build");
    report.start();
    exec.run_sequence(&bundling_phases(), &mut report)
        .await
        .expect("pipeline");
    report.finish::<BuildError>(Ok(()));
    assert_eq!(report.state, RunState::Succeeded);

    assert!(!root.join("dist/old").exists(), "clean:dist removes stale output");

    let concat = fs::read_to_string(root.join("var/concat/scripts/main.js")).unwrap();
    assert_eq!(concat, "app();\nutil()\n");

    let manifest = RevManifest::load(&root.join("var/.kiln/rev.json")).unwrap();
    let css = manifest.files.get("styles/main.css").expect("css bundle revved");
    let js = manifest.files.get("scripts/main.js").expect("js bundle revved");
    assert!(root.join("dist").join(css).is_file());
    assert!(root.join("dist").join(js).is_file());

    let html = fs::read_to_string(root.join("dist/index.html")).unwrap();
    assert!(html.contains(&format!(r#"<link rel="stylesheet" href="{css}">"#)));
    assert!(html.contains(&format!(r#"<script src="{js}"></script>"#)));
    assert!(!html.contains("build:css"));
    assert!(!html.contains("styles/a.css"));

    assert!(root.join("dist/robots.txt").is_file(), "static files copied");
}

#[tokio::test]
async fn rev_output_is_content_deterministic() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let manifest = manifest_with_copying_minifiers();

    let mut revved = Vec::new();
    for project in [&first, &second] {
        scaffold_project(project.path());
        let exec = executor(project.path(), &manifest);
        let mut report = RunReport::new("build");
        exec.run_sequence(&bundling_phases(), &mut report)
            .await
            .expect("pipeline");
        let rev = RevManifest::load(&project.path().join("var/.kiln/rev.json")).unwrap();
        revved.push(rev.files);
    }
    assert_eq!(revved[0], revved[1]);
}

#[tokio::test]
async fn failing_minifier_stops_the_pipeline_and_keeps_artifacts() {
    let project = TempDir::new().unwrap();
    let root = project.path();
    scaffold_project(root);

    let mut manifest = manifest_with_copying_minifiers();
    manifest.tools.cssmin = CommandSpec::new("sh", &["-c", "echo 'parse error' >&2; exit 1"]);
    let exec = executor(root, &manifest);

    let mut report = RunReport::new("build");
    report.start();
    let err = exec
        .run_sequence(&bundling_phases(), &mut report)
        .await
        .unwrap_err();
    report.finish(Err(&err));

    match &err {
        BuildError::PhaseExecution { name, cause } => {
            assert_eq!(name.as_str(), names::CSSMIN);
            assert!(cause.to_string().contains("parse error"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.with_status(OutcomeStatus::Failed).count(), 1);
    assert_eq!(report.phases.last().map(|p| p.name.as_str()), Some(names::CSSMIN));

    assert!(!root.join("var/.kiln/rev.json").exists(), "rev never ran");
    assert!(root.join("var/concat/styles/main.css").is_file(), "no rollback");
}

#[tokio::test]
async fn prefixed_plain_css_is_what_gets_bundled() {
    let project = TempDir::new().unwrap();
    let root = project.path();
    scaffold_project(root);

    let mut manifest = manifest_with_copying_minifiers();
    manifest.tools.autoprefixer =
        CommandSpec::new("sh", &["-c", "echo '/*prefixed*/' >> \"$0\"", "{{ input }}"]);
    let exec = executor(root, &manifest);

    let phases: Vec<PhaseName> = [
        names::CLEAN_SERVER,
        names::COPY_STYLES,
        names::AUTOPREFIXER,
        names::USEMIN_PREPARE,
        names::CONCAT,
    ]
    .into_iter()
    .map(PhaseName::from)
    .collect();
    let mut report = RunReport::new("build");
    exec.run_sequence(&phases, &mut report).await.expect("pipeline");

    let staged = fs::read_to_string(root.join("var/styles/a.css")).unwrap();
    assert_eq!(staged, "a { color: red }\n/*prefixed*/\n");

    let bundle = fs::read_to_string(root.join("var/concat/styles/main.css")).unwrap();
    assert_eq!(
        bundle,
        "a { color: red }\n/*prefixed*/\nb { color: blue }\n/*prefixed*/\n"
    );
}
