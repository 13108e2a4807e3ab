//! Integration tests driving the `parallel-self-test` binary against a scratch validation tree

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_parallel-self-test");

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(BIN)
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn test_missing_makefile_without_root_is_config_error() {
    let pwd = tempfile::tempdir().unwrap();
    let output = run_in(pwd.path(), &["--no-colour"]);

    assert_eq!(output.status.code(), Some(2));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Trying to extract the root dir from a Makefile in the pwd."));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("\nERROR:\n"), "stderr was: {stderr}");
    assert!(stderr.contains("specify the path to oomph_root using -C"));
}

#[test]
fn test_unknown_feature_is_config_error() {
    let root = tempfile::tempdir().unwrap();
    let root_arg = root.path().to_str().unwrap();
    let output = run_in(root.path(), &["-C", root_arg, "--with-feature", "cuda"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_of(&output).contains("unknown feature 'cuda'"));
}

#[test]
fn test_check_scripts_lists_noncompliant_drivers() {
    let root = tempfile::tempdir().unwrap();
    write_file(&root.path().join("demo_drivers/good/validate.sh"), "#!/bin/sh\nexit 0\n");
    write_file(&root.path().join("demo_drivers/silent/validate.sh"), "#!/bin/sh\necho done\n");
    let root_arg = root.path().to_str().unwrap();

    let output = run_in(root.path(), &["-C", root_arg, "--check-scripts"]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("./demo_drivers/silent/validate.sh"));
    assert!(!stdout.contains("./demo_drivers/good/validate.sh"));
}

#[cfg(unix)]
mod with_fake_make {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Stand-in for `make`: every call is logged to `make.log` beside the script, `clean` fails
    /// only when a `fail-clean` marker sits beside the script, the directory named `b` fails to
    /// build, everything else builds, and real runs create `Validation/` like a driver would.
    const FAKE_MAKE: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$PWD $*" >> "$here/make.log"
if [ "$1" = "clean" ]; then
  if [ -e "$here/fail-clean" ]; then
    exit 1
  fi
  exit 0
fi
case "$(basename "$PWD")" in
  b) echo "compile error"; exit 2 ;;
esac
for arg in "$@"; do
  if [ "$arg" = "TESTS_ENVIRONMENT=true" ]; then
    echo "built"
    exit 0
  fi
done
mkdir -p Validation
echo "ran"
exit 0
"#;

    struct Tree {
        _root: tempfile::TempDir,
        root: PathBuf,
        make: PathBuf,
    }

    /// `a` passes, `b` fails to build, `c` sits under an mpi path.
    fn tree() -> Tree {
        let root_dir = tempfile::tempdir().unwrap();
        let root = root_dir.path().to_path_buf();
        for rel in ["demo_drivers/a", "demo_drivers/b", "self_test/mpi/c"] {
            write_file(&root.join(rel).join("validate.sh"), "#!/bin/sh\nexit 0\n");
        }
        let make = root.join("fake-make");
        fs::write(&make, FAKE_MAKE).unwrap();
        fs::set_permissions(&make, fs::Permissions::from_mode(0o755)).unwrap();
        Tree {
            _root: root_dir,
            root,
            make,
        }
    }

    fn run_tree(tree: &Tree, extra: &[&str]) -> Output {
        let mut args = vec![
            "-C",
            tree.root.to_str().unwrap(),
            "--make",
            tree.make.to_str().unwrap(),
            "--no-colour",
            "--without-feature",
            "mpi",
            "--with-feature",
            "hlib",
        ];
        args.extend_from_slice(extra);
        run_in(&tree.root, &args)
    }

    #[test]
    fn test_mixed_tree_reports_each_directory_once() {
        let tree = tree();
        let output = run_tree(&tree, &["--serial-mode"]);

        assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr_of(&output));
        let stdout = stdout_of(&output);
        let root = tree.root.display();
        assert!(stdout.contains("Checked for the following features:"));
        assert!(stdout.contains("     mpi : false"));
        assert!(stdout.contains("Looking for validate.sh scripts in directories:"));
        assert!(stdout.contains(&format!("[OK]         {root}/demo_drivers/a")));
        assert!(stdout.contains(&format!("[BUILD FAIL] {root}/demo_drivers/b")));
        assert!(stdout.contains(&format!("[NO MPI]     {root}/self_test/mpi/c")));
        assert_eq!(stdout.matches("/demo_drivers/a\n").count(), 1);
        assert!(stdout.contains("1 passed, 0 failed, 1 build failed, 1 skipped in "));

        let a_trace = fs::read_to_string(tree.root.join("demo_drivers/a/Validation/make_check_output")).unwrap();
        assert_eq!(
            a_trace,
            "Building WITH FAKE TEST PASS CONDITION:\nbuilt\n\nRunning self test properly:\nran\n"
        );
        let b_trace = fs::read_to_string(tree.root.join("demo_drivers/b/make_check_output")).unwrap();
        assert!(b_trace.contains("compile error"));
        assert!(!b_trace.contains("Running self test properly"));
        assert!(!tree.root.join("self_test/mpi/c/make_check_output").exists());
    }

    fn make_log(tree: &Tree) -> Vec<String> {
        fs::read_to_string(tree.root.join("make.log"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_make_clean_runs_in_every_base_dir_before_checks() {
        let tree = tree();
        let output = run_tree(&tree, &["-a", "-j", "3", "--serial-mode"]);

        assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr_of(&output));
        let root = tree.root.display();
        assert!(stdout_of(&output).contains(&format!(
            "Running (recursive) make clean in {root}/demo_drivers {root}/self_test"
        )));

        let log = make_log(&tree);
        assert_eq!(
            log[..2],
            [
                format!("{root}/demo_drivers clean -k -j 3"),
                format!("{root}/self_test clean -k -j 3"),
            ]
        );
        assert!(log[2..].iter().all(|line| line.contains(" check ")), "log: {log:?}");
        assert!(!log[2..].is_empty());
    }

    #[test]
    fn test_failing_make_clean_is_fatal() {
        let tree = tree();
        fs::write(tree.root.join("fail-clean"), "").unwrap();
        let output = run_tree(&tree, &["-a", "-j", "2"]);

        assert_eq!(output.status.code(), Some(1));
        assert!(stderr_of(&output).contains("clean` failed in"));
        assert_eq!(
            make_log(&tree),
            vec![format!("{}/demo_drivers clean -k -j 2", tree.root.display())]
        );
    }

    #[test]
    fn test_strict_mode_fails_on_build_failure() {
        let tree = tree();
        let output = run_tree(&tree, &["--strict", "-j", "2"]);
        assert_eq!(output.status.code(), Some(1));
    }

    #[test]
    fn test_just_build_skips_runs() {
        let tree = tree();
        let output = run_tree(&tree, &["--just-build", "-j", "3"]);

        assert_eq!(output.status.code(), Some(0));
        assert!(!tree.root.join("demo_drivers/a/Validation").exists());
        let trace = fs::read_to_string(tree.root.join("demo_drivers/a/make_check_output")).unwrap();
        assert!(trace.contains("Not running self test because you set the 'just_build' option"));
        assert!(stderr_of(&output).contains("Warning: no Validation directory in"));
    }

    #[test]
    fn test_json_format_keeps_stdout_machine_readable() {
        let tree = tree();
        let output = run_tree(&tree, &["--format", "json", "--serial-mode"]);

        assert_eq!(output.status.code(), Some(0));
        let records: Vec<serde_json::Value> = stdout_of(&output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 4);

        let outcome_of = |suffix: &str| {
            records
                .iter()
                .find(|r| r["dir"].as_str().is_some_and(|d| d.ends_with(suffix)))
                .map(|r| r["outcome"].as_str().unwrap().to_string())
        };
        assert_eq!(outcome_of("demo_drivers/a").as_deref(), Some("passed"));
        assert_eq!(outcome_of("demo_drivers/b").as_deref(), Some("build_failed"));
        assert_eq!(outcome_of("self_test/mpi/c").as_deref(), Some("skipped"));

        let summary = &records[3]["summary"];
        assert_eq!(summary["total"], 3);
        assert_eq!(summary["passed"], 1);
        assert_eq!(summary["build_failed"], 1);
        assert_eq!(summary["skipped"], 1);
        assert!(stderr_of(&output).contains("Checked for the following features:"));
    }
}
