//! Adversarial tests for the path-safety gate.
//!
//! Loop records are plain files and must be treated as hostile input: every
//! command that deletes a tree or runs git against a recorded path has to
//! refuse a record that does not match what init would have written, and has
//! to leave everything in place when it refuses.

use std::fs;

use agl::commit::commit_loop;
use agl::core::stage::Stage;
use agl::drop::{DropOptions, drop_loop};
use agl::init::{InitOptions, InitOutcome, init_loop};
use agl::merge::{MergeOptions, merge_loop};
use agl::stage::{StageOptions, run_stage};
use agl::status::{LoopRow, collect_status};
use agl::test_support::{TestRepo, git};

/// Every worktree-touching command refuses a rewritten WORKTREE value, and
/// refusal has no side effects.
///
/// The loop is addressed with `--dir` so resolution cannot skip it and the
/// error always comes from path validation.
#[test]
fn tampered_worktree_path_is_refused_by_every_command() {
    let repo = TestRepo::new().expect("repo");
    let root = repo.root();
    let outcome = init(&repo, "add-auth");
    let original = fs::read_to_string(outcome.loop_dir.join(".agl")).expect("meta");

    let evil_values = [
        // Traversal out of the work root.
        "work/agent-loop/../../src",
        // Another loop's tree.
        "work/agent-loop/20200101-000000-other/tree",
        // Absolute path without declared external mode.
        "/tmp/somewhere/tree",
        // Wrong leaf name under the right loop directory.
        "work/agent-loop/20200101-000000-other/checkout",
    ];

    for evil in evil_values {
        set_meta_value(&outcome, "WORKTREE", evil);

        assert!(
            run_stage(root, &stage_opts(&outcome, Stage::Work)).is_err(),
            "stage accepted WORKTREE={evil}"
        );
        assert!(
            commit_loop(root, Some(&outcome.loop_dir)).is_err(),
            "commit accepted WORKTREE={evil}"
        );
        assert!(
            merge_loop(
                root,
                &MergeOptions {
                    dir: Some(outcome.loop_dir.clone()),
                    ..MergeOptions::default()
                }
            )
            .is_err(),
            "merge accepted WORKTREE={evil}"
        );
        assert!(
            drop_loop(root, &yes(&outcome)).is_err(),
            "drop accepted WORKTREE={evil}"
        );

        assert!(outcome.worktree.is_dir(), "worktree gone for WORKTREE={evil}");
        let branches = git(root, &["branch", "--list", "agl/add-auth"]).expect("git");
        assert!(
            branches.contains("agl/add-auth"),
            "branch gone for WORKTREE={evil}"
        );
    }

    // The untampered record still works.
    fs::write(outcome.loop_dir.join(".agl"), original).expect("restore");
    drop_loop(root, &yes(&outcome)).expect("drop").expect("confirmed");
}

/// A record pointing at a different repository is refused before any git
/// command runs.
#[test]
fn record_from_another_repository_is_refused() {
    let repo = TestRepo::new().expect("repo");
    let other = TestRepo::with_name("otherapp").expect("other repo");
    let outcome = init(&repo, "add-auth");

    set_meta_value(&outcome, "MAIN_ROOT", &other.root().display().to_string());

    let err = commit_loop(repo.root(), Some(&outcome.loop_dir)).unwrap_err();
    assert!(format!("{err:#}").contains("belongs to"), "got: {err:#}");
    assert!(outcome.worktree.is_dir());
}

/// Symlinking the loop's leaf out of the external base is caught when the
/// recorded path is resolved, so teardown never follows the link.
#[test]
#[cfg(unix)]
fn symlinked_leaf_outside_the_base_is_refused() {
    let repo = TestRepo::new().expect("repo");
    let base = repo.outside_dir().join("trees");
    repo.configure_external_base(&base).expect("config");
    let outcome = init(&repo, "add-auth");
    let leaf = outcome.worktree.parent().expect("leaf").to_path_buf();

    // Move the leaf elsewhere and leave a symlink in its place.
    let stolen = repo.outside_dir().join("stolen");
    fs::rename(&leaf, &stolen).expect("move leaf");
    std::os::unix::fs::symlink(&stolen, &leaf).expect("symlink");

    let err = drop_loop(repo.root(), &yes(&outcome)).unwrap_err();
    assert!(
        format!("{err:#}").contains("outside the declared base"),
        "got: {err:#}"
    );
    assert!(stolen.join("tree").is_dir(), "moved tree must be untouched");
}

/// Status is read-only reporting: it still lists what drop refuses to touch.
#[test]
fn status_lists_records_that_destructive_commands_refuse() {
    let repo = TestRepo::new().expect("repo");
    let outcome = init(&repo, "add-auth");

    set_meta_value(&outcome, "WORKTREE", "work/agent-loop/../../src");

    assert!(drop_loop(repo.root(), &yes(&outcome)).is_err());
    let rows = collect_status(repo.root()).expect("status");
    assert_eq!(rows.len(), 1);
    assert!(matches!(&rows[0], LoopRow::Loaded { .. }));
}

fn init(repo: &TestRepo, slug: &str) -> InitOutcome {
    init_loop(
        repo.root(),
        &InitOptions {
            slug: slug.to_string(),
            plan: repo.write_plan().expect("plan"),
            task: None,
            context: Vec::new(),
        },
    )
    .expect("init")
}

fn stage_opts(outcome: &InitOutcome, stage: Stage) -> StageOptions {
    StageOptions {
        stage,
        dir: Some(outcome.loop_dir.clone()),
        plans: Vec::new(),
        agent: Vec::new(),
    }
}

fn yes(outcome: &InitOutcome) -> DropOptions {
    DropOptions {
        dir: Some(outcome.loop_dir.clone()),
        yes: true,
        ..DropOptions::default()
    }
}

/// Rewrite one key in the loop's record, keeping the other lines.
fn set_meta_value(outcome: &InitOutcome, key: &str, value: &str) {
    let path = outcome.loop_dir.join(".agl");
    let rewritten = fs::read_to_string(&path)
        .expect("read meta")
        .lines()
        .map(|line| {
            if line.starts_with(&format!("{key}=")) {
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(&path, rewritten + "\n").expect("write meta");
}
