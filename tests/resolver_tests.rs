use sbs::commands::SubmitOptions;
use sbs::scheduler::deps;
use sbs::scheduler::job::BECAUSE_OF_KEY;
use sbs::scheduler::JobState;
use sbs::store::{unix_now, JobStore};


use harness::{submit_script, submit_with, test_store};

fn depends_on(deps: &str) -> SubmitOptions {
    SubmitOptions {
        afterok: Some(deps.to_string()),
        ..Default::default()
    }
}

fn force_state(store: &JobStore, id: u64, state: JobState) {
    store.append_status(id, state, unix_now()).unwrap();
}

#[test]
fn test_job_without_deps_promoted() {
    let (_dir, store) = test_store();
    let id = submit_script(&store, "echo hi");

    let changed = deps::resolve(&store).unwrap();

    assert_eq!(changed, 1);
    assert_eq!(store.read_status(id).unwrap(), JobState::Queued);
}

#[test]
fn test_pending_dependency_keeps_holding() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "echo hi");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));

    deps::resolve(&store).unwrap();

    // The predecessor itself got promoted, but its dependent must wait.
    assert_eq!(store.read_status(first).unwrap(), JobState::Queued);
    assert_eq!(store.read_status(second).unwrap(), JobState::Hold);
}

#[test]
fn test_promoted_after_dependency_succeeds() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "echo hi");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));
    force_state(&store, first, JobState::Success);

    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(second).unwrap(), JobState::Queued);
}

#[test]
fn test_missing_dependency_counts_as_satisfied() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "echo hi");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));

    // The predecessor succeeded and was cleaned up.
    store.delete_job(first).unwrap();
    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(second).unwrap(), JobState::Queued);
}

#[test]
fn test_failed_dependency_cancels_with_because_of() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "exit 1");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));
    force_state(&store, first, JobState::Error);

    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(second).unwrap(), JobState::Cancel);
    assert_eq!(
        store.read_setting(second, BECAUSE_OF_KEY).unwrap(),
        Some(first.to_string())
    );
}

#[test]
fn test_cancelled_dependency_cancels_dependent() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "echo hi");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));
    force_state(&store, first, JobState::Cancel);

    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(second).unwrap(), JobState::Cancel);
    assert_eq!(
        store.read_setting(second, BECAUSE_OF_KEY).unwrap(),
        Some(first.to_string())
    );
}

#[test]
fn test_error_outranks_cancel_in_because_of() {
    let (_dir, store) = test_store();
    let errored = submit_script(&store, "exit 1");
    let cancelled = submit_script(&store, "echo hi");
    let dependent = submit_with(
        &store,
        "echo hi",
        depends_on(&format!("{cancelled}:{errored}")),
    );
    force_state(&store, errored, JobState::Error);
    force_state(&store, cancelled, JobState::Cancel);

    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(dependent).unwrap(), JobState::Cancel);
    assert_eq!(
        store.read_setting(dependent, BECAUSE_OF_KEY).unwrap(),
        Some(errored.to_string())
    );
}

#[test]
fn test_cascade_within_one_pass_for_ascending_chains() {
    let (_dir, store) = test_store();
    let first = submit_script(&store, "exit 1");
    let second = submit_with(&store, "echo hi", depends_on(&first.to_string()));
    let third = submit_with(&store, "echo hi", depends_on(&second.to_string()));
    force_state(&store, first, JobState::Error);

    // Evaluation runs in ascending id order with fresh status reads, so a
    // chain submitted in dependency order collapses in a single pass.
    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(second).unwrap(), JobState::Cancel);
    assert_eq!(store.read_status(third).unwrap(), JobState::Cancel);
    assert_eq!(
        store.read_setting(third, BECAUSE_OF_KEY).unwrap(),
        Some(second.to_string())
    );
}

#[test]
fn test_cascade_takes_a_tick_per_level_against_id_order() {
    let (_dir, store) = test_store();
    let grandchild = submit_script(&store, "echo hi");
    let child = submit_script(&store, "echo hi");
    let parent = submit_script(&store, "exit 1");
    // Wire the chain against id order, which submit-time validation would
    // not produce on its own.
    store
        .write_setting(grandchild, "afterok", &child.to_string())
        .unwrap();
    store
        .write_setting(child, "afterok", &parent.to_string())
        .unwrap();
    force_state(&store, parent, JobState::Error);

    deps::resolve(&store).unwrap();
    assert_eq!(store.read_status(child).unwrap(), JobState::Cancel);
    // The grandchild was evaluated before the child flipped; it catches up
    // on the next tick.
    assert_eq!(store.read_status(grandchild).unwrap(), JobState::Hold);

    deps::resolve(&store).unwrap();
    assert_eq!(store.read_status(grandchild).unwrap(), JobState::Cancel);
    assert_eq!(
        store.read_setting(grandchild, BECAUSE_OF_KEY).unwrap(),
        Some(child.to_string())
    );
}

#[test]
fn test_userhold_jobs_are_not_touched() {
    let (_dir, store) = test_store();
    let id = submit_with(
        &store,
        "echo hi",
        SubmitOptions {
            hold: true,
            ..Default::default()
        },
    );

    let changed = deps::resolve(&store).unwrap();

    assert_eq!(changed, 0);
    assert_eq!(store.read_status(id).unwrap(), JobState::UserHold);
}

#[test]
fn test_partial_success_still_waits() {
    let (_dir, store) = test_store();
    let done = submit_script(&store, "echo hi");
    let pending = submit_script(&store, "echo hi");
    let dependent = submit_with(&store, "echo hi", depends_on(&format!("{done}:{pending}")));
    force_state(&store, done, JobState::Success);
    force_state(&store, pending, JobState::Running);

    deps::resolve(&store).unwrap();

    assert_eq!(store.read_status(dependent).unwrap(), JobState::Hold);
}
