use sbs::commands::{self, ScriptSource, SubmitOptions};
use sbs::error::SbsError;
use sbs::scheduler::JobState;


use harness::{submit_script, submit_with, test_store};

#[test]
fn test_shebang_injected_for_plain_scripts() {
    let (_dir, store) = test_store();

    let id = submit_script(&store, "echo hi");
    assert_eq!(store.read_script(id).unwrap(), "#!/bin/sh\necho hi\n");
}

#[test]
fn test_existing_shebang_preserved() {
    let (_dir, store) = test_store();
    let script = "#!/bin/bash\necho hi";

    let id = submit_script(&store, script);
    assert_eq!(store.read_script(id).unwrap(), format!("{script}\n"));
}

#[test]
fn test_submit_from_file() {
    let (dir, store) = test_store();
    let path = dir.path().join("job.sh");
    std::fs::write(&path, "#!/bin/sh\necho from-file\n").unwrap();

    let id = commands::submit(
        &store,
        &ScriptSource::File(path),
        &SubmitOptions::default(),
    )
    .unwrap();
    assert_eq!(store.read_script(id).unwrap(), "#!/bin/sh\necho from-file\n");
}

#[test]
fn test_missing_script_file_rejected() {
    let (dir, store) = test_store();
    let path = dir.path().join("nope.sh");

    let err = commands::submit(
        &store,
        &ScriptSource::File(path),
        &SubmitOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SbsError::ScriptMissing(_)));
}

#[test]
fn test_directives_parsed_anywhere_in_script() {
    let (_dir, store) = test_store();
    let script = "echo start\n#SBS -name late_directive\n#SBS -procs 4\necho done";

    let id = submit_script(&store, script);
    let settings = store.read_settings(id).unwrap();
    assert_eq!(settings.get("name"), Some("late_directive"));
    assert_eq!(settings.procs().unwrap(), 4);
}

#[test]
fn test_unknown_directive_keys_ignored() {
    let (_dir, store) = test_store();

    let id = submit_script(&store, "#SBS -bogus value\n#SBS -mem 100M\necho hi");
    let settings = store.read_settings(id).unwrap();
    assert_eq!(settings.get("bogus"), None);
    assert_eq!(settings.mem_mb().unwrap(), 100);
}

#[test]
fn test_cli_options_override_directives() {
    let (_dir, store) = test_store();
    let opts = SubmitOptions {
        name: Some("from_cli".into()),
        procs: Some(2),
        ..Default::default()
    };

    let id = submit_with(&store, "#SBS -name from_script\n#SBS -procs 8\necho hi", opts);
    let settings = store.read_settings(id).unwrap();
    assert_eq!(settings.get("name"), Some("from_cli"));
    assert_eq!(settings.procs().unwrap(), 2);
}

#[test]
fn test_name_sanitized_at_submit() {
    let (_dir, store) = test_store();
    let opts = SubmitOptions {
        name: Some("my job!".into()),
        ..Default::default()
    };

    let id = submit_with(&store, "echo hi", opts);
    assert_eq!(store.read_setting(id, "name").unwrap().as_deref(), Some("my_job_"));
}

#[test]
fn test_initial_state_hold_or_userhold() {
    let (_dir, store) = test_store();

    let normal = submit_script(&store, "echo hi");
    assert_eq!(store.read_status(normal).unwrap(), JobState::Hold);

    let held_flag = submit_with(
        &store,
        "echo hi",
        SubmitOptions {
            hold: true,
            ..Default::default()
        },
    );
    assert_eq!(store.read_status(held_flag).unwrap(), JobState::UserHold);

    let held_directive = submit_script(&store, "#SBS -hold\necho hi");
    assert_eq!(store.read_status(held_directive).unwrap(), JobState::UserHold);
}

#[test]
fn test_afterok_must_exist_at_submit() {
    let (_dir, store) = test_store();

    let err = commands::submit(
        &store,
        &ScriptSource::Inline("echo hi".into()),
        &SubmitOptions {
            afterok: Some("99".into()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, SbsError::DependencyMissing(99)));

    let first = submit_script(&store, "echo hi");
    let second = submit_with(
        &store,
        "echo hi",
        SubmitOptions {
            afterok: Some(first.to_string()),
            ..Default::default()
        },
    );
    assert_eq!(
        store.read_settings(second).unwrap().afterok().unwrap(),
        vec![first]
    );
}

#[test]
fn test_bad_settings_rejected() {
    let (_dir, store) = test_store();

    let err = commands::submit(
        &store,
        &ScriptSource::Inline("echo hi".into()),
        &SubmitOptions {
            mem: Some("lots".into()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, SbsError::BadSetting { key: "mem", .. }));

    let err = commands::submit(
        &store,
        &ScriptSource::Inline("echo hi".into()),
        &SubmitOptions {
            afterok: Some("1:x".into()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, SbsError::BadSetting { key: "afterok", .. }));
}
