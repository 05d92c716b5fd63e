use sbs::scheduler::job::{parse_afterok, parse_mem_mb, sanitize_name, Settings};
use sbs::scheduler::JobState;

const ALL_STATES: [JobState; 7] = [
    JobState::UserHold,
    JobState::Hold,
    JobState::Queued,
    JobState::Running,
    JobState::Success,
    JobState::Error,
    JobState::Cancel,
];

#[test]
fn test_state_codes_round_trip() {
    for state in ALL_STATES {
        let parsed: JobState = state.code().to_string().parse().unwrap();
        assert_eq!(parsed, state);
    }
    assert!("X".parse::<JobState>().is_err());
    assert!("".parse::<JobState>().is_err());
}

#[test]
fn test_terminal_states() {
    for state in ALL_STATES {
        let expected = matches!(
            state,
            JobState::Success | JobState::Error | JobState::Cancel
        );
        assert_eq!(state.is_terminal(), expected, "{state}");
    }
}

#[test]
fn test_state_display_names() {
    assert_eq!(JobState::UserHold.to_string(), "USERHOLD");
    assert_eq!(JobState::Queued.to_string(), "QUEUED");
    assert_eq!(JobState::Cancel.to_string(), "CANCEL");
}

#[test]
fn test_parse_mem_mb() {
    assert_eq!(parse_mem_mb("500"), Some(500));
    assert_eq!(parse_mem_mb("500M"), Some(500));
    assert_eq!(parse_mem_mb("500m"), Some(500));
    assert_eq!(parse_mem_mb("2G"), Some(2000));
    assert_eq!(parse_mem_mb("2g"), Some(2000));
    assert_eq!(parse_mem_mb(" 16G "), Some(16000));
    assert_eq!(parse_mem_mb("0"), Some(0));

    assert_eq!(parse_mem_mb(""), None);
    assert_eq!(parse_mem_mb("G"), None);
    assert_eq!(parse_mem_mb("lots"), None);
    assert_eq!(parse_mem_mb("-5M"), None);
}

#[test]
fn test_parse_afterok() {
    assert_eq!(parse_afterok("3").unwrap(), vec![3]);
    assert_eq!(parse_afterok("3:7:12").unwrap(), vec![3, 7, 12]);
    assert!(parse_afterok("").unwrap().is_empty());
    assert!(parse_afterok("3:x").is_err());
}

#[test]
fn test_sanitize_name() {
    assert_eq!(sanitize_name("build-all_v1.2"), "build-all_v1.2");
    assert_eq!(sanitize_name("my job!"), "my_job_");
    assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
}

#[test]
fn test_settings_defaults() {
    let settings = Settings::default();
    assert_eq!(settings.procs().unwrap(), 1);
    assert_eq!(settings.mem_mb().unwrap(), 0);
    assert!(settings.afterok().unwrap().is_empty());
    assert_eq!(settings.name(), None);
}

#[test]
fn test_settings_procs_coercion() {
    let mut settings = Settings::default();
    settings.set("procs", "0");
    assert_eq!(settings.procs().unwrap(), 1);

    settings.set("procs", "8");
    assert_eq!(settings.procs().unwrap(), 8);

    settings.set("procs", "-2");
    assert!(settings.procs().is_err());

    settings.set("procs", "many");
    assert!(settings.procs().is_err());
}

#[test]
fn test_settings_typed_accessors() {
    let mut settings = Settings::default();
    settings.set("mem", "2G");
    settings.set("afterok", "1:2");
    settings.set("name", "nightly build");
    settings.set("mail", "user@localhost");

    assert_eq!(settings.mem_mb().unwrap(), 2000);
    assert_eq!(settings.afterok().unwrap(), vec![1, 2]);
    assert_eq!(settings.name().as_deref(), Some("nightly_build"));
    assert_eq!(settings.mail(), Some("user@localhost"));
}
