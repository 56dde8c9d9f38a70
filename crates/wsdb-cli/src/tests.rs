use super::*;

#[test]
fn parses_search_with_defaults() {
    let cli = Cli::try_parse_from(["wsdb-cli", "search", "dhgate", "cotton socks"])
        .expect("expected valid cli args");

    match cli.command {
        Commands::Search {
            platform,
            query,
            limit,
            headless,
            no_headless,
            save,
        } => {
            assert_eq!(platform, "dhgate");
            assert_eq!(query, "cotton socks");
            assert_eq!(limit, 50);
            assert_eq!(headless_override(headless, no_headless), None);
            assert!(!save);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

fn search_headless(flags: &[&str]) -> Option<bool> {
    let mut args = vec!["wsdb-cli", "search", "dhgate", "socks"];
    args.extend_from_slice(flags);
    match Cli::try_parse_from(args).expect("expected valid cli args").command {
        Commands::Search {
            headless,
            no_headless,
            ..
        } => headless_override(headless, no_headless),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn search_headless_flags_override_the_configured_default() {
    assert_eq!(search_headless(&[]), None);
    assert_eq!(search_headless(&["--headless"]), Some(true));
    assert_eq!(search_headless(&["--no-headless"]), Some(false));
    assert_eq!(search_headless(&["--headless", "--no-headless"]), Some(false));
    assert_eq!(search_headless(&["--no-headless", "--headless"]), Some(true));
}

#[test]
fn refresh_requires_id_or_url() {
    assert!(Cli::try_parse_from(["wsdb-cli", "refresh"]).is_err());
    assert!(Cli::try_parse_from(["wsdb-cli", "refresh", "--id", "4", "--url", "https://x.com/p"]).is_err());

    let cli = Cli::try_parse_from(["wsdb-cli", "refresh", "--id", "4"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Commands::Refresh {
            id: Some(4),
            url: None
        }
    ));
}

#[test]
fn parses_scheduled_audit() {
    let cli = Cli::try_parse_from([
        "wsdb-cli",
        "audit",
        "--platform",
        "made_in_china",
        "--schedule",
        "0 */30 * * * *",
    ])
    .expect("expected valid cli args");

    match cli.command {
        Commands::Audit {
            platform,
            from,
            schedule,
            once,
        } => {
            assert_eq!(platform.as_deref(), Some("made_in_china"));
            assert_eq!(from, None);
            assert_eq!(schedule.as_deref(), Some("0 */30 * * * *"));
            assert!(!once);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn once_conflicts_with_schedule() {
    assert!(Cli::try_parse_from(["wsdb-cli", "audit", "--once", "--schedule", "0 0 * * * *"]).is_err());
    assert!(Cli::try_parse_from(["wsdb-cli", "audit", "--once", "--from", "120"]).is_ok());
}

#[test]
fn parses_deny_image() {
    let cli = Cli::try_parse_from([
        "wsdb-cli",
        "deny-image",
        "da39a3ee5e6b4b0d3255bfef95601890afd80709",
    ])
    .expect("expected valid cli args");
    assert!(matches!(cli.command, Commands::DenyImage { ref hash } if hash.len() == 40));
}

#[test]
fn missing_command_is_an_error() {
    assert!(Cli::try_parse_from(["wsdb-cli"]).is_err());
}
