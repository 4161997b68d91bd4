//! Canonical text produced by `Display` parses back to the same command.

use gantry_command::{parse, BuildNumber, Command, Environment};

fn build(n: u64) -> BuildNumber {
    BuildNumber::new(n).expect("non-zero build")
}

fn commands() -> Vec<Command> {
    let mut commands = vec![
        Command::Build {
            app: "myapp".to_owned(),
            branch: "main".to_owned(),
        },
        Command::Build {
            app: "Billing-API".to_owned(),
            branch: "release/2024.10".to_owned(),
        },
        Command::Status {
            app: "myapp".to_owned(),
        },
        Command::History {
            app: "myapp".to_owned(),
        },
        Command::Help,
    ];

    for environment in Environment::ALL {
        commands.push(Command::Deploy {
            app: "myapp".to_owned(),
            build: build(42),
            environment,
        });
        commands.push(Command::Rollback {
            app: "myapp".to_owned(),
            environment,
        });
    }

    commands
}

#[test]
fn every_variant_round_trips_through_canonical_text() {
    for command in commands() {
        let text = command.to_string();
        let parsed = parse(&text).unwrap_or_else(|e| panic!("`{text}` failed to parse: {e}"));
        assert_eq!(parsed, command, "round trip of `{text}`");
    }
}

#[test]
fn canonical_text_is_a_fixed_point() {
    let parsed = parse("<at>Bot</at>  DEPLOY   myapp  #42   Production ").expect("parse");
    let canonical = parsed.to_string();
    assert_eq!(canonical, "deploy myapp 42 prod");
    assert_eq!(parse(&canonical).expect("reparse").to_string(), canonical);
}

#[test]
fn commands_serialise_with_verb_tag() {
    let command = Command::Rollback {
        app: "myapp".to_owned(),
        environment: Environment::Uat,
    };
    let json = serde_json::to_value(&command).expect("serialise");
    assert_eq!(
        json,
        serde_json::json!({"verb": "rollback", "app": "myapp", "environment": "uat"})
    );
    let back: Command = serde_json::from_value(json).expect("deserialise");
    assert_eq!(back, command);
}
