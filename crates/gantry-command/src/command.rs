//! Typed commands and their argument types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Deployment target environment.
///
/// Input is case-insensitive and accepts `production` as an alias for
/// `prod`. Output always uses the canonical short name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    /// Quality assurance. Never gated.
    Qa,
    /// User acceptance testing.
    Uat,
    /// Production.
    Production,
}

impl Environment {
    /// All environments in promotion order.
    pub const ALL: [Self; 3] = [Self::Qa, Self::Uat, Self::Production];

    /// Canonical command-line name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Qa => "qa",
            Self::Uat => "uat",
            Self::Production => "prod",
        }
    }

    /// Name used by release-management systems (`QA`, `UAT`, `Production`).
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Qa => "QA",
            Self::Uat => "UAT",
            Self::Production => "Production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qa" => Ok(Self::Qa),
            "uat" => Ok(Self::Uat),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ParseError::InvalidEnvironment(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(env: Environment) -> Self {
        env.as_str().to_owned()
    }
}

/// Build number issued by the build system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildNumber(u64);

impl BuildNumber {
    /// Create a build number. Zero is not a valid build.
    #[must_use]
    pub const fn new(number: u64) -> Option<Self> {
        if number == 0 {
            None
        } else {
            Some(Self(number))
        }
    }

    /// The raw number.
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BuildNumber {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        digits
            .parse::<u64>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ParseError::InvalidBuildNumber(s.to_owned()))
    }
}

/// The leading keyword of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// `build <app> <branch>`
    Build,
    /// `deploy <app> <build#> <environment>`
    Deploy,
    /// `status <app>`
    Status,
    /// `rollback <app> <environment>`
    Rollback,
    /// `history <app>`
    History,
    /// `help`
    Help,
}

impl Verb {
    /// All verbs, in the order they are listed by `help`.
    pub const ALL: [Self; 6] = [
        Self::Build,
        Self::Deploy,
        Self::Status,
        Self::Rollback,
        Self::History,
        Self::Help,
    ];

    /// The keyword as typed in chat.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Status => "status",
            Self::Rollback => "rollback",
            Self::History => "history",
            Self::Help => "help",
        }
    }

    /// Usage line shown in help text and argument errors.
    #[must_use]
    pub const fn usage(&self) -> &'static str {
        match self {
            Self::Build => "build <app> <branch>",
            Self::Deploy => "deploy <app> <build#> <qa|uat|prod>",
            Self::Status => "status <app>",
            Self::Rollback => "rollback <app> <qa|uat|prod>",
            Self::History => "history <app>",
            Self::Help => "help",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|verb| verb.as_str() == lowered)
            .ok_or_else(|| ParseError::UnknownVerb(s.to_owned()))
    }
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Command {
    /// Submit a build of `branch` for `app`.
    Build {
        /// Application name.
        app: String,
        /// Source branch.
        branch: String,
    },
    /// Deploy a finished build to an environment.
    Deploy {
        /// Application name.
        app: String,
        /// Build to deploy.
        build: BuildNumber,
        /// Target environment.
        environment: Environment,
    },
    /// Show build and deployment state for an app.
    Status {
        /// Application name.
        app: String,
    },
    /// Return an environment to its previous good release.
    Rollback {
        /// Application name.
        app: String,
        /// Environment to roll back.
        environment: Environment,
    },
    /// Show recent audited actions for an app.
    History {
        /// Application name.
        app: String,
    },
    /// List the available commands.
    Help,
}

impl Command {
    /// The verb this command was introduced by.
    #[must_use]
    pub const fn verb(&self) -> Verb {
        match self {
            Self::Build { .. } => Verb::Build,
            Self::Deploy { .. } => Verb::Deploy,
            Self::Status { .. } => Verb::Status,
            Self::Rollback { .. } => Verb::Rollback,
            Self::History { .. } => Verb::History,
            Self::Help => Verb::Help,
        }
    }

    /// The application this command targets, if any.
    #[must_use]
    pub fn app(&self) -> Option<&str> {
        match self {
            Self::Build { app, .. }
            | Self::Deploy { app, .. }
            | Self::Status { app }
            | Self::Rollback { app, .. }
            | Self::History { app } => Some(app),
            Self::Help => None,
        }
    }

    /// Multi-line help text listing every command.
    #[must_use]
    pub fn help_text() -> String {
        let mut text = String::from("Available commands:");
        for verb in Verb::ALL {
            text.push_str("\n  ");
            text.push_str(verb.usage());
        }
        text
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build { app, branch } => write!(f, "build {app} {branch}"),
            Self::Deploy {
                app,
                build,
                environment,
            } => write!(f, "deploy {app} {build} {environment}"),
            Self::Status { app } => write!(f, "status {app}"),
            Self::Rollback { app, environment } => write!(f, "rollback {app} {environment}"),
            Self::History { app } => write!(f, "history {app}"),
            Self::Help => f.write_str("help"),
        }
    }
}
