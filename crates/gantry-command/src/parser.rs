//! Tokeniser and parser for chat command lines.

use std::str::SplitWhitespace;

use crate::command::{BuildNumber, Command, Environment, Verb};
use crate::error::ParseError;

const MENTION_OPEN: &str = "<at>";
const MENTION_CLOSE: &str = "</at>";

/// Parse one chat line into a [`Command`].
///
/// Mention markup and leading `@name` handles are removed first, then the
/// line is split on whitespace.
/// The verb and environment names are matched case-insensitively; app names
/// and branches keep their case. An empty line is a request for help.
/// Extra trailing tokens are ignored.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let text = strip_mentions(line);
    let mut tokens = text.split_whitespace();

    let Some(first) = tokens.next() else {
        return Ok(Command::Help);
    };

    let verb: Verb = first.parse()?;
    let mut args = Args { verb, tokens };

    let command = match verb {
        Verb::Build => {
            let [app, branch] = args.take(["app", "branch"])?;
            Command::Build {
                app: app.to_owned(),
                branch: branch.to_owned(),
            }
        }
        Verb::Deploy => {
            let [app, build, environment] = args.take(["app", "build", "environment"])?;
            Command::Deploy {
                app: app.to_owned(),
                build: build.parse::<BuildNumber>()?,
                environment: environment.parse::<Environment>()?,
            }
        }
        Verb::Status => {
            let [app] = args.take(["app"])?;
            Command::Status {
                app: app.to_owned(),
            }
        }
        Verb::Rollback => {
            let [app, environment] = args.take(["app", "environment"])?;
            Command::Rollback {
                app: app.to_owned(),
                environment: environment.parse::<Environment>()?,
            }
        }
        Verb::History => {
            let [app] = args.take(["app"])?;
            Command::History {
                app: app.to_owned(),
            }
        }
        Verb::Help => Command::Help,
    };

    Ok(command)
}

/// Remove `<at>…</at>` mention tags that chat clients inject ahead of the
/// command text, then any plain `@name` handles that lead the line.
/// Unterminated tags are left in place.
#[must_use]
pub fn strip_mentions(line: &str) -> String {
    let mut text = line.to_owned();
    while let Some(start) = text.find(MENTION_OPEN) {
        let Some(close) = text[start..].find(MENTION_CLOSE) else {
            break;
        };
        let end = start + close + MENTION_CLOSE.len();
        text.replace_range(start..end, " ");
    }
    let handles = leading_handles_len(&text);
    text.replace_range(..handles, "");
    text
}

/// Byte length of the `@name` tokens (and surrounding whitespace) at the
/// start of `text`, or zero when it does not start with one.
fn leading_handles_len(text: &str) -> usize {
    let mut rest = text.trim_start();
    if !rest.starts_with('@') {
        return 0;
    }
    while let Some(tail) = rest.strip_prefix('@') {
        rest = tail
            .trim_start_matches(|c: char| !c.is_whitespace())
            .trim_start();
    }
    text.len() - rest.len()
}

struct Args<'a> {
    verb: Verb,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    /// Take `N` positional arguments, naming the first one that is missing.
    ///
    /// All arguments are collected before any is validated so that an
    /// incomplete command reports its usage rather than a value error.
    fn take<const N: usize>(&mut self, names: [&'static str; N]) -> Result<[&'a str; N], ParseError> {
        let mut out = [""; N];
        for (slot, name) in out.iter_mut().zip(names) {
            *slot = self.tokens.next().ok_or(ParseError::MissingArgument {
                verb: self.verb,
                name,
            })?;
        }
        Ok(out)
    }
}
