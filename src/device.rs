//! Device CLI dialect handling.
//!
//! A [`DeviceDialect`] knows how a family of routers talks: what its prompts look
//! like at each privilege level, how it paginates, which lines report an error,
//! which prompts need an automatic answer, how administrator mode is entered, and
//! where its fixed-width terminal wraps long configuration lines.
//!
//! Line classification works like a small state machine: every pattern is compiled
//! into a single [`RegexSet`], and the lowest matching index decides the
//! [`LineClass`] of a line.

use std::borrow::Cow;
use std::collections::HashMap;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::session::{CommandKind, Privilege};

/// Declarative description of a CLI dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DialectSpec {
    pub name: String,
    /// Prompt patterns shown in normal (unprivileged) mode.
    pub user_prompts: Vec<String>,
    /// Prompt patterns shown in administrator mode.
    pub admin_prompts: Vec<String>,
    /// Pagination markers.
    pub more_patterns: Vec<String>,
    /// Keystroke that fetches the next page.
    pub more_answer: String,
    /// Lines reporting a rejected command. Matched case-insensitively.
    pub error_patterns: Vec<String>,
    /// Error messages that mean "object already absent".
    pub absent_patterns: Vec<String>,
    /// Prompts answered automatically while a command runs.
    pub input_rules: Vec<InputRule>,
    pub elevation: Elevation,
    /// Commands sent after login. `{width}` expands to the negotiated line width.
    pub init_commands: Vec<String>,
    pub exit_command: String,
    pub save_command: String,
    /// Appended to every command written to the shell.
    pub terminator: String,
    /// Start-of-line pattern marking a wrapped continuation.
    pub continuation: String,
    /// Prefixes of read-only commands.
    pub query_prefixes: Vec<String>,
    /// Prefixes of commands that list configuration text. Only their output is
    /// joined on the continuation marker; tables keep their rows.
    pub config_prefixes: Vec<String>,
    /// Commands matching these carry secrets and are redacted in logs and
    /// recordings. Matched case-insensitively.
    pub sensitive_patterns: Vec<String>,
}

/// An automatic answer to an interactive prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InputRule {
    pub pattern: String,
    pub answer: String,
}

/// How administrator mode is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Elevation {
    pub command: String,
    pub password_prompt: String,
    /// Replies that mean the password was refused. Matched case-insensitively.
    pub failure_patterns: Vec<String>,
}

/// Classification of one line of shell output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Output,
    More,
    Error,
    Prompt(Privilege),
    /// Index into the dialect's input rules.
    Input(usize),
}

/// Compiled dialect.
#[derive(Debug, Clone)]
pub struct DeviceDialect {
    spec: DialectSpec,

    /// Combined set of every classification pattern
    all_regex: RegexSet,

    /// Maps regex match index to its line class
    regex_index_map: HashMap<usize, LineClass>,

    absent: Option<RegexSet>,
    password_prompt: Regex,
    elevation_failure: RegexSet,
    continuation: Regex,
    sensitive: Option<RegexSet>,
}

/// Stands in for a command that carries a secret.
pub const REDACTED: &str = "<redacted>";

/// Control residue a terminal leaves at the start of redrawn lines.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]") {
    Ok(re) => re,
    Err(err) => panic!("invalid ANSI_ESCAPE regex: {err}"),
});

fn has_prefix(prefixes: &[String], command: &str) -> bool {
    let cmd = command.trim().to_ascii_lowercase();
    prefixes
        .iter()
        .any(|prefix| cmd == prefix.trim_end() || cmd.starts_with(prefix.as_str()))
}

fn prompt_pattern(pattern: &str) -> String {
    format!(r"^\x00*\r{{0,1}}{}", pattern.trim_start_matches('^'))
}

fn compile_set(label: &str, patterns: &[String], case_insensitive: bool) -> Result<RegexSet, EngineError> {
    let patterns = patterns.iter().map(|p| {
        if case_insensitive {
            format!("(?i){p}")
        } else {
            p.clone()
        }
    });
    RegexSet::new(patterns)
        .map_err(|err| EngineError::InvalidDialect(format!("invalid {label} patterns: {err}")))
}

impl DeviceDialect {
    /// Compiles a dialect description.
    pub fn new(spec: DialectSpec) -> Result<DeviceDialect, EngineError> {
        if spec.admin_prompts.is_empty() || spec.user_prompts.is_empty() {
            return Err(EngineError::InvalidDialect(format!(
                "dialect '{}' needs both user and admin prompts",
                spec.name
            )));
        }

        let mut regexs: Vec<String> = Vec::new();
        let mut regex_index_map = HashMap::new();

        let mut push = |patterns: Vec<String>, class: LineClass| {
            for pattern in patterns {
                regex_index_map.insert(regexs.len(), class);
                regexs.push(pattern);
            }
        };

        push(spec.more_patterns.clone(), LineClass::More);
        push(
            spec.error_patterns.iter().map(|p| format!("(?i){p}")).collect(),
            LineClass::Error,
        );
        push(
            spec.admin_prompts.iter().map(|p| prompt_pattern(p)).collect(),
            LineClass::Prompt(Privilege::Administrator),
        );
        push(
            spec.user_prompts.iter().map(|p| prompt_pattern(p)).collect(),
            LineClass::Prompt(Privilege::Normal),
        );
        for (idx, rule) in spec.input_rules.iter().enumerate() {
            push(vec![rule.pattern.clone()], LineClass::Input(idx));
        }

        let all_regex = RegexSet::new(&regexs).map_err(|err| {
            EngineError::InvalidDialect(format!("failed to build line regex set: {err}"))
        })?;

        let absent = if spec.absent_patterns.is_empty() {
            None
        } else {
            Some(compile_set("absent", &spec.absent_patterns, true)?)
        };
        let password_prompt = Regex::new(&spec.elevation.password_prompt).map_err(|err| {
            EngineError::InvalidDialect(format!("invalid password prompt: {err}"))
        })?;
        let elevation_failure = compile_set(
            "elevation failure",
            &spec.elevation.failure_patterns,
            true,
        )?;
        let continuation = Regex::new(&spec.continuation).map_err(|err| {
            EngineError::InvalidDialect(format!("invalid continuation pattern: {err}"))
        })?;
        let sensitive = if spec.sensitive_patterns.is_empty() {
            None
        } else {
            Some(compile_set("sensitive", &spec.sensitive_patterns, true)?)
        };

        Ok(Self {
            spec,
            all_regex,
            regex_index_map,
            absent,
            password_prompt,
            elevation_failure,
            continuation,
            sensitive,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &DialectSpec {
        &self.spec
    }

    /// Classifies a line; the first declared matching pattern wins.
    pub fn classify(&self, line: &str) -> LineClass {
        let class = self
            .all_regex
            .matches(line)
            .into_iter()
            .next()
            .and_then(|index| self.regex_index_map.get(&index).copied())
            .unwrap_or(LineClass::Output);
        trace!("Classified {:?} as {:?}", line, class);
        class
    }

    /// Returns the privilege level a prompt line reveals, if it is a prompt.
    pub fn prompt_privilege(&self, line: &str) -> Option<Privilege> {
        match self.classify(line) {
            LineClass::Prompt(privilege) => Some(privilege),
            _ => None,
        }
    }

    pub fn input_answer(&self, index: usize) -> Option<&str> {
        self.spec.input_rules.get(index).map(|r| r.answer.as_str())
    }

    pub fn is_password_prompt(&self, text: &str) -> bool {
        self.password_prompt.is_match(text)
    }

    pub fn is_elevation_failure(&self, text: &str) -> bool {
        self.elevation_failure.is_match(text)
    }

    /// Whether a device error message means the target object does not exist.
    pub fn is_absent_error(&self, message: &str) -> bool {
        self.absent
            .as_ref()
            .map(|set| set.is_match(message))
            .unwrap_or(false)
    }

    pub fn is_sensitive(&self, text: &str) -> bool {
        self.sensitive
            .as_ref()
            .is_some_and(|set| set.is_match(text))
    }

    /// The command as it may appear in logs: whole, or [`REDACTED`].
    pub fn redact<'a>(&self, command: &'a str) -> Cow<'a, str> {
        if self.is_sensitive(command) {
            Cow::Borrowed(REDACTED)
        } else {
            Cow::Borrowed(command)
        }
    }

    /// Redacts each sensitive line of a transcript, keeping line terminators.
    pub fn redact_lines<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.is_sensitive(text) {
            return Cow::Borrowed(text);
        }
        let redacted = text
            .split_inclusive('\n')
            .map(|line| {
                if self.is_sensitive(line) {
                    let body = line.trim_end_matches(['\r', '\n']).len();
                    format!("{REDACTED}{}", &line[body..])
                } else {
                    line.to_string()
                }
            })
            .collect();
        Cow::Owned(redacted)
    }

    pub fn command_kind(&self, command: &str) -> CommandKind {
        if has_prefix(&self.spec.query_prefixes, command) {
            CommandKind::Query
        } else {
            CommandKind::Mutation
        }
    }

    /// Whether `command` prints configuration lines.
    pub fn lists_config(&self, command: &str) -> bool {
        has_prefix(&self.spec.config_prefixes, command)
    }

    /// Init commands with the line width substituted.
    pub fn init_commands(&self, width: usize) -> Vec<String> {
        self.spec
            .init_commands
            .iter()
            .map(|c| c.replace("{width}", &width.to_string()))
            .collect()
    }

    /// Strips terminal control residue from a raw line.
    pub fn clean_line(&self, raw: &str) -> String {
        let without_ansi = ANSI_ESCAPE.replace_all(raw, "");
        let without_residue = IGNORE_START_LINE.replace(&without_ansi, "");
        without_residue
            .trim_end_matches(['\r', '\n', '\0'])
            .to_string()
    }

    /// Reassembles the output of `command`.
    ///
    /// Configuration listings get [`reassemble_wrapped`](Self::reassemble_wrapped);
    /// anything else only has full-width rows joined.
    pub fn reassemble_output(&self, command: &str, lines: Vec<String>, width: usize) -> Vec<String> {
        self.reassemble(lines, width, self.lists_config(command))
    }

    /// Joins physical lines the terminal broke at its fixed width.
    ///
    /// A physical line continues the previous logical line when the previous one
    /// filled the whole width, or when it starts with the continuation marker. A
    /// digit continuation is glued without a space only when it sits in column 0 and
    /// the previous line ended in a digit (a number split in two); `=` is always
    /// glued.
    pub fn reassemble_wrapped(&self, lines: Vec<String>, width: usize) -> Vec<String> {
        self.reassemble(lines, width, true)
    }

    fn reassemble(&self, lines: Vec<String>, width: usize, markers: bool) -> Vec<String> {
        let mut joined: Vec<String> = Vec::with_capacity(lines.len());
        let mut prev_physical_len = 0usize;

        for raw in lines {
            let physical_len = raw.chars().count();
            let trimmed = raw.trim();
            let Some(last) = joined.last_mut() else {
                prev_physical_len = physical_len;
                joined.push(raw);
                continue;
            };
            if trimmed.is_empty() || last.trim().is_empty() {
                prev_physical_len = physical_len;
                joined.push(raw);
                continue;
            }

            let indented = raw.starts_with(char::is_whitespace);
            if width > 0 && prev_physical_len >= width {
                if indented {
                    last.push(' ');
                }
                // The row may itself be full, so its trailing blank is content.
                last.push_str(raw.trim_start());
            } else if markers && self.continuation.is_match(&raw) {
                if trimmed.starts_with('=') {
                    let kept = last.trim_end().len();
                    last.truncate(kept);
                    last.push_str(trimmed);
                } else if !indented && last.ends_with(|c: char| c.is_ascii_digit()) {
                    last.push_str(trimmed);
                } else {
                    let kept = last.trim_end().len();
                    last.truncate(kept);
                    last.push(' ');
                    last.push_str(trimmed);
                }
            } else {
                prev_physical_len = physical_len;
                joined.push(raw);
                continue;
            }
            prev_physical_len = physical_len;
        }
        joined
    }
}
