//! Read, plan, apply, delete and import for grammar-described resources.
//!
//! Everything here is generic over [`CommandRunner`], so the same code drives a
//! live device session and a recorded replay.

use std::borrow::Cow;
use std::future::Future;

use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ApplyFailure, EngineError};
use crate::grammar::{CompiledCollection, Grammar, Record, Value};
use crate::session::{Command, CommandResult, ExitSignal};

pub use plan::{CommandPlan, PlanPhase, PlannedCommand, diff, removal};

mod plan;

/// Something that executes one command and returns its framed result.
///
/// Device errors come back as a result with [`ExitSignal::DeviceError`]; only
/// session-level failures are `Err`.
pub trait CommandRunner {
    fn run(
        &mut self,
        command: &Command,
    ) -> impl Future<Output = Result<CommandResult, EngineError>> + Send;

    /// The command text as it may be logged.
    fn redact<'a>(&self, command: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(command)
    }
}

fn loggable<R: CommandRunner>(runner: &R, plan: &CommandPlan) -> Vec<String> {
    plan.commands()
        .iter()
        .map(|command| runner.redact(command).into_owned())
        .collect()
}

/// Knobs for mutating operations.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Sent after a non-empty plan to persist the configuration.
    pub save: Option<Command>,
}

/// Reads the current state of the resource `grammar` is bound to.
///
/// A grammar with identity fields must be bound first, see [`Grammar::bind`].
pub async fn read<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
) -> Result<Option<Record>, EngineError> {
    grammar.ensure_bound()?;
    let mut lines = Vec::new();
    for text in grammar.query_commands()? {
        let command = Command::query(text).with_privilege(grammar.query_privilege());
        let result = runner.run(&command).await?;
        if let ExitSignal::DeviceError { message } = &result.signal {
            return Err(EngineError::DeviceError {
                command: command.text,
                message: message.clone(),
            });
        }
        lines.extend(result.lines);
    }
    grammar.parse(&lines)
}

/// Normalizes `desired` and binds the grammar to its identity.
fn prepare(grammar: &Grammar, desired: &Record) -> Result<(Grammar, Record), EngineError> {
    let desired = grammar.normalize(desired)?;
    let bound = grammar.bind(&desired)?;
    Ok((bound, desired))
}

async fn current_state<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
) -> Result<Record, EngineError> {
    Ok(read(runner, grammar)
        .await?
        .unwrap_or_else(|| grammar.empty_record()))
}

/// Computes the commands [`apply`] would send, without sending them.
pub async fn plan<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
    desired: &Record,
) -> Result<CommandPlan, EngineError> {
    let (grammar, desired) = prepare(grammar, desired)?;
    let current = current_state(runner, &grammar).await?;
    diff(&grammar, &current, &desired)
}

/// Why a plan step did not complete.
enum StepFailure {
    Device(String),
    Fatal(EngineError),
}

async fn execute_plan<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
    plan: &CommandPlan,
    tolerate_absent: bool,
) -> Result<(), EngineError> {
    let commands = plan.commands();
    for (idx, text) in commands.iter().enumerate() {
        let command = Command::mutation(text.clone()).with_privilege(grammar.mutation_privilege());
        let failure = match runner.run(&command).await {
            Ok(result) => match &result.signal {
                ExitSignal::DeviceError { .. } if tolerate_absent && result.absent => {
                    debug!(
                        "{}: '{}' reports an absent object, ignored",
                        plan.resource,
                        runner.redact(text)
                    );
                    continue;
                }
                ExitSignal::DeviceError { message } => StepFailure::Device(message.clone()),
                ExitSignal::Timeout => StepFailure::Device("timed out".to_string()),
                ExitSignal::Success => continue,
            },
            Err(
                err @ (EngineError::SessionError { .. }
                | EngineError::TimeoutError { .. }
                | EngineError::TransportClosedError),
            ) => StepFailure::Device(err.to_string()),
            Err(err) => StepFailure::Fatal(err),
        };
        return match failure {
            StepFailure::Fatal(err) => Err(err),
            StepFailure::Device(reason) => {
                Err(EngineError::ApplyError(Box::new(ApplyFailure {
                    resource: plan.resource.clone(),
                    executed: commands[..idx].to_vec(),
                    failed: text.clone(),
                    pending: commands[idx + 1..].to_vec(),
                    reason,
                })))
            }
        };
    }
    Ok(())
}

async fn save<R: CommandRunner>(runner: &mut R, command: &Command) -> Result<(), EngineError> {
    let result = runner.run(command).await?;
    match result.error_message() {
        Some(message) => Err(EngineError::DeviceError {
            command: command.text.clone(),
            message: message.to_string(),
        }),
        None => Ok(()),
    }
}

/// Converges the device onto `desired` and returns the state read back afterwards.
///
/// Commands run in plan order; the first failure stops the run with
/// [`EngineError::ApplyError`]. Nothing is rolled back.
pub async fn apply<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
    desired: &Record,
    options: &ApplyOptions,
) -> Result<Record, EngineError> {
    let (grammar, desired) = prepare(grammar, desired)?;
    let current = current_state(runner, &grammar).await?;
    let plan = diff(&grammar, &current, &desired)?;

    if plan.is_empty() {
        debug!("{}: already converged", grammar.name());
    } else {
        info!(
            "{}: applying {} command(s): {:?}",
            grammar.name(),
            plan.len(),
            loggable(runner, &plan)
        );
        execute_plan(runner, &grammar, &plan, false).await?;
        if let Some(command) = options.save.as_ref() {
            save(runner, command).await?;
        }
    }

    current_state(runner, &grammar).await
}

/// Removes the resource `grammar` is bound to. Removing an absent resource succeeds.
pub async fn delete<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
    options: &ApplyOptions,
) -> Result<(), EngineError> {
    grammar.ensure_bound()?;
    let Some(current) = read(runner, grammar).await? else {
        debug!("{}: already absent", grammar.name());
        return Ok(());
    };
    let plan = removal(grammar, &current)?;
    if plan.is_empty() {
        return Ok(());
    }
    info!(
        "{}: removing with {} command(s): {:?}",
        grammar.name(),
        plan.len(),
        loggable(runner, &plan)
    );
    execute_plan(runner, grammar, &plan, true).await?;
    if let Some(command) = options.save.as_ref() {
        save(runner, command).await?;
    }
    Ok(())
}

/// Reads an existing instance so it can be brought under management.
pub async fn import<R: CommandRunner>(
    runner: &mut R,
    grammar: &Grammar,
    identity: &Record,
) -> Result<Record, EngineError> {
    let bound = grammar.bind(identity)?;
    read(runner, &bound).await?.ok_or_else(|| {
        let which = bound
            .binding()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        EngineError::NotFoundError(format!("{} {}", grammar.name(), which).trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::catalog;
    use std::collections::HashMap;

    /// Answers from a fixed table and records every command it sees.
    #[derive(Default)]
    struct TableRunner {
        replies: HashMap<String, CommandResult>,
        seen: Vec<String>,
    }

    impl TableRunner {
        fn reply(mut self, command: &str, lines: &[&str]) -> Self {
            self.replies.insert(command.to_string(), ok(command, lines));
            self
        }

        fn fail(mut self, command: &str, message: &str, absent: bool) -> Self {
            let mut result = ok(command, &[]);
            result.signal = ExitSignal::DeviceError {
                message: message.to_string(),
            };
            result.absent = absent;
            self.replies.insert(command.to_string(), result);
            self
        }
    }

    fn ok(command: &str, lines: &[&str]) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
            signal: ExitSignal::Success,
            absent: false,
            elapsed_ms: 1,
            prompt: None,
        }
    }

    impl CommandRunner for TableRunner {
        async fn run(&mut self, command: &Command) -> Result<CommandResult, EngineError> {
            self.seen.push(command.text.clone());
            Ok(self
                .replies
                .get(&command.text)
                .cloned()
                .unwrap_or_else(|| ok(&command.text, &[])))
        }
    }

    const SYSLOG_QUERY: &str = "show config | grep syslog";

    #[tokio::test]
    async fn rejected_query_is_a_device_error() {
        let grammar = catalog::grammar("syslog").expect("grammar");
        let mut runner = TableRunner::default().fail(SYSLOG_QUERY, "Error: Invalid parameter", false);

        let err = match read(&mut runner, &grammar).await {
            Ok(record) => panic!("unexpected record: {record:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::DeviceError { .. }));
    }

    #[tokio::test]
    async fn device_error_stops_the_plan() {
        let grammar = catalog::grammar("syslog").expect("grammar");
        let mut runner = TableRunner::default()
            .reply(SYSLOG_QUERY, &["syslog host 10.0.0.3"])
            .fail("syslog host 10.0.0.2", "Error: Invalid parameter", false);
        let desired = Record::new()
            .with("notice", true)
            .with(
                "hosts",
                vec![
                    Record::new().with("address", "10.0.0.2"),
                    Record::new().with("address", "10.0.0.4"),
                ],
            );

        let err = match apply(&mut runner, &grammar, &desired, &ApplyOptions::default()).await {
            Ok(record) => panic!("unexpected record: {record:?}"),
            Err(err) => err,
        };
        let failure = match err {
            EngineError::ApplyError(failure) => failure,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(failure.executed, vec!["no syslog host 10.0.0.3", "syslog notice on"]);
        assert_eq!(failure.failed, "syslog host 10.0.0.2");
        assert_eq!(failure.pending, vec!["syslog host 10.0.0.4"]);
        assert_eq!(failure.reason, "Error: Invalid parameter");
    }

    #[tokio::test]
    async fn delete_of_absent_resource_sends_nothing() {
        let grammar = catalog::grammar("syslog").expect("grammar");
        let mut runner = TableRunner::default();

        delete(&mut runner, &grammar, &ApplyOptions::default())
            .await
            .expect("delete");
        assert_eq!(runner.seen, vec![SYSLOG_QUERY]);
    }

    #[tokio::test]
    async fn delete_ignores_absent_errors() {
        let grammar = catalog::grammar("syslog").expect("grammar");
        let mut runner = TableRunner::default()
            .reply(SYSLOG_QUERY, &["syslog host 10.0.0.1", "syslog host 10.0.0.2"])
            .fail("no syslog host 10.0.0.1", "Error: Host not found", true);

        delete(&mut runner, &grammar, &ApplyOptions::default())
            .await
            .expect("delete");
        assert_eq!(
            runner.seen,
            vec![SYSLOG_QUERY, "no syslog host 10.0.0.1", "no syslog host 10.0.0.2"]
        );
    }

    #[tokio::test]
    async fn unbound_route_is_neither_read_nor_deleted() {
        let grammar = catalog::grammar("static_route").expect("grammar");
        let mut runner = TableRunner::default();

        let err = match delete(&mut runner, &grammar, &ApplyOptions::default()).await {
            Ok(()) => panic!("unbound delete accepted"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::InvalidRecord(_)));
        assert!(read(&mut runner, &grammar).await.is_err());
        assert!(runner.seen.is_empty());
    }

    #[tokio::test]
    async fn import_of_missing_instance_is_not_found() {
        let grammar = catalog::grammar("nat_masquerade").expect("grammar");
        let mut runner = TableRunner::default();

        let err = match import(&mut runner, &grammar, &Record::new().with("descriptor_id", 1)).await {
            Ok(record) => panic!("unexpected record: {record:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::NotFoundError(_)));
    }

    #[tokio::test]
    async fn save_is_skipped_for_an_empty_plan() {
        let grammar = catalog::grammar("syslog").expect("grammar");
        let mut runner = TableRunner::default().reply(SYSLOG_QUERY, &["syslog notice on"]);
        let options = ApplyOptions {
            save: Some(Command::mutation("save")),
        };

        apply(&mut runner, &grammar, &Record::new().with("notice", true), &options)
            .await
            .expect("apply");
        assert_eq!(runner.seen, vec![SYSLOG_QUERY, SYSLOG_QUERY]);
    }
}
