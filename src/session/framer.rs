use super::*;

use regex::Regex;

use crate::config::EngineConfig;
use crate::device::LineClass;

/// Lines gathered while waiting for a command to complete.
#[derive(Default)]
struct Collected {
    lines: Vec<String>,
    error: Option<String>,
}

impl Session {
    /// Connects, waits for the first prompt and prepares the terminal.
    pub async fn open<C: Connector>(
        connector: &C,
        target: &DeviceTarget,
        dialect: Arc<DeviceDialect>,
        config: &EngineConfig,
        recorder: Option<SessionRecorder>,
    ) -> Result<Session, EngineError> {
        let device = target.key();
        let mut channel = connector.connect(target, config.line_width).await?;
        channel.set_recorder(recorder.clone(), dialect.clone());

        let mut session = Session {
            channel,
            dialect,
            device,
            privilege: Privilege::Normal,
            line_width: config.line_width,
            last_activity: Instant::now(),
            prompt: String::new(),
            admin_password: target.admin_password.clone(),
            recorder,
            closed: false,
        };

        let login_timeout = config.login_timeout();
        match tokio::time::timeout(login_timeout, session.wait_for_prompt()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(EngineError::ConnectError(format!(
                    "{}: no prompt within {:?}",
                    session.device, login_timeout
                )));
            }
        }
        debug!("{} logged in, prompt {:?}", session.device, session.prompt);

        for text in session.dialect.init_commands(session.line_width) {
            let command = Command::mutation(text).with_privilege(Privilege::Normal);
            let result = session.execute(&command, config.command_timeout()).await?;
            if let Some(message) = result.error_message() {
                debug!(
                    "{} init command '{}' rejected: {}",
                    session.device, command.text, message
                );
            }
        }

        session.record(SessionEvent::ConnectionEstablished {
            device_addr: session.device.clone(),
            prompt: session.prompt.clone(),
            privilege: session.privilege,
        });
        Ok(session)
    }

    async fn wait_for_prompt(&mut self) -> Result<(), EngineError> {
        loop {
            match self.channel.next_line().await? {
                Line::Full(raw) => trace!("{} banner: {:?}", self.device, raw),
                Line::Pending(raw) => {
                    let tail = self.dialect.clean_line(&raw);
                    match self.dialect.classify(&tail) {
                        LineClass::Prompt(privilege) => {
                            self.channel.take_pending();
                            self.privilege = privilege;
                            self.prompt = tail;
                            return Ok(());
                        }
                        LineClass::Input(idx) => {
                            self.channel.take_pending();
                            self.answer_input(idx).await?;
                        }
                        LineClass::More => {
                            self.channel.take_pending();
                            self.channel.write(&self.dialect.spec().more_answer).await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Sends one command and frames its response.
    ///
    /// Raises privilege first when the command needs it. A device error line is
    /// reported through [`ExitSignal::DeviceError`], not as an `Err`; only
    /// transport, timeout and elevation failures are errors here.
    pub async fn execute(
        &mut self,
        command: &Command,
        timeout: Duration,
    ) -> Result<CommandResult, EngineError> {
        if !self.is_usable() {
            self.closed = true;
            return Err(EngineError::TransportClosedError);
        }
        if command.privilege > self.privilege {
            self.elevate(timeout).await?;
        }

        let confirm = match command.confirm.as_ref() {
            Some(confirmation) => {
                let prompt = Regex::new(&confirmation.prompt).map_err(|e| {
                    EngineError::InternalError(format!("invalid confirmation prompt: {e}"))
                })?;
                Some((prompt, confirmation.answer.clone()))
            }
            None => None,
        };

        let start = Instant::now();
        self.channel.drain();
        debug!("{} >> {}", self.device, self.dialect.redact(&command.text));
        let terminator = self.dialect.spec().terminator.clone();
        self.channel
            .write(&format!("{}{}", command.text, terminator))
            .await
            .inspect_err(|_| self.closed = true)?;

        let mut collected = Collected::default();
        let outcome =
            tokio::time::timeout(timeout, self.collect(confirm.as_ref(), &mut collected)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if matches!(err, EngineError::TransportClosedError) {
                    self.closed = true;
                }
                return Err(err);
            }
            Err(_) => {
                let elapsed = start.elapsed();
                debug!(
                    "{} '{}' timed out after {:?}",
                    self.device,
                    self.dialect.redact(&command.text),
                    elapsed
                );
                let partial = collected.lines.join("\n");
                self.record(SessionEvent::CommandOutput(CommandResult {
                    command: command.text.clone(),
                    lines: collected.lines,
                    signal: ExitSignal::Timeout,
                    absent: false,
                    elapsed_ms: elapsed.as_millis() as u64,
                    prompt: None,
                }));
                return Err(EngineError::TimeoutError {
                    command: command.text.clone(),
                    elapsed,
                    partial,
                });
            }
        }

        let lines = self.frame(&command.text, collected.lines);
        let absent = collected
            .error
            .as_deref()
            .is_some_and(|message| self.dialect.is_absent_error(message));
        let signal = match collected.error {
            Some(message) => ExitSignal::DeviceError { message },
            None => ExitSignal::Success,
        };

        self.last_activity = Instant::now();
        let result = CommandResult {
            command: command.text.clone(),
            lines,
            signal,
            absent,
            elapsed_ms: start.elapsed().as_millis() as u64,
            prompt: Some(self.prompt.clone()),
        };
        self.record(SessionEvent::CommandOutput(result.clone()));
        Ok(result)
    }

    async fn collect(
        &mut self,
        confirm: Option<&(Regex, String)>,
        out: &mut Collected,
    ) -> Result<(), EngineError> {
        loop {
            match self.channel.next_line().await? {
                Line::Full(raw) => {
                    let line = self.dialect.clean_line(&raw);
                    match self.dialect.classify(&line) {
                        LineClass::Error => {
                            if out.error.is_none() {
                                out.error = Some(line.trim().to_string());
                            }
                            out.lines.push(line);
                        }
                        LineClass::More => {
                            self.channel.write(&self.dialect.spec().more_answer).await?;
                        }
                        _ => out.lines.push(line),
                    }
                }
                Line::Pending(raw) => {
                    let tail = self.dialect.clean_line(&raw);
                    if let Some((prompt, answer)) = confirm
                        && prompt.is_match(&tail)
                    {
                        self.channel.take_pending();
                        let terminator = &self.dialect.spec().terminator;
                        self.channel.write(&format!("{answer}{terminator}")).await?;
                        continue;
                    }
                    match self.dialect.classify(&tail) {
                        LineClass::Prompt(privilege) => {
                            self.channel.take_pending();
                            if privilege < self.privilege {
                                debug!("{} left administrator mode", self.device);
                            }
                            self.privilege = privilege;
                            self.prompt = tail;
                            return Ok(());
                        }
                        LineClass::More => {
                            self.channel.take_pending();
                            self.channel.write(&self.dialect.spec().more_answer).await?;
                        }
                        LineClass::Input(idx) => {
                            self.channel.take_pending();
                            self.answer_input(idx).await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn answer_input(&mut self, idx: usize) -> Result<(), EngineError> {
        if let Some(answer) = self.dialect.input_answer(idx) {
            debug!("{} answering prompt with {:?}", self.device, answer);
            let text = format!("{}{}", answer, self.dialect.spec().terminator);
            self.channel.write(&text).await?;
        }
        Ok(())
    }

    /// Reassembles wrapped lines, then drops the echo and blank edges.
    fn frame(&self, command: &str, lines: Vec<String>) -> Vec<String> {
        let mut lines = self
            .dialect
            .reassemble_output(command, lines, self.line_width);
        while lines.first().is_some_and(|l| l.trim().is_empty()) {
            lines.remove(0);
        }
        if let Some(first) = lines.first() {
            let echo = first.trim();
            if !command.is_empty() && (echo == command || echo.ends_with(command)) {
                lines.remove(0);
            }
        }
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        lines
    }

    async fn elevate(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let Some(password) = self.admin_password.clone() else {
            return Err(EngineError::PrivilegeError(format!(
                "{}: no administrator password configured",
                self.device
            )));
        };
        let elevation = self.dialect.spec().elevation.command.clone();
        let terminator = self.dialect.spec().terminator.clone();

        let start = Instant::now();
        self.channel.drain();
        debug!("{} >> {}", self.device, elevation);
        self.channel
            .write(&format!("{elevation}{terminator}"))
            .await
            .inspect_err(|_| self.closed = true)?;

        match tokio::time::timeout(timeout, self.await_elevation(&password, &terminator)).await {
            Ok(Ok(())) => {
                self.last_activity = Instant::now();
                self.record(SessionEvent::PrivilegeRaised {
                    privilege: self.privilege,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                if matches!(err, EngineError::TransportClosedError) {
                    self.closed = true;
                }
                Err(err)
            }
            Err(_) => Err(EngineError::TimeoutError {
                command: elevation,
                elapsed: start.elapsed(),
                partial: String::new(),
            }),
        }
    }

    async fn await_elevation(
        &mut self,
        password: &SecretString,
        terminator: &str,
    ) -> Result<(), EngineError> {
        let mut password_sent = false;
        loop {
            match self.channel.next_line().await? {
                Line::Full(raw) => {
                    let line = self.dialect.clean_line(&raw);
                    if password_sent && self.dialect.is_elevation_failure(&line) {
                        return Err(EngineError::PrivilegeError(format!(
                            "{}: {}",
                            self.device,
                            line.trim()
                        )));
                    }
                }
                Line::Pending(raw) => {
                    let tail = self.dialect.clean_line(&raw);
                    if self.dialect.is_password_prompt(&tail) {
                        self.channel.take_pending();
                        if password_sent {
                            return Err(EngineError::PrivilegeError(format!(
                                "{}: administrator password rejected",
                                self.device
                            )));
                        }
                        debug!("{} >> <redacted>", self.device);
                        self.channel
                            .write(&format!("{}{}", password.expose_secret(), terminator))
                            .await?;
                        password_sent = true;
                        continue;
                    }
                    match self.dialect.classify(&tail) {
                        LineClass::Prompt(Privilege::Administrator) => {
                            self.channel.take_pending();
                            self.privilege = Privilege::Administrator;
                            self.prompt = tail;
                            info!("{} entered administrator mode", self.device);
                            return Ok(());
                        }
                        LineClass::Prompt(Privilege::Normal) => {
                            self.channel.take_pending();
                            self.prompt = tail;
                            return Err(EngineError::PrivilegeError(format!(
                                "{}: administrator mode was not entered",
                                self.device
                            )));
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Leaves administrator mode, logs out and releases the channel.
    ///
    /// Safe to call more than once.
    pub async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.record(SessionEvent::ConnectionClosed {
            reason: reason.to_string(),
        });

        let exit = self.dialect.spec().exit_command.clone();
        if self.privilege == Privilege::Administrator && self.is_usable() {
            let command = Command::mutation(exit.clone()).with_privilege(Privilege::Normal);
            if let Err(err) = self.execute(&command, Duration::from_secs(2)).await {
                debug!("{} leaving administrator mode failed: {}", self.device, err);
            }
        }
        if !self.channel.is_closed() {
            let terminator = self.dialect.spec().terminator.clone();
            let _ = self.channel.write(&format!("{exit}{terminator}")).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.channel.close();
        self.closed = true;
        debug!("{} session closed: {}", self.device, reason);
    }

    /// Drops the channel without logging out.
    ///
    /// Used after a timeout or deadline, when the shell may still be busy with
    /// the previous command.
    pub fn abandon(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.record(SessionEvent::ConnectionClosed {
            reason: reason.to_string(),
        });
        self.channel.close();
        self.closed = true;
        debug!("{} session abandoned: {}", self.device, reason);
    }

    fn record(&self, event: SessionEvent) {
        if let Some(recorder) = self.recorder.as_ref() {
            let event = match event {
                SessionEvent::CommandOutput(mut result) => {
                    result.command = self.dialect.redact(&result.command).into_owned();
                    SessionEvent::CommandOutput(result)
                }
                other => other,
            };
            let _ = recorder.record_event(event);
        }
    }

    pub fn privilege(&self) -> Privilege {
        self.privilege
    }

    /// The last prompt seen.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// `user@host:port` of the device.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn is_usable(&self) -> bool {
        !self.closed && !self.channel.is_closed()
    }

    /// Time since the last completed command.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::REDACTED;
    use crate::templates;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct AlwaysOpen;

    impl Link for AlwaysOpen {
        fn is_closed(&self) -> bool {
            false
        }
    }

    /// Replies to each command line with a canned transcript.
    struct ScriptedShell {
        greeting: String,
        replies: HashMap<String, Vec<String>>,
    }

    impl ScriptedShell {
        fn new(greeting: &str) -> Self {
            Self {
                greeting: greeting.to_string(),
                replies: HashMap::new(),
            }
        }

        fn reply(mut self, input: &str, chunks: &[&str]) -> Self {
            self.replies.insert(
                input.to_string(),
                chunks.iter().map(|c| c.to_string()).collect(),
            );
            self
        }
    }

    impl Connector for ScriptedShell {
        async fn connect(
            &self,
            _target: &DeviceTarget,
            _line_width: usize,
        ) -> Result<ShellChannel, EngineError> {
            let (to_shell, mut from_user) = mpsc::channel::<String>(32);
            let (to_user, from_shell) = mpsc::channel::<String>(32);
            let greeting = self.greeting.clone();
            let prompt = greeting.rsplit('\n').next().unwrap_or_default().to_string();
            let replies = self.replies.clone();
            tokio::spawn(async move {
                let _ = to_user.send(greeting).await;
                while let Some(input) = from_user.recv().await {
                    let key = input.trim_end_matches('\r');
                    let chunks = replies
                        .get(key)
                        .cloned()
                        .unwrap_or_else(|| vec![format!("{key}\r\n{prompt}")]);
                    for chunk in chunks {
                        if to_user.send(chunk).await.is_err() {
                            return;
                        }
                    }
                }
            });
            Ok(ShellChannel::new(to_shell, from_shell, AlwaysOpen))
        }
    }

    fn target() -> DeviceTarget {
        DeviceTarget::new("192.168.100.1", 22, "admin", "secret").with_admin_password("adminpw")
    }

    async fn open(shell: &ScriptedShell) -> Session {
        let dialect = Arc::new(templates::rtx().expect("rtx dialect"));
        Session::open(shell, &target(), dialect, &EngineConfig::default(), None)
            .await
            .expect("session should open")
    }

    #[tokio::test]
    async fn open_waits_for_prompt_and_runs_init_commands() {
        let shell = ScriptedShell::new("Welcome\r\n\r\n[RTX1210] > ");
        let session = open(&shell).await;

        assert_eq!(session.privilege(), Privilege::Normal);
        assert_eq!(session.prompt(), "[RTX1210] > ");
        assert!(session.is_usable());
    }

    #[tokio::test]
    async fn pagination_is_continued_and_echo_stripped() {
        let shell = ScriptedShell::new("[RTX1210] > ")
            .reply(
                "show config | grep syslog",
                &[
                    "show config | grep syslog\r\nsyslog host 10.0.0.1\r\n---MORE---",
                    "syslog facility local0\r\n[RTX1210] > ",
                ],
            )
            .reply(" ", &[]);
        let mut session = open(&shell).await;

        let result = session
            .execute(
                &Command::query("show config | grep syslog"),
                Duration::from_secs(5),
            )
            .await
            .expect("query");

        assert!(result.is_success());
        assert_eq!(
            result.lines,
            vec!["syslog host 10.0.0.1".to_string(), "syslog facility local0".to_string()]
        );
    }

    #[tokio::test]
    async fn first_error_line_becomes_the_signal() {
        let shell = ScriptedShell::new("[RTX1210] # ").reply(
            "no syslog host 10.9.9.9",
            &["no syslog host 10.9.9.9\r\nError: Host not found\r\nError: again\r\n[RTX1210] # "],
        );
        let mut session = open(&shell).await;
        assert_eq!(session.privilege(), Privilege::Administrator);

        let result = session
            .execute(
                &Command::mutation("no syslog host 10.9.9.9"),
                Duration::from_secs(5),
            )
            .await
            .expect("mutation");

        assert_eq!(result.error_message(), Some("Error: Host not found"));
        assert!(result.absent);
    }

    #[tokio::test]
    async fn elevation_sends_password_and_tracks_privilege() {
        let shell = ScriptedShell::new("[RTX1210] > ")
            .reply("administrator", &["administrator\r\nPassword: "])
            .reply("adminpw", &["\r\n[RTX1210] # "])
            .reply("syslog notice on", &["syslog notice on\r\n[RTX1210] # "]);
        let mut session = open(&shell).await;

        let result = session
            .execute(&Command::mutation("syslog notice on"), Duration::from_secs(5))
            .await
            .expect("mutation");

        assert!(result.is_success());
        assert!(result.lines.is_empty());
        assert_eq!(session.privilege(), Privilege::Administrator);
    }

    #[tokio::test]
    async fn rejected_password_is_a_privilege_error() {
        let shell = ScriptedShell::new("[RTX1210] > ")
            .reply("administrator", &["administrator\r\nPassword: "])
            .reply("adminpw", &["\r\nPassword is incorrect.\r\n[RTX1210] > "]);
        let mut session = open(&shell).await;

        let err = match session
            .execute(&Command::mutation("syslog notice on"), Duration::from_secs(5))
            .await
        {
            Ok(result) => panic!("unexpected result: {result:?}"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::PrivilegeError(_)));
        assert_eq!(session.privilege(), Privilege::Normal);
    }

    #[tokio::test]
    async fn silent_device_times_out_with_partial_output() {
        let shell = ScriptedShell::new("[RTX1210] > ")
            .reply("show log", &["show log\r\n2026/10/16 boot\r\n"]);
        let mut session = open(&shell).await;

        let err = match session
            .execute(&Command::query("show log"), Duration::from_millis(200))
            .await
        {
            Ok(result) => panic!("unexpected result: {result:?}"),
            Err(err) => err,
        };
        match err {
            EngineError::TimeoutError { command, partial, .. } => {
                assert_eq!(command, "show log");
                assert!(partial.contains("2026/10/16 boot"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn secrets_are_redacted_in_recordings() {
        let shell = ScriptedShell::new("[RTX1210] # ");
        let dialect = Arc::new(templates::rtx().expect("rtx dialect"));
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        let mut session = Session::open(
            &shell,
            &target(),
            dialect,
            &EngineConfig::default(),
            Some(recorder.clone()),
        )
        .await
        .expect("session should open");

        let result = session
            .execute(&Command::mutation("snmp community public"), Duration::from_secs(5))
            .await
            .expect("mutation");
        assert_eq!(result.command, "snmp community public");

        let jsonl = recorder.to_jsonl().expect("jsonl");
        assert!(!jsonl.contains("public"), "{jsonl}");
        let recorded: Vec<String> = recorder
            .entries()
            .expect("entries")
            .into_iter()
            .filter_map(|entry| match entry.event {
                SessionEvent::CommandOutput(result) => Some(result.command),
                _ => None,
            })
            .collect();
        assert_eq!(recorded.last().map(String::as_str), Some(REDACTED));
    }

    #[tokio::test]
    async fn confirmation_is_answered_from_the_command() {
        let shell = ScriptedShell::new("[RTX1210] # ")
            .reply("clear log", &["clear log\r\nClear log? (Y/N) "])
            .reply("Y", &["\r\n[RTX1210] # "]);
        let mut session = open(&shell).await;

        let command = Command::mutation("clear log").with_confirmation(r"\(Y/N\)", "Y");
        let result = session
            .execute(&command, Duration::from_secs(5))
            .await
            .expect("confirmed command");
        assert!(result.is_success());
    }
}
