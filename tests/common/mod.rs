#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rtxsync::config::EngineConfig;
use rtxsync::error::EngineError;
use rtxsync::session::{Connector, DeviceTarget, Engine, Link, ShellChannel};
use rtxsync::templates;
use secrecy::ExposeSecret;
use tokio::sync::mpsc;

pub const LOGIN_PASSWORD: &str = "secret";
pub const ADMIN_PASSWORD: &str = "adminpw";

const USER_PROMPT: &str = "[RTX1210] > ";
const ADMIN_PROMPT: &str = "[RTX1210] # ";
const BANNER: &str = "\r\nRTX1210 Rev.14.01.42 (Fri Jan 10 10:00:00 2025)\r\n  Copyright (c) 1994-2025 Yamaha Corporation.\r\n\r\n";

/// Config keys: a line replaces an earlier one with the same leading words.
const KEY_WORDS: &[(&str, usize)] = &[
    ("syslog host ", 3),
    ("syslog local address", 3),
    ("syslog ", 2),
    ("ip route ", 3),
    ("nat descriptor type ", 4),
    ("nat descriptor address ", 5),
    ("nat descriptor masquerade static ", 6),
    ("dns static ", 3),
    ("dns domain lookup", 3),
    ("dns domain", 2),
    ("dns server", 2),
];

fn config_key(line: &str) -> Option<String> {
    let (_, words) = KEY_WORDS.iter().find(|(prefix, _)| line.starts_with(prefix))?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < *words {
        return None;
    }
    Some(parts[..*words].join(" "))
}

fn descriptor_of(line: &str) -> Option<&str> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["nat", "descriptor", "type", id, ..] => Some(*id),
        ["nat", "descriptor", "address", _, id, ..] => Some(*id),
        ["nat", "descriptor", "masquerade", "static", id, ..] => Some(*id),
        _ => None,
    }
}

/// Router-wide state shared by every connection.
#[derive(Debug, Default)]
pub struct RouterState {
    pub config: Vec<String>,
    /// Configuration commands received, in order, whether accepted or not.
    pub log: Vec<String>,
    pub connects: usize,
    pub saves: usize,
    pub refuse_connects: usize,
    pub page_size: Option<usize>,
    pub fail_on: HashMap<String, String>,
    pub drop_on: HashMap<String, usize>,
    pub hang_on: HashMap<String, usize>,
    /// Canned output of non-config `show` commands.
    pub tables: HashMap<String, Vec<String>>,
    dirty: bool,
}

impl RouterState {
    fn take(counter: &mut HashMap<String, usize>, command: &str) -> bool {
        match counter.get_mut(command) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }

    /// Applies one configuration command; `Err` carries the device message.
    fn configure(&mut self, command: &str) -> Result<(), String> {
        if let Some(message) = self.fail_on.get(command) {
            return Err(message.clone());
        }
        if let Some(rest) = command.strip_prefix("no ") {
            return self.unconfigure(rest);
        }
        let key = config_key(command).ok_or_else(|| "Error: Invalid command name".to_string())?;
        if let Some(id) = descriptor_of(command)
            && !command.starts_with("nat descriptor type ")
            && !self
                .config
                .iter()
                .any(|l| l.starts_with("nat descriptor type ") && descriptor_of(l) == Some(id))
        {
            return Err(format!("Error: NAT descriptor {id} not found"));
        }
        match self
            .config
            .iter()
            .position(|l| config_key(l).as_deref() == Some(key.as_str()))
        {
            Some(pos) => self.config[pos] = command.to_string(),
            None => self.config.push(command.to_string()),
        }
        self.dirty = true;
        Ok(())
    }

    fn unconfigure(&mut self, rest: &str) -> Result<(), String> {
        let before = self.config.len();
        if let Some(id) = rest.strip_prefix("nat descriptor type ") {
            let id = id.split_whitespace().next().unwrap_or_default();
            self.config.retain(|l| descriptor_of(l) != Some(id));
        } else {
            let key = config_key(rest).unwrap_or_else(|| rest.to_string());
            self.config
                .retain(|l| config_key(l).as_deref() != Some(key.as_str()));
        }
        if self.config.len() == before {
            return Err("Error: Specified configuration not found".to_string());
        }
        self.dirty = true;
        Ok(())
    }

    fn show(&self, command: &str) -> Vec<String> {
        if let Some(rows) = self.tables.get(command) {
            return rows.clone();
        }
        match command.strip_prefix("show config | grep ") {
            Some(pattern) => {
                let pattern = pattern.trim_matches('"');
                self.config
                    .iter()
                    .filter(|l| l.contains(pattern))
                    .cloned()
                    .collect()
            }
            None if command == "show config" => self.config.clone(),
            None => vec![format!("{command}: ok")],
        }
    }
}

struct FlagLink(Arc<AtomicBool>);

impl Link for FlagLink {
    fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-connection shell state.
#[derive(Default)]
struct Shell {
    admin: bool,
    awaiting_password: bool,
    awaiting_save_answer: bool,
    more: Vec<String>,
    width: usize,
}

enum Action {
    Reply(String),
    Silent,
    Hangup,
}

fn wrap(line: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    if width == 0 || chars.len() <= width {
        return vec![line.to_string()];
    }
    chars.chunks(width).map(|c| c.iter().collect()).collect()
}

impl Shell {
    fn prompt(&self) -> &'static str {
        if self.admin { ADMIN_PROMPT } else { USER_PROMPT }
    }

    /// Emits physical lines, stopping at a pagination marker when a page fills.
    fn page(&mut self, page_size: Option<usize>, physical: Vec<String>, mut out: String) -> String {
        let (now, rest) = match page_size {
            Some(size) if physical.len() > size => {
                let mut physical = physical;
                let rest = physical.split_off(size);
                (physical, rest)
            }
            _ => (physical, Vec::new()),
        };
        for line in now {
            out.push_str(&line);
            out.push_str("\r\n");
        }
        if rest.is_empty() {
            out.push_str(self.prompt());
        } else {
            out.push_str("---MORE---");
        }
        self.more = rest;
        out
    }

    fn respond(&mut self, state: &mut RouterState, input: &str) -> Action {
        if self.awaiting_password {
            self.awaiting_password = false;
            if input == ADMIN_PASSWORD {
                self.admin = true;
                return Action::Reply(format!("\r\n{ADMIN_PROMPT}"));
            }
            return Action::Reply(format!("\r\nError: Password incorrect\r\n{USER_PROMPT}"));
        }
        if self.awaiting_save_answer {
            self.awaiting_save_answer = false;
            self.admin = false;
            if input.eq_ignore_ascii_case("y") {
                state.saves += 1;
                state.dirty = false;
            }
            return Action::Reply(format!("{input}\r\n{USER_PROMPT}"));
        }
        if input == " " && !self.more.is_empty() {
            let rest = std::mem::take(&mut self.more);
            return Action::Reply(self.page(state.page_size, rest, "\r          \r".to_string()));
        }

        if RouterState::take(&mut state.drop_on, input) {
            return Action::Hangup;
        }
        if RouterState::take(&mut state.hang_on, input) {
            return Action::Silent;
        }

        let echo = format!("{input}\r\n");
        match input {
            "administrator" => {
                self.awaiting_password = true;
                Action::Reply(format!("{echo}Password: "))
            }
            "exit" if self.admin => {
                if state.dirty {
                    self.awaiting_save_answer = true;
                    Action::Reply(format!("{echo}Save new configuration ? (Y/N)"))
                } else {
                    self.admin = false;
                    Action::Reply(format!("{echo}{USER_PROMPT}"))
                }
            }
            "exit" => Action::Hangup,
            "save" if self.admin => {
                state.saves += 1;
                state.dirty = false;
                Action::Reply(format!("{echo}Saving ... CONFIG0 Done.\r\n{ADMIN_PROMPT}"))
            }
            text if text.starts_with("console ") => {
                if let Some(width) = text.strip_prefix("console columns ") {
                    self.width = width.trim().parse().unwrap_or(self.width);
                }
                Action::Reply(format!("{echo}{}", self.prompt()))
            }
            text if text.starts_with("show ") => {
                let physical = state
                    .show(text)
                    .iter()
                    .flat_map(|l| wrap(l, self.width))
                    .collect();
                Action::Reply(self.page(state.page_size, physical, echo))
            }
            text => {
                state.log.push(text.to_string());
                if !self.admin {
                    return Action::Reply(format!(
                        "{echo}Error: Permission denied\r\n{}",
                        self.prompt()
                    ));
                }
                match state.configure(text) {
                    Ok(()) => Action::Reply(format!("{echo}{ADMIN_PROMPT}")),
                    Err(message) => Action::Reply(format!("{echo}{message}\r\n{ADMIN_PROMPT}")),
                }
            }
        }
    }
}

/// An in-memory RTX router speaking the CLI over string channels.
#[derive(Clone, Default)]
pub struct SimulatedRouter {
    state: Arc<Mutex<RouterState>>,
}

impl SimulatedRouter {
    pub fn new(config: &[&str]) -> Self {
        let router = Self::default();
        router.state().config = config.iter().map(|l| l.to_string()).collect();
        router
    }

    pub fn state(&self) -> MutexGuard<'_, RouterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn config(&self) -> Vec<String> {
        self.state().config.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn saves(&self) -> usize {
        self.state().saves
    }

    pub fn fail_on(&self, command: &str, message: &str) {
        self.state()
            .fail_on
            .insert(command.to_string(), message.to_string());
    }

    pub fn drop_on(&self, command: &str, times: usize) {
        self.state().drop_on.insert(command.to_string(), times);
    }

    pub fn hang_on(&self, command: &str, times: usize) {
        self.state().hang_on.insert(command.to_string(), times);
    }

    pub fn table(&self, command: &str, rows: &[&str]) {
        self.state().tables.insert(
            command.to_string(),
            rows.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn paginate(&self, lines: usize) {
        self.state().page_size = Some(lines);
    }
}

impl Connector for SimulatedRouter {
    async fn connect(
        &self,
        target: &DeviceTarget,
        line_width: usize,
    ) -> Result<ShellChannel, EngineError> {
        {
            let mut state = self.state();
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(EngineError::ConnectError(format!(
                    "{}: connection refused",
                    target.key()
                )));
            }
            if target.password.expose_secret() != LOGIN_PASSWORD {
                return Err(EngineError::AuthenticationError {
                    user: target.username.clone(),
                    host: target.host.clone(),
                });
            }
            state.connects += 1;
        }

        let (to_router, mut from_client) = mpsc::channel::<String>(64);
        let (to_client, from_router) = mpsc::channel::<String>(64);
        let closed = Arc::new(AtomicBool::new(false));
        let link = FlagLink(closed.clone());
        let shared = self.state.clone();

        tokio::spawn(async move {
            let mut shell = Shell {
                width: line_width,
                ..Shell::default()
            };
            if to_client
                .send(format!("{BANNER}{USER_PROMPT}"))
                .await
                .is_err()
            {
                return;
            }
            while let Some(input) = from_client.recv().await {
                let input = input.trim_end_matches('\r').to_string();
                let action = {
                    let mut state = match shared.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    shell.respond(&mut state, &input)
                };
                match action {
                    Action::Reply(text) => {
                        if to_client.send(text).await.is_err() {
                            break;
                        }
                    }
                    Action::Silent => {}
                    Action::Hangup => break,
                }
            }
            closed.store(true, Ordering::SeqCst);
        });

        Ok(ShellChannel::new(to_router, from_router, link))
    }
}

pub fn target() -> DeviceTarget {
    DeviceTarget::new("192.168.100.1", 22, "admin", LOGIN_PASSWORD)
        .with_admin_password(ADMIN_PASSWORD)
}

/// Short timeouts, no save.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        command_timeout_ms: 500,
        login_timeout_ms: 500,
        save_after_apply: false,
        ..EngineConfig::default()
    }
}

pub fn engine(router: &SimulatedRouter, config: EngineConfig) -> Engine<SimulatedRouter> {
    let dialect = templates::rtx().expect("rtx dialect");
    Engine::new(router.clone(), dialect, config)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
