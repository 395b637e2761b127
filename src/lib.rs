//! # rtxsync - Configuration reconciliation for CLI-managed routers
//!
//! `rtxsync` keeps router configuration in line with a desired state. It logs into
//! a device over SSH, reads configuration through `show` commands, parses the text
//! into structured records with declarative grammars, computes the minimal list of
//! CLI commands that converges the device, and runs them in a safe order.
//!
//! ## Features
//!
//! - **Session Coordination**: One serialized SSH session per device, reopened after
//!   idle timeouts, transport loss or credential changes
//! - **Privilege Tracking**: Administrator mode entered on demand, never left mid-session
//! - **Output Framing**: Pagination, echo, wrapped lines and interactive prompts handled
//!   by a per-dialect description
//! - **Declarative Grammars**: JSON documents describing how to read and write a resource
//! - **Convergent Apply**: Removals, then scalar updates, then additions; nothing sent
//!   when the device already matches
//! - **Recording & Replay**: JSONL session recordings that drive the same engine offline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtxsync::config::EngineConfig;
//! use rtxsync::grammar::{Record, catalog};
//! use rtxsync::session::{DeviceTarget, Engine, SshConnector};
//! use rtxsync::templates;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(
//!         SshConnector::default(),
//!         templates::rtx()?,
//!         EngineConfig::default(),
//!     );
//!     let target = DeviceTarget::new("192.168.100.1", 22, "admin", "password")
//!         .with_admin_password("secret");
//!
//!     let syslog = catalog::grammar("syslog")?;
//!     let desired = Record::new().with(
//!         "hosts",
//!         vec![Record::new().with("address", "192.168.1.10")],
//!     );
//!
//!     let device = engine.device(&target);
//!     let plan = device.plan(&syslog, &desired).await?;
//!     println!("{:?}", plan.commands());
//!
//!     let converged = device.apply(&syslog, &desired).await?;
//!     println!("{}", converged.to_json()?);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::Engine`] - Per-device session coordinator
//! - [`session::Session`] - Command framing and privilege handling
//! - [`grammar::Grammar`] - Declarative parser and command templates
//! - [`reconcile`] - Read, plan, apply, delete and import
//! - [`device::DeviceDialect`] - Prompts, errors and line wrapping of a router family
//! - [`error::EngineError`] - Error types for every layer
//! - [`config`] - Engine settings and SSH algorithm profiles

pub mod config;
pub mod device;
pub mod error;
pub mod grammar;
pub mod reconcile;
pub mod session;
pub mod templates;
