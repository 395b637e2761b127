use super::*;

use std::future::Future;

use tokio::sync::mpsc::{Receiver, Sender};

/// Liveness of the connection behind a [`ShellChannel`].
pub trait Link: Send + Sync {
    fn is_closed(&self) -> bool;
}

/// Opens authenticated remote shells.
///
/// Implementations perform the credential exchange, request a terminal of the
/// given width, and hand back the shell as a pair of string channels.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        target: &DeviceTarget,
        line_width: usize,
    ) -> impl Future<Output = Result<ShellChannel, EngineError>> + Send;
}

/// A unit of shell output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A newline-terminated line, terminator included.
    Full(String),
    /// The unterminated tail of the buffer, typically a prompt.
    Pending(String),
}

/// Line-oriented view over a remote shell.
pub struct ShellChannel {
    sender: Sender<String>,
    recv: Receiver<String>,
    link: Box<dyn Link>,
    buffer: String,
    pending_reported: bool,
    recorder: Option<SessionRecorder>,
    /// Redacts raw chunks before they are recorded.
    dialect: Option<Arc<DeviceDialect>>,
}

impl ShellChannel {
    pub fn new(sender: Sender<String>, recv: Receiver<String>, link: impl Link + 'static) -> Self {
        Self {
            sender,
            recv,
            link: Box::new(link),
            buffer: String::new(),
            pending_reported: false,
            recorder: None,
            dialect: None,
        }
    }

    pub(super) fn set_recorder(
        &mut self,
        recorder: Option<SessionRecorder>,
        dialect: Arc<DeviceDialect>,
    ) {
        self.recorder = recorder;
        self.dialect = Some(dialect);
    }

    /// Writes raw text to the shell.
    pub async fn write(&self, data: &str) -> Result<(), EngineError> {
        self.sender
            .send(data.to_string())
            .await
            .map_err(|_| EngineError::TransportClosedError)
    }

    /// Returns the next complete line, or the pending tail once per arrival of new data.
    pub async fn next_line(&mut self) -> Result<Line, EngineError> {
        loop {
            if let Some(newline_pos) = self.buffer.find('\n') {
                let line = self.buffer.drain(..=newline_pos).collect::<String>();
                return Ok(Line::Full(line));
            }
            if !self.buffer.is_empty() && !self.pending_reported {
                self.pending_reported = true;
                return Ok(Line::Pending(self.buffer.clone()));
            }
            match self.recv.recv().await {
                Some(data) => {
                    trace!("{:?}", data);
                    if let Some(recorder) = self.recorder.as_ref() {
                        let chunk = match self.dialect.as_ref() {
                            Some(dialect) => dialect.redact_lines(&data).into_owned(),
                            None => data.clone(),
                        };
                        let _ = recorder.record_raw_chunk(chunk);
                    }
                    self.buffer.push_str(&data);
                    self.pending_reported = false;
                }
                None => return Err(EngineError::TransportClosedError),
            }
        }
    }

    /// Consumes the unterminated tail after it has been handled.
    pub fn take_pending(&mut self) -> String {
        self.pending_reported = false;
        std::mem::take(&mut self.buffer)
    }

    /// Discards residual output left over from a previous exchange.
    pub fn drain(&mut self) {
        while self.recv.try_recv().is_ok() {}
        self.buffer.clear();
        self.pending_reported = false;
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.link.is_closed()
    }

    /// Stops receiving; dropping the channel releases the connection.
    pub fn close(&mut self) {
        self.recv.close();
    }
}
