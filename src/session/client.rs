use super::*;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use russh::ChannelMsg;
use tokio::sync::mpsc;

/// Opens device shells over SSH.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    security_options: ConnectionSecurityOptions,
}

impl SshConnector {
    pub fn new(security_options: ConnectionSecurityOptions) -> Self {
        Self { security_options }
    }

    pub fn security_options(&self) -> &ConnectionSecurityOptions {
        &self.security_options
    }
}

impl Link for Client {
    fn is_closed(&self) -> bool {
        Client::is_closed(self)
    }
}

fn connect_failure(target: &DeviceTarget, err: async_ssh2_tokio::Error) -> EngineError {
    match err {
        async_ssh2_tokio::Error::PasswordWrong | async_ssh2_tokio::Error::KeyAuthFailed => {
            EngineError::AuthenticationError {
                user: target.username.clone(),
                host: target.host.clone(),
            }
        }
        other => EngineError::ConnectError(format!("{}: {other}", target.key())),
    }
}

impl Connector for SshConnector {
    async fn connect(
        &self,
        target: &DeviceTarget,
        line_width: usize,
    ) -> Result<ShellChannel, EngineError> {
        let device_addr = target.key();

        let config = Config {
            preferred: self.security_options.preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (target.host.clone(), target.port),
            &target.username,
            AuthMethod::with_password(target.password.expose_secret()),
            self.security_options.server_check.clone(),
            config,
        )
        .await
        .map_err(|err| connect_failure(target, err))?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client
            .get_channel()
            .await
            .map_err(|e| EngineError::ConnectError(format!("{device_addr}: {e}")))?;
        let width = u32::try_from(line_width).unwrap_or(u32::MAX);
        channel
            .request_pty(false, "vt100", width, 24, 0, 0, &[])
            .await
            .map_err(|e| EngineError::ConnectError(format!("{device_addr}: pty request: {e}")))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| EngineError::ConnectError(format!("{device_addr}: shell request: {e}")))?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => {
                        let Some(data) = data else {
                            debug!("{} Session dropped its writer. Closing shell.", io_task_device_addr);
                            let _ = channel.eof().await;
                            break;
                        };
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let text = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        Ok(ShellChannel::new(sender_to_shell, receiver_from_shell, client))
    }
}
