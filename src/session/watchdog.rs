use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::session::Session;
use crate::transport::{leave_voice, VoiceTransport};

/// Periodic idle check that leaves voice once no audio has played for a while
pub struct DisconnectWatchdog {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl DisconnectWatchdog {
    pub fn spawn(
        session: Weak<Session>,
        transport: Arc<dyn VoiceTransport>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run(
            session,
            transport,
            timeout,
            interval,
            cancel_token.clone(),
        ));
        Self {
            cancel_token,
            handle,
        }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for DisconnectWatchdog {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn run(
    session: Weak<Session>,
    transport: Arc<dyn VoiceTransport>,
    timeout: Duration,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    loop {
        let Some(current) = session.upgrade() else {
            break;
        };

        if current.take_idle_disconnect(timeout) {
            let key = current.key().to_string();
            drop(current);

            info!("Session {} idle for over {:?}, leaving voice", key, timeout);
            if let Err(e) = leave_voice(transport.as_ref(), &key).await {
                error!("Error leaving voice channel: {:#}", e);
            }
        } else {
            drop(current);
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!("Disconnect watchdog stopped");
}
