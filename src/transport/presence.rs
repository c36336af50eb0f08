use anyhow::{Context, Result};
use tracing::info;

use super::connection::{VoiceState, VoiceTransport};

/// Disconnect and close the session's voice connection, if there is one
pub async fn leave_voice(transport: &dyn VoiceTransport, session_key: &str) -> Result<()> {
    if let Some(connection) = transport.connection(session_key) {
        connection
            .disconnect()
            .await
            .context("error disconnecting from voice channel")?;
        connection.close();
        info!("Left voice channel for session {}", session_key);
    }
    Ok(())
}

/// Users in voice under a session key, paired with their channel
pub async fn users_in_voice_channels(
    transport: &dyn VoiceTransport,
    session_key: &str,
) -> Result<Vec<VoiceState>> {
    transport
        .voice_states(session_key)
        .await
        .with_context(|| format!("error getting voice states for {}", session_key))
}

/// Whether nobody is present in a channel
pub async fn is_channel_empty(
    transport: &dyn VoiceTransport,
    session_key: &str,
    channel_id: &str,
) -> Result<bool> {
    let states = users_in_voice_channels(transport, session_key).await?;
    Ok(!states.iter().any(|vs| vs.channel_id == channel_id))
}
