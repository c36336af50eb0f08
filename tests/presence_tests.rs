// Integration tests for voice presence helpers
//
// Voice states are seeded directly on the loopback transport.

use anyhow::Result;
use loqa_voice::transport::{
    is_channel_empty, leave_voice, users_in_voice_channels, LoopbackConfig, LoopbackTransport,
    VoiceConnection, VoiceTransport,
};

const KEY: &str = "guild-1";

#[tokio::test]
async fn test_users_in_voice_channels_lists_every_channel() -> Result<()> {
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    transport.set_voice_state(KEY, "alice", "voice-1");
    transport.set_voice_state(KEY, "bob", "voice-2");
    transport.set_voice_state("guild-2", "carol", "voice-9");

    let mut states = users_in_voice_channels(&transport, KEY).await?;
    states.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    let pairs: Vec<(&str, &str)> = states
        .iter()
        .map(|vs| (vs.user_id.as_str(), vs.channel_id.as_str()))
        .collect();
    assert_eq!(pairs, vec![("alice", "voice-1"), ("bob", "voice-2")]);

    Ok(())
}

#[tokio::test]
async fn test_moving_user_updates_presence() -> Result<()> {
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    transport.set_voice_state(KEY, "alice", "voice-1");
    transport.set_voice_state(KEY, "alice", "voice-2");

    assert!(is_channel_empty(&transport, KEY, "voice-1").await?);
    assert!(!is_channel_empty(&transport, KEY, "voice-2").await?);

    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_an_error() {
    let transport = LoopbackTransport::new(LoopbackConfig::default());

    let err = users_in_voice_channels(&transport, "missing").await.unwrap_err();
    assert!(format!("{:#}", err).contains("error getting voice states for missing"));

    let err = is_channel_empty(&transport, "missing", "voice-1").await.unwrap_err();
    assert!(format!("{:#}", err).contains("error getting voice states for missing"));
}

#[tokio::test]
async fn test_joining_makes_channel_occupied() -> Result<()> {
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    transport.set_voice_state(KEY, "alice", "voice-1");
    assert!(is_channel_empty(&transport, KEY, "voice-3").await?);

    transport.join(KEY, "voice-3", true, false).await?;
    assert!(!is_channel_empty(&transport, KEY, "voice-3").await?);

    Ok(())
}

#[tokio::test]
async fn test_leave_voice_closes_connection() -> Result<()> {
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    let connection = transport.join(KEY, "voice-1", false, true).await?;

    leave_voice(&transport, KEY).await?;
    assert!(!connection.is_ready());
    assert!(transport.connection(KEY).is_none());

    // Leaving again without a connection is a no-op
    leave_voice(&transport, KEY).await?;

    Ok(())
}
