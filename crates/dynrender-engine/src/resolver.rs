//! Looks up where a player is standing through `data get entity`.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{RenderError, RenderResult};
use crate::patterns::ConsolePatterns;
use crate::session::ConsoleSession;
use crate::waiter::{ConsoleResponseResult, NoObserver, WaitOptions, wait_for};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap()
});

static PLAYER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{1,16}$").unwrap()
});

static DIMENSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"minecraft:(?P<dimension>[a-z0-9_./-]+)").unwrap()
});

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(-?\d+\.\d+)d, (-?\d+\.\d+)d, (-?\d+\.\d+)d\]").unwrap()
});

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Names are interpolated into console commands, so anything outside the
/// vanilla character set is refused.
pub fn validate_player_name(name: &str) -> RenderResult<()> {
    if PLAYER_NAME.is_match(name) {
        return Ok(());
    }
    Err(RenderError::validation(format!(
        "`{name}` is not a valid player name."
    )))
}

async fn query_entity(
    session: &mut ConsoleSession,
    patterns: &ConsolePatterns,
    player: &str,
    command: String,
    timeout: Duration,
) -> RenderResult<String> {
    session.send_command(&command).await?;
    let response = wait_for(
        session,
        timeout,
        &patterns.entity_data_for(player),
        Some(&patterns.no_entity_found()),
        &WaitOptions::new(),
        &mut NoObserver,
    )
    .await?;

    match response.result {
        ConsoleResponseResult::Success => Ok(strip_ansi(&response.output.unwrap_or_default())),
        ConsoleResponseResult::Failure => Err(RenderError::rejected(format!(
            "Player `{player}` is not on the server."
        ))),
        ConsoleResponseResult::Timeout | ConsoleResponseResult::HeadReached => {
            Err(RenderError::timeout(format!(
                "Did not receive a response when looking up player `{player}`."
            )))
        }
    }
}

/// Returns the dimension id without its `minecraft:` namespace (`overworld`, `the_nether`).
pub async fn resolve_dimension(
    session: &mut ConsoleSession,
    patterns: &ConsolePatterns,
    player: &str,
    timeout: Duration,
) -> RenderResult<String> {
    let output = query_entity(
        session,
        patterns,
        player,
        patterns.entity_dimension(player),
        timeout,
    )
    .await?;
    DIMENSION
        .captures(&output)
        .map(|c| c["dimension"].to_string())
        .ok_or_else(|| {
            RenderError::session(format!(
                "Received an invalid response when looking up the dimension of `{player}`."
            ))
        })
}

/// Returns the player's block X and Z, truncated toward zero.
pub async fn resolve_coordinates(
    session: &mut ConsoleSession,
    patterns: &ConsolePatterns,
    player: &str,
    timeout: Duration,
) -> RenderResult<(i64, i64)> {
    let output = query_entity(
        session,
        patterns,
        player,
        patterns.entity_position(player),
        timeout,
    )
    .await?;
    parse_position(&output).ok_or_else(|| {
        RenderError::session(format!(
            "Received an invalid response when looking up the position of `{player}`."
        ))
    })
}

fn parse_position(output: &str) -> Option<(i64, i64)> {
    let caps = POSITION.captures(output)?;
    let x: f64 = caps[1].parse().ok()?;
    let z: f64 = caps[3].parse().ok()?;
    Some((x as i64, z as i64))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testkit::{FakeCredentials, FakeServer, panel};

    async fn session(server: &FakeServer) -> ConsoleSession {
        ConsoleSession::connect(
            server.connector().as_ref(),
            Arc::new(FakeCredentials::new()),
            panel(),
            Duration::from_secs(10),
        )
        .await
        .unwrap()
    }

    #[test]
    fn strips_color_codes() {
        assert_eq!(
            strip_ansi("\x1b[0;33mSteve\x1b[0m has the following entity data: \x1b[32m\"minecraft:overworld\"\x1b[0m"),
            "Steve has the following entity data: \"minecraft:overworld\""
        );
    }

    #[test]
    fn player_names_are_restricted() {
        assert!(validate_player_name("Steve").is_ok());
        assert!(validate_player_name("a_b_1234567890AB").is_ok());
        assert!(validate_player_name("").is_err());
        assert!(validate_player_name("seventeen_chars_x").is_err());
        let err = validate_player_name("Steve; stop").unwrap_err();
        assert_eq!(err.code(), "invalid_param");
    }

    #[test]
    fn position_truncates_toward_zero() {
        assert_eq!(
            parse_position("Steve has the following entity data: [-12.7d, 64.0d, 250.99d]"),
            Some((-12, 250))
        );
        assert_eq!(parse_position("Steve has the following entity data: [1d, 2d, 3d]"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_dimension_and_position() {
        let server = FakeServer::new();
        server.on_command(
            "data get entity Steve Dimension",
            &["Steve has the following entity data: \"minecraft:the_nether\""],
        );
        server.on_command(
            "data get entity Steve Pos",
            &["Steve has the following entity data: [100.5d, 70.0d, -33.2d]"],
        );
        let mut s = session(&server).await;
        let patterns = ConsolePatterns::default();
        let timeout = Duration::from_secs(10);

        assert_eq!(
            resolve_dimension(&mut s, &patterns, "Steve", timeout).await.unwrap(),
            "the_nether"
        );
        assert_eq!(
            resolve_coordinates(&mut s, &patterns, "Steve", timeout).await.unwrap(),
            (100, -33)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn absent_player_is_rejected_by_name() {
        let server = FakeServer::new();
        server.on_command("data get entity Steve Pos", &["No entity was found"]);
        let mut s = session(&server).await;
        let err = resolve_coordinates(&mut s, &ConsolePatterns::default(), "Steve", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err, RenderError::rejected("Player `Steve` is not on the server."));
        assert_eq!(server.commands(), vec!["data get entity Steve Pos".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_reply_is_a_session_failure() {
        let server = FakeServer::new();
        server.on_command(
            "data get entity Steve Pos",
            &["Steve has the following entity data: somewhere"],
        );
        let mut s = session(&server).await;
        let err = resolve_coordinates(&mut s, &ConsolePatterns::default(), "Steve", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "session_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_console_times_out() {
        let server = FakeServer::new();
        let mut s = session(&server).await;
        let err = resolve_dimension(&mut s, &ConsolePatterns::default(), "Steve", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "timeout");
    }
}
