use std::time::Duration;

use lichess_http::{CancellationToken, ClientOptions, Host, LichessClient, LichessError, Request};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct TvFeedFrame {
    t: String,
}

fn live_client() -> Option<LichessClient> {
    if std::env::var("LICHESS_LIVE").as_deref() != Ok("1") {
        eprintln!("skipping live test: set LICHESS_LIVE=1 to run against lichess.org");
        return None;
    }
    let client = LichessClient::from_env().expect("LICHESS_* env vars must be valid");
    let options = ClientOptions {
        max_rate_limit_retries: 1,
        ..client.options().clone()
    };
    Some(client.with_options(options))
}

#[tokio::test]
async fn live_public_user_and_missing_user() -> anyhow::Result<()> {
    let Some(client) = live_client() else {
        return Ok(());
    };
    let cancel = CancellationToken::new();

    let user: User = client
        .send_json(&Request::get("/api/user/thibault"), &cancel)
        .await?;
    assert_eq!(user.id, "thibault");
    assert!(user.username.eq_ignore_ascii_case("thibault"));

    let missing = client
        .send_json::<serde_json::Value>(
            &Request::get("/api/user/this-user-should-not-exist-0000"),
            &cancel,
        )
        .await;
    assert!(matches!(missing, Err(LichessError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn live_tv_feed_early_break() -> anyhow::Result<()> {
    let Some(client) = live_client() else {
        return Ok(());
    };
    let cancel = CancellationToken::new();

    let mut feed = client
        .execute_streaming::<TvFeedFrame>(&Request::get("/api/tv/feed"), &cancel)
        .await?;

    let first = tokio::time::timeout(Duration::from_secs(30), feed.next())
        .await?
        .expect("tv feed must yield a frame")?;
    assert!(!first.t.is_empty());

    feed.close();
    assert!(!feed.is_open());
    Ok(())
}

#[tokio::test]
async fn live_opening_explorer_masters() -> anyhow::Result<()> {
    let Some(client) = live_client() else {
        return Ok(());
    };

    let result = client
        .send_json::<serde_json::Value>(
            &Request::get("/masters").on(Host::Explorer).query("play", "e2e4"),
            &CancellationToken::new(),
        )
        .await;

    match result {
        Ok(body) => assert!(body.get("moves").is_some()),
        // The explorer requires a token for some deployments.
        Err(LichessError::Authentication { .. }) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
