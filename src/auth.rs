//! Browser-based login flow.
//!
//! One command stitches four moving parts together: the auth-initiation
//! call, a best-effort browser launch, a loopback HTTP listener that
//! captures the redirect callback, and profile persistence. The
//! listener hands the captured token to the foreground flow over a
//! oneshot rendezvous; a 120-second deadline bounds the whole wait.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::api::Service;
use crate::config::{self, Profile};

/// Fixed loopback port the auth redirect points at. Owned exclusively
/// for the duration of one login; a bind failure fails the invocation.
pub const CALLBACK_PORT: u16 = 53682;

/// Upper bound on waiting for the callback.
const LOGIN_DEADLINE: Duration = Duration::from_secs(120);

/// Upper bound on the platform browser-launcher command.
const BROWSER_LAUNCH_CAP: Duration = Duration::from_secs(120);

/// Run the full login protocol and persist the captured token.
///
/// Precondition (checked by the caller): the profile is not already
/// logged in.
pub async fn login<S: Service + ?Sized>(
    service: &S,
    cfg_path: &Path,
    profile: &mut Profile,
) -> Result<()> {
    login_with_deadline(service, cfg_path, profile, LOGIN_DEADLINE).await
}

async fn login_with_deadline<S: Service + ?Sized>(
    service: &S,
    cfg_path: &Path,
    profile: &mut Profile,
    deadline: Duration,
) -> Result<()> {
    let redirect = format!("http://localhost:{CALLBACK_PORT}/callback");
    let auth_url = service.authenticate(&redirect).await?;

    println!("Open the following URL in your browser:");
    println!("{auth_url}");

    if let Err(e) = open_browser(&auth_url) {
        warn!(error = %e, "could not launch a browser, open the URL manually");
    }

    let (_, token_rx) = spawn_callback_server(CALLBACK_PORT).await?;

    match tokio::time::timeout(deadline, token_rx).await {
        Ok(Ok(token)) if !token.is_empty() => {
            config::save_token(cfg_path, profile, &token)?;
            info!("session token persisted");
            println!("Login successful.");
            Ok(())
        }
        Ok(Ok(_)) => {
            bail!("no token captured — check your browser redirect or copy the token manually")
        }
        Ok(Err(_)) => bail!("callback listener closed before a token arrived"),
        Err(_) => bail!("timeout — run 'twigga login' again or open the auth url manually"),
    }
}

struct CallbackState {
    token_tx: Mutex<Option<oneshot::Sender<String>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

/// Bind the loopback listener and serve `GET /callback` in a background
/// task. Returns the bound address (the port may be 0 in tests) and the
/// receiving half of the token rendezvous. The server shuts down
/// gracefully after the first handled request.
pub async fn spawn_callback_server(
    port: u16,
) -> Result<(std::net::SocketAddr, oneshot::Receiver<String>)> {
    let (token_tx, token_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let state = Arc::new(CallbackState {
        token_tx: Mutex::new(Some(token_tx)),
        shutdown_tx: Mutex::new(Some(shutdown_tx)),
    });

    let app = Router::new()
        .route("/callback", get(callback))
        .with_state(state);

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind callback port {port}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, "callback listener bound");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            warn!(error = %e, "callback listener error");
        }
    });

    Ok((addr, token_rx))
}

async fn callback(
    State(state): State<Arc<CallbackState>>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let pairs: Vec<(String, String)> =
        url::form_urlencoded::parse(query.as_deref().unwrap_or("").as_bytes())
            .into_owned()
            .collect();
    let token = select_token(&pairs);

    let page = if token.is_empty() {
        ERROR_HTML
    } else {
        SUCCESS_HTML
    };

    // Publish exactly once; a second request finds the sender gone and
    // only gets the page.
    if let Some(tx) = state.token_tx.lock().await.take() {
        let _ = tx.send(token);
    }
    if let Some(tx) = state.shutdown_tx.lock().await.take() {
        let _ = tx.send(());
    }

    Html(page)
}

/// Token selection over the callback query string: the `token`
/// parameter when it carries a value, otherwise the first non-empty
/// parameter whose name contains `token` case-insensitively, otherwise
/// empty.
fn select_token(pairs: &[(String, String)]) -> String {
    if let Some((_, v)) = pairs.iter().find(|(k, _)| k == "token") {
        if !v.is_empty() {
            return v.clone();
        }
    }
    pairs
        .iter()
        .find(|(k, v)| !v.is_empty() && k.to_ascii_lowercase().contains("token"))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

/// Launch the platform browser opener on `url`, stdio inherited. The
/// launcher is waited on in the background with a 2-minute cap so a
/// blocking opener cannot stall the callback wait.
fn open_browser(url: &str) -> Result<()> {
    let (program, args) = browser_command(url);
    let mut child = tokio::process::Command::new(program)
        .args(&args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("failed to launch '{program}'"))?;

    tokio::spawn(async move {
        match tokio::time::timeout(BROWSER_LAUNCH_CAP, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                warn!(%status, "browser launcher exited with failure")
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "failed waiting on browser launcher"),
            Err(_) => {
                let _ = child.start_kill();
                warn!("browser launcher still running after 2 minutes, killed");
            }
        }
    });
    Ok(())
}

fn browser_command(url: &str) -> (&'static str, Vec<String>) {
    if cfg!(target_os = "macos") {
        ("open", vec![url.to_string()])
    } else if cfg!(target_os = "windows") {
        (
            "rundll32",
            vec!["url.dll,FileProtocolHandler".to_string(), url.to_string()],
        )
    } else {
        ("xdg-open", vec![url.to_string()])
    }
}

const SUCCESS_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Login successful • Twigga</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
  body { margin: 0; color: #0f172a; font: 14px/1.5 system-ui, sans-serif;
         display: grid; place-items: center; min-height: 100vh; padding: 24px; }
  .card { max-width: 440px; border: 1px solid #e2e8f0; border-radius: 16px;
          padding: 28px; box-shadow: 0 10px 30px rgba(2,6,23,.06); text-align: center; }
  h1 { margin: 8px 0 4px; font-size: 20px; }
  p  { margin: 8px 0 0; color: #64748b; }
</style>
</head>
<body>
  <div class="card" role="status" aria-live="polite">
    <h1>You're logged in to Twigga</h1>
    <p>Authentication completed successfully. You can close this window.</p>
  </div>
</body>
</html>"#;

const ERROR_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Login error • Twigga</title>
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
  body { margin: 0; color: #0f172a; font: 14px/1.5 system-ui, sans-serif;
         display: grid; place-items: center; min-height: 100vh; padding: 24px; }
  .card { max-width: 440px; border: 1px solid #e2e8f0; border-radius: 16px;
          padding: 28px; box-shadow: 0 10px 30px rgba(2,6,23,.06); text-align: center; }
  h1 { margin: 8px 0 4px; font-size: 20px; }
  p  { margin: 8px 0 0; color: #64748b; }
</style>
</head>
<body>
  <div class="card">
    <h1>We couldn't complete login</h1>
    <p>No token was found in the callback URL. Please try again or copy the
    full URL and run <code>twigga login</code> again.</p>
  </div>
</body>
</html>"#;
