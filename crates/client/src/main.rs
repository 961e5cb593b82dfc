//! `pmo-session`: inspect and drive the local session from a terminal.
//!
//! ```text
//! pmo-session status            rehydrated state, then validated state
//! pmo-session sign-in <email>   password read from PMO_PASSWORD
//! pmo-session sign-out
//! pmo-session watch             print every state change until Ctrl-C
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::json;

use pmo_auth::{AuthState, explain_access};
use pmo_client::{
    AuthStore, ClientConfig, FileSnapshotStore, MemorySnapshotStore, RestBackend, SessionListener,
    SnapshotStore,
};

const ENV_PASSWORD: &str = "PMO_PASSWORD";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pmo_observability::init();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let backend = Arc::new(RestBackend::from_config(&config)?);

    let snapshots: Arc<dyn SnapshotStore> = match FileSnapshotStore::from_config(&config) {
        Some(store) => Arc::new(store),
        None => {
            tracing::warn!("no data directory available; session snapshot kept in memory");
            Arc::new(MemorySnapshotStore::new())
        }
    };
    let init_timeout = config.init_timeout;
    let store = AuthStore::new(backend.clone(), snapshots, config);

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("status") => {
            print_state("rehydrated", &store.state())?;
            store.initialize().await;
            print_state("validated", &store.state())?;
        }
        Some("sign-in") => {
            let email = args.next().context("usage: pmo-session sign-in <email>")?;
            let password = std::env::var(ENV_PASSWORD)
                .with_context(|| format!("{ENV_PASSWORD} must be set"))?;

            let listener = SessionListener::start(store.clone(), backend.as_ref());
            let mut changes = store.subscribe();
            changes.mark_unchanged();

            backend.sign_in_with_password(&email, &password).await?;

            let settled = tokio::time::timeout(init_timeout, changes.wait_for(|s| s.is_settled()))
                .await
                .is_ok_and(|r| r.is_ok());
            listener.shutdown().await;
            if !settled {
                bail!("signed in, but the profile did not load in time");
            }
            print_state("signed-in", &store.state())?;
        }
        Some("sign-out") => {
            store.sign_out().await;
            print_state("signed-out", &store.state())?;
        }
        Some("watch") => {
            let listener = SessionListener::start(store.clone(), backend.as_ref());
            store.initialize().await;
            print_state("validated", &store.state())?;

            let mut changes = store.subscribe();
            changes.mark_unchanged();
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let state = changes.borrow_and_update().clone();
                        print_state("changed", &state)?;
                    }
                    _ = &mut ctrl_c => break,
                }
            }
            listener.shutdown().await;
        }
        Some(other) => bail!("unknown command '{other}' (expected status, sign-in, sign-out or watch)"),
    }

    Ok(())
}

fn print_state(phase: &str, state: &AuthState) -> anyhow::Result<()> {
    let line = json!({
        "phase": phase,
        "state": state,
        "access": explain_access(state, None),
    });
    println!("{}", serde_json::to_string_pretty(&line)?);
    Ok(())
}
