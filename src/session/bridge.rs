//! Event bridge
//!
//! One task per session consumes the provider's notification stream and
//! republishes it as session transitions. Every asynchronous effect it
//! starts is tagged with the session generation (and, for balance
//! refreshes, the address it was requested for) so a late result can never
//! touch a newer session's state.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account;
use crate::error::Result;
use crate::guard;
use crate::session::Shared;
use crate::transport::{methods, Provider, ProviderEvent};

pub(crate) fn spawn(
    shared: Arc<Shared>,
    provider: Arc<dyn Provider>,
    events: mpsc::Receiver<ProviderEvent>,
    generation: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, provider, events, generation, cancel))
}

async fn run(
    shared: Arc<Shared>,
    provider: Arc<dyn Provider>,
    mut events: mpsc::Receiver<ProviderEvent>,
    generation: u64,
    cancel: CancellationToken,
) {
    debug!(generation, "event bridge attached");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                None => {
                    debug!(generation, "provider event stream closed");
                    shared.force_disconnect(generation).await;
                    break;
                }
                Some(event) => {
                    // a failing handler drops that event only, never the session
                    if let Err(e) = handle_event(&shared, &provider, generation, &event).await {
                        warn!(error = %e, ?event, "wallet event handler failed, event dropped");
                    }
                }
            }
        }
    }
    debug!(generation, "event bridge detached");
}

async fn handle_event(
    shared: &Arc<Shared>,
    provider: &Arc<dyn Provider>,
    generation: u64,
    event: &ProviderEvent,
) -> Result<()> {
    match event {
        ProviderEvent::AccountsChanged(accounts) => match accounts.first() {
            None => {
                info!("wallet revoked all accounts");
                shared.force_disconnect(generation).await;
            }
            Some(raw) => {
                // address is authoritative immediately; balance follows
                let address = account::to_checksum_address(raw)?;
                if shared.update_address(generation, &address).await {
                    spawn_balance_refresh(
                        Arc::clone(shared),
                        Arc::clone(provider),
                        generation,
                        address,
                    );
                }
            }
        },
        ProviderEvent::ChainChanged(chain_id) => {
            if shared.chain.matches_hex(chain_id) {
                shared.set_chain_ok(generation, true).await;
            } else {
                warn!(reported = %chain_id, required = %shared.chain.chain_id_hex,
                    "wallet moved off the required network");
                match guard::ensure_chain(provider.as_ref(), &shared.chain).await {
                    Ok(()) => shared.set_chain_ok(generation, true).await,
                    Err(e) => {
                        // advisory only: the wallet may still hold valid accounts
                        warn!(error = %e, "could not bring wallet back to the required network");
                        shared.set_chain_ok(generation, false).await;
                    }
                }
            }
        }
        ProviderEvent::Disconnected => {
            info!("wallet disconnected on its side");
            shared.force_disconnect(generation).await;
        }
    }
    Ok(())
}

fn spawn_balance_refresh(
    shared: Arc<Shared>,
    provider: Arc<dyn Provider>,
    generation: u64,
    address: String,
) {
    tokio::spawn(async move {
        let decimals = shared.chain.native_currency.decimals;
        match fetch_balance(provider.as_ref(), &address, decimals).await {
            // applied only if this generation and address are still current
            Ok(balance) => shared.apply_balance(generation, &address, balance).await,
            Err(e) => warn!(error = %e, address = %address, "balance refresh failed"),
        }
    });
}

/// Read an address's native balance as a full precision decimal string
pub(crate) async fn fetch_balance(
    provider: &dyn Provider,
    address: &str,
    decimals: u8,
) -> Result<String> {
    let wei: String = serde_json::from_value(
        provider
            .request(methods::ETH_GET_BALANCE, json!([address, "latest"]))
            .await?,
    )?;
    account::format_units(&wei, decimals)
}
