//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use crate::account::{short_address, truncate_display};
use crate::chain::ChainSpec;
use crate::config::Config;
use crate::loader::host::{HttpFetcher, MemoryHost, ResourceFetcher, RuntimeHost, StaticFetcher};
use crate::loader::RuntimeLoader;
use crate::session::prompt::{AutoConfirm, ConsolePrompt, DisconnectPrompt};
use crate::session::{ConnectionSession, SessionState};
use crate::transport::injected::InjectedTransport;
use crate::transport::remote::RemoteTransport;
use crate::transport::simulated::SimulatedWallet;
use crate::transport::{Provider, TransportKind};

const PRIMARY_ACCOUNT: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";
const SECONDARY_ACCOUNT: &str = "0xd1220a0cf47c7b9be7a2e6ba89f429762e7b9adb";

/// Run a full connect lifecycle against the deterministic simulated wallet
/// environment, rendering every published state transition.
pub async fn connect(config: &Config, kind: TransportKind, yes: bool) -> Result<()> {
    info!(transport = %kind, "starting connect lifecycle demo");
    let chain = config.effective_chain();

    // Deterministic stand-in for the page environment. The wallet starts on
    // Ethereum so the network switch (register + switch) is exercised.
    let host = MemoryHost::new();
    let fetcher = StaticFetcher::new();
    let wallet = SimulatedWallet::new("0x1");
    wallet.set_accounts(&[PRIMARY_ACCOUNT]);
    wallet.set_balance(PRIMARY_ACCOUNT, 12_500_000_000_000_000_000);
    wallet.set_balance(SECONDARY_ACCOUNT, 3_250_000_000_000_000_000);

    match kind {
        TransportKind::Injected => {
            host.install("ethereum", Some(wallet.clone() as Arc<dyn Provider>));
        }
        TransportKind::Remote => {
            // the local runtime copy exists; executing it registers the
            // provider a beat later, like the real wrapper bundle
            fetcher.put(&config.loader.local_url, b"// wallet provider umd bundle");
            host.stage(
                &config.loader.local_url,
                "EthereumProvider",
                Some(wallet.clone() as Arc<dyn Provider>),
                Some(Duration::from_millis(300)),
            );
            if config.walletconnect.project_id.trim().is_empty() {
                println!("note: walletconnect.project_id is not set, expect a recoverable failure");
            }
        }
    }

    let prompt: Arc<dyn DisconnectPrompt> =
        if yes || !config.session.require_disconnect_confirmation {
            Arc::new(AutoConfirm)
        } else {
            Arc::new(ConsolePrompt)
        };

    let mut session = ConnectionSession::new(chain.clone(), prompt);
    session.register_transport(Arc::new(InjectedTransport::new(
        host.clone() as Arc<dyn RuntimeHost>,
        config.injected_candidates(),
        Duration::from_millis(config.injected.wait_ms),
        Duration::from_millis(config.injected.poll_interval_ms),
    )));
    let loader = RuntimeLoader::new(
        fetcher.clone() as Arc<dyn ResourceFetcher>,
        host.clone() as Arc<dyn RuntimeHost>,
        config.loader.timings(),
    );
    session.register_transport(Arc::new(RemoteTransport::new(
        loader,
        host.clone() as Arc<dyn RuntimeHost>,
        config.wallet_runtime_request(),
        config.walletconnect.project_id.clone(),
    )));

    // render every published transition - the UI-sync boundary
    let mut state_rx = session.subscribe();
    render(&chain, &state_rx.borrow().clone());
    let render_chain = chain.clone();
    let printer = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow().clone();
            render(&render_chain, &state);
        }
    });

    session.connect(kind).await?;

    // exercise the supervised lifecycle: account change, network drift,
    // explicit disconnect
    sleep(Duration::from_millis(300)).await;
    wallet.emit_accounts_changed(&[SECONDARY_ACCOUNT]);
    sleep(Duration::from_millis(300)).await;
    wallet.emit_chain_changed("0x1");
    sleep(Duration::from_millis(500)).await;

    if !session.disconnect().await? {
        info!("session kept at user request");
    }
    sleep(Duration::from_millis(100)).await;
    printer.abort();

    Ok(())
}

fn render(chain: &ChainSpec, state: &SessionState) {
    match state {
        SessionState::Disconnected => println!("  [ ] disconnected"),
        SessionState::Loading(kind) => println!("  [~] loading {} transport...", kind),
        SessionState::VerifyingChain => println!("  [~] verifying network..."),
        SessionState::Connected { account, chain_ok } => {
            let advisory = if *chain_ok {
                ""
            } else {
                "  (please switch your wallet back to the required network)"
            };
            println!(
                "  [*] connected {}  {} {}{}",
                short_address(&account.address),
                truncate_display(&account.balance, 4),
                chain.native_currency.symbol,
                advisory
            );
        }
        SessionState::Failed { reason } => println!("  [!] failed: {}", reason),
    }
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check reachability of the configured runtime script sources
pub async fn health(config: &Config) -> Result<()> {
    println!("Checking runtime script sources...");
    let fetcher = HttpFetcher::new(config.loader.head_timeout())?;

    let sources = [
        ("local ", &config.loader.local_url),
        ("remote", &config.loader.remote_url),
    ];
    let checks = sources.map(|(label, url)| {
        let fetcher = &fetcher;
        async move { (label, url, fetcher.exists(url).await) }
    });
    for (label, url, outcome) in futures::future::join_all(checks).await {
        match outcome {
            Ok(true) => println!("  {} {} - reachable", label, url),
            Ok(false) => println!("  {} {} - not present", label, url),
            Err(e) => println!("  {} {} - check failed: {}", label, url, e),
        }
    }

    println!();
    println!("A missing local copy is fine; the loader falls back to the remote source.");
    Ok(())
}
