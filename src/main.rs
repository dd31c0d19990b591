use std::path::Path;
use std::time::Duration;
use surebet_data::market::{market_query, markets_pages, Market, MarketFilter};
use surebet_data::{BindingState, Config, QueryClient, QueryOptions, ResourceBinding};
use tracing::{error, info, warn};

const CONFIG_PATH: &str = "surebet-data.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = if Path::new(CONFIG_PATH).exists() {
        Config::load(Path::new(CONFIG_PATH))?
    } else {
        Config::from_env()?
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!(base_url = %config.api.base_url, "surebet-data v{} starting", env!("CARGO_PKG_VERSION"));

    let client = QueryClient::new(&config)?;

    // First page of open markets, highest volume first.
    let filter = MarketFilter::open().order_by("volumeNum", false);
    let pages = markets_pages(&client, &filter, 20);
    if !pages.fetch_next().await {
        if let Some(e) = pages.state().error {
            error!(error = %e, "failed to list markets");
        }
        return Ok(());
    }

    let state = pages.state();
    let markets: Vec<&Market> = state.pages.iter().flatten().collect();
    for m in &markets {
        info!(
            id = %m.market_id(),
            volume = m.volume_num.unwrap_or(0.0),
            prices = ?m.outcome_prices(),
            "{}",
            m.question.as_deref().unwrap_or("???")
        );
    }

    let Some(top) = markets.first() else {
        warn!("no open markets returned");
        return Ok(());
    };

    // Follow the top market for a minute.
    let binding: ResourceBinding<Market> =
        ResourceBinding::new(client.clone(), QueryOptions::default().poll_every(Duration::from_secs(10)));
    binding.activate(market_query(&client, top.market_id()));

    let mut rx = binding.subscribe();
    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let result = rx.borrow_and_update().clone();
                match result.state {
                    BindingState::Success(m) => info!(
                        id = %m.market_id(),
                        prices = ?m.outcome_prices(),
                        "market updated"
                    ),
                    BindingState::Error(e) => warn!(error = %e, "market refresh failed"),
                    _ => {}
                }
            }
        }
    }

    binding.deactivate();
    info!("done");
    Ok(())
}
