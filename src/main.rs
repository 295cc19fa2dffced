use fibo_trader::broker::{LogNotifier, Notifier};
use fibo_trader::bybit_api::BybitClient;
use fibo_trader::config::Config;
use fibo_trader::telegram::TelegramNotifier;
use fibo_trader::trader::Trader;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // ── Fatal setup: config, credentials ─────────────────────────────────────
    let config = Config::load_default()?;
    let bybit = BybitClient::new(&config.bybit)?;

    match TelegramNotifier::from_env() {
        Some(tg) => run(config, bybit, tg).await,
        None => {
            log::warn!("TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set — notifications go to the log");
            run(config, bybit, LogNotifier).await
        }
    }
}

async fn run<N: Notifier>(config: Config, bybit: BybitClient, notifier: N) -> Result<(), Box<dyn std::error::Error>> {
    let mut trader = Trader::new(config, bybit.clone(), bybit, notifier);

    // Initial balance doubles as the session check; failure aborts startup.
    trader.start().await?;

    trader
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Ctrl-C handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    log::info!("Fibo Trader stopped");
    Ok(())
}
