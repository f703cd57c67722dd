use std::sync::Arc;

use evlog::{meta, LogEventConsolePrinter, Logger};

use drawkeeper::config::Config;
use drawkeeper::db::dbclient::DBClient;
use drawkeeper::db::memory::MemoryStore;
use drawkeeper::db::LotteryStore;
use drawkeeper::lottery::selection::RandomPicker;
use drawkeeper::lottery::Lottery;
use drawkeeper::notify::LogNotifier;
use drawkeeper::runtime::{get_logger, set_logger};
use drawkeeper::{scheduler, support};

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn LotteryStore>> {
    let store: Arc<dyn LotteryStore> = match &config.database_url {
        Some(url) => Arc::new(DBClient::new(url, config.db_max_connections).await?),
        None => {
            get_logger().info("No database configured; using in-memory store.", meta! {
                "Store" => "memory",
            });
            Arc::new(MemoryStore::new())
        }
    };

    Ok(store)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let mut logger = Logger::default();
    logger.register(LogEventConsolePrinter::default());
    set_logger(logger);

    let config = match Config::from_env() {
        Ok(v) => v,
        Err(e) => {
            get_logger().error("Invalid configuration.", meta! {
                "Error" => format!("{:#}", e),
            });
            return;
        }
    };

    let store = match open_store(&config).await {
        Ok(v) => v,
        Err(e) => {
            get_logger().error("Failed to open lottery store.", meta! {
                "Error" => format!("{:#}", e),
            });
            return;
        }
    };

    let lottery = Arc::new(Lottery::new(
        store,
        Arc::new(RandomPicker),
        Arc::new(LogNotifier),
        config.lottery.clone(),
    ));

    if config.seed {
        match support::seed::seed_draw_types(&lottery).await {
            Ok(added) => {
                get_logger().info("Seeded draw types.", meta! {
                    "Added" => added,
                });
            }
            Err(e) => {
                get_logger().error("Failed to seed draw types.", meta! {
                    "Error" => e.to_string(),
                });
                return;
            }
        }
    }

    scheduler::run(lottery, &config).await;
}
