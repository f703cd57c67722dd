use std::future::Future;
use std::time::Duration;

use evlog::meta;

use crate::error::LotteryError;
use crate::runtime::get_logger;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, LotteryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LotteryError>>,
    {
        let mut attempt = 1;

        loop {
            match call().await {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    get_logger().debug("Transient store failure; retrying.", meta! {
                        "Operation" => operation,
                        "Attempt" => attempt,
                        "Error" => e.to_string(),
                    });

                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    get_logger().error("Store unavailable; giving up.", meta! {
                        "Operation" => operation,
                        "Attempts" => attempt,
                        "Error" => e.to_string(),
                    });
                    return Err(e);
                }
                r => return r,
            }
        }
    }
}
