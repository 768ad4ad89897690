use std::sync::Arc;

use mediacdn_http::{AttemptEvent, CdnClient, CdnError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/products/img_123.jpg".to_owned());

    let cdn = CdnClient::from_env()
        .map_err(anyhow::Error::msg)?
        .with_sink(Arc::new(|event: &AttemptEvent| {
            eprintln!(
                "attempt {} for {}: {:?} (next delay {:?})",
                event.attempt, event.target, event.outcome, event.delay_before_next
            );
        }));

    match cdn.fetch_asset(&path).await {
        Ok(bytes) => println!("fetched {path}: {} byte(s)", bytes.len()),
        Err(CdnError::RetryExhausted { attempts, last }) => {
            eprintln!("gave up on {path} after {attempts} attempt(s): {last}");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
