use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::protocol;

use super::utils::Backend;

/// Speak the tool protocol over stdin/stdout with a private session
pub async fn handle_serve(config: &Config) -> Result<()> {
    info!("Starting {:?} session for stdio tools", config.browser.engine);
    match Backend::from_config(config)? {
        Backend::Cdp(automation) => protocol::serve(automation).await,
        Backend::WebDriver(automation) => protocol::serve(automation).await,
    }
}
