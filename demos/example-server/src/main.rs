use bunstone::config::{AppOptions, ConfigService, listen_addr};
use bunstone::prelude::*;
use tracing_subscriber::EnvFilter;

mod app_module;
mod modules;

use app_module::AppModule;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bunstone=info,example_server=info")),
        )
        .init();

    let config = ConfigService::new();
    let mut options = AppOptions::from_config(&config)?;
    if options.views_dir.is_none() {
        options.views_dir = Some(concat!(env!("CARGO_MANIFEST_DIR"), "/views").into());
    }

    let app = Application::builder()
        .module::<AppModule>()
        .options(options)
        .build()
        .await?;

    app.listen(listen_addr(&config)?).await?;
    Ok(())
}
