use anyhow::{Context, Result};
use nimbus_auth::StaticIdentityProvider;

#[tokio::main]
async fn main() -> Result<()> {
    nimbus_core::init()?;

    let (config, _warnings) = nimbus_core::Config::load_validated()?;
    let identity = config.identity.identity();
    let app = nimbus_core::App::new(config).context("Failed to build dashboard")?;

    match &identity {
        Some(identity) => tracing::info!("Hello, {}", identity.greeting_name()),
        None => tracing::warn!("No identity configured; dashboard stays signed out"),
    }
    app.start(&StaticIdentityProvider::new(identity));

    let mut weather = app.subscribe_weather();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = weather.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = weather.borrow_and_update().clone();
                if state.loading {
                    tracing::debug!("Fetching weather...");
                } else if let Some(error) = &state.error {
                    tracing::warn!("Weather unavailable: {}", error);
                } else if let Some(snapshot) = &state.snapshot {
                    tracing::info!(
                        "{} (feels like {:.0}), {} | humidity {}% | pressure {} hPa | UV {}",
                        snapshot.temperature_label(),
                        snapshot.feels_like,
                        snapshot.condition_summary,
                        snapshot.humidity,
                        snapshot.pressure,
                        snapshot.uv_index
                    );
                }
            }
        }
    }

    app.shutdown().await;
    Ok(())
}
