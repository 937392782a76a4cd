use std::env;
use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude::{self as serenity, GatewayIntents, Http};
use tracing::{error, info, warn};
use warden::config::{CONFIG_FILE, WarningConfig};
use warden::warning::{HttpBackend, SerenityPlatform, WarningSystem};
use warden::{BOT_NAME, Data, Error, commands, handlers, logging};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config_path = env::var("WARDEN_CONFIG").unwrap_or_else(|_| CONFIG_FILE.to_string());
    let config = WarningConfig::load(&config_path).await?;
    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;

    let backend = HttpBackend::new(
        config.backend_url.clone(),
        config.backend_token.clone(),
        Duration::from_secs(config.rpc_timeout_secs),
    )?;
    let platform = SerenityPlatform::new(Arc::new(Http::new(&token)));
    let warnings = WarningSystem::new(config, Arc::new(backend), Arc::new(platform));

    // The snapshot gets enforcement going before the backend answers
    if warnings.load_snapshot().await {
        info!(
            restricted_users = warnings.cache().restricted_user_count(),
            "Restriction snapshot loaded"
        );
    }
    match warnings.rehydrate().await {
        Ok(count) => info!(violations = count, "Rehydrated from backend"),
        Err(e) => warn!("Rehydration failed, enforcing from snapshot until the sweeper retries: {e}"),
    }

    let sweeper = warnings.start_sweeper(Duration::from_secs(warnings.config().sweep_interval_secs));
    let data = Data::new(warnings.clone());
    let framework_data = data.clone();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::ping(), commands::violation(), commands::standing()],
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console(&format!("Registering {BOT_NAME} commands"));
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(framework_data)
            })
        })
        .build();

    // Member updates need the privileged members intent
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(handlers::Handler::new(data))
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        shard_manager.shutdown_all().await;
    });

    info!("Starting bot...");
    let result = client.start().await;

    sweeper.shutdown().await;
    if let Err(e) = warnings.save_snapshot().await {
        error!("Failed to save restriction snapshot on shutdown: {e}");
    }

    result?;
    Ok(())
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
