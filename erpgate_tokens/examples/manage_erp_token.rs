use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use erpgate_tokens::{
    AuthorizationCode, ClientId, ClientSecret, RedirectUri, TokenManager, TokenManagerConfig,
    TokenState,
};
use tokio::time;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
struct Opts {
    /// The ERP authority's token request URL
    #[clap(short, long, env)]
    token_url: String,

    /// The client ID of the middleware
    #[clap(short, long, env)]
    client_id: String,

    /// The client secret used to identify the middleware to the authority
    #[clap(short = 's', long, env, hide_env_values = true)]
    client_secret: String,

    /// The directory that a relative refresh token path is resolved against
    #[clap(short = 'd', long, env, default_value = ".")]
    base_dir: PathBuf,

    /// The file holding the persisted refresh token
    #[clap(short = 'f', long, env, default_value = ".refresh-token")]
    refresh_token_path: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Exchanges the authorization code from the consent redirect
    Exchange {
        /// The code passed to the redirect URI
        #[clap(long)]
        code: String,

        /// The redirect URI registered with the authority
        #[clap(long, env)]
        redirect_uri: String,
    },
    /// Obtains an access token, renewing the grant if necessary
    Token,
    /// Renews the grant even if it is still fresh
    Refresh,
    /// Keeps pulling access tokens until interrupted
    Watch {
        /// Seconds between pulls
        #[clap(long, default_value_t = 5)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = TokenManagerConfig::new(
        opts.token_url,
        ClientId::new(opts.client_id),
        ClientSecret::new(opts.client_secret),
    )
    .with_base_dir(opts.base_dir)
    .with_refresh_token_path(opts.refresh_token_path);

    let manager = TokenManager::new(config).await?;
    tracing::info!(state = ?manager.state(), "token manager ready");

    match opts.command {
        Command::Exchange { code, redirect_uri } => {
            let grant = manager
                .exchange_authorization_code(
                    &AuthorizationCode::new(code),
                    &RedirectUri::new(redirect_uri),
                )
                .await?;
            tracing::info!(
                expires_at = grant.expires_at().0,
                has_refresh_token = grant.refresh_token().is_some(),
                "exchanged authorization code"
            );
        }
        Command::Token => {
            let token = manager.access_token().await?;
            tracing::info!(token = format_args!("{:#?}", token), "obtained access token");
        }
        Command::Refresh => {
            let grant = manager.force_refresh().await?;
            tracing::info!(
                token = format_args!("{:#?}", grant.access_token()),
                expires_at = grant.expires_at().0,
                "renewed grant"
            );
        }
        Command::Watch { interval } => watch(&manager, Duration::from_secs(interval)).await,
    }

    let health = manager.health();
    tracing::info!(
        grants_obtained = health.grants_obtained,
        persistence_failures = health.persistence_failures,
        last_store_error = health.last_store_error.as_deref(),
        "credential health"
    );

    Ok(())
}

async fn watch(manager: &TokenManager, every: Duration) {
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });

    let mut interval = time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match manager.access_token_until_cancelled(&shutdown).await {
            Ok(token) => match manager.state() {
                TokenState::Fresh => tracing::debug!(
                    token = format_args!("{:#?}", token),
                    "pulled token"
                ),
                state => tracing::warn!(?state, "pulled token"),
            },
            Err(error) => tracing::error!(
                error = (&error as &dyn std::error::Error),
                "unable to obtain access token"
            ),
        }
    }
}
