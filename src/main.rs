use anyhow::Context;
use dues_ledger::{
    cli::{Command, CLI},
    server,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env()))
        .init();

    match &CLI.command {
        None | Some(Command::Serve) => server::run().await?,
        Some(Command::AddUser { name, email, role }) => {
            let db = server::open_database().await?;
            let user = db
                .create_user(name, email, *role)
                .await
                .with_context(|| format!("Failed to add user {email}"))?;
            info!(id = user.id, email = %user.email, role = ?user.role, "User added");
        }
    }

    Ok(())
}
