// dfsc, a command-line client for a remote distributed filesystem authority.
// Copyright (C) 2025 dfs-client contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::Parser;
use futures::{pin_mut, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use dfs_client::authority::rest::RestAuthority;
use dfs_client::{Client, ConnectOptions, FileEntry};

use crate::cli::{Args, Command};

mod cli;

fn setup_tracing(args: &Args) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::builder().parse_lossy(
        std::env::var(tracing_subscriber::EnvFilter::DEFAULT_ENV).unwrap_or("info".to_string()),
    );
    let fmt = tracing_subscriber::fmt::layer()
        .compact()
        .with_span_events(if args.log_span_durations {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_filter(env_filter);
    tracing_subscriber::registry().with(fmt).try_init()?;
    Ok(())
}

fn create_cancellation_token() -> Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let copy = token.clone();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select!(
            _ = sigint.recv() => {
                copy.cancel();
            },
            _ = sigterm.recv() => {
                copy.cancel();
            },
        );
    });
    Ok(token)
}

fn format_entry(entry: &FileEntry) -> String {
    let kind = if entry.is_directory() { 'd' } else { '-' };
    format!(
        "{kind}{} {:>3} {:<10} {:<12} {:>12} {:>15} {}",
        entry.permission_string(),
        entry.replication,
        entry.owner,
        entry.group,
        entry.size_bytes,
        entry.modified_ms,
        entry.path,
    )
}

async fn execute(client: &Client<RestAuthority>, command: Command) -> Result<()> {
    match command {
        Command::Mkdir { path } => client.mkdir(&path).await?,
        Command::Put {
            local,
            remote_dir,
            overwrite,
        } => {
            let dest = client.upload(&local, &remote_dir, overwrite).await?;
            println!("{dest}");
        }
        Command::Get {
            remote,
            local,
            no_verify,
        } => {
            let copy = client.download(&remote, &local, !no_verify).await?;
            println!("{copy}");
        }
        Command::Rm { path, recursive } => client.delete(&path, recursive).await?,
        Command::Mv { source, dest } => client.rename(&source, &dest).await?,
        Command::Ls { path } => {
            let entries = client.list_status(&path);
            pin_mut!(entries);
            while let Some(entry) = entries.try_next().await? {
                println!("{}", format_entry(&entry));
            }
        }
        Command::Find { path } => {
            let entries = client.list_files(&path);
            pin_mut!(entries);
            while let Some(entry) = entries.try_next().await? {
                println!("{}", format_entry(&entry));
                for location in entry.block_locations.as_deref().unwrap_or_default() {
                    println!(
                        "  block {:>12}+{:<10} {}",
                        location.offset,
                        location.length,
                        location.hosts.join(", "),
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    setup_tracing(&args)?;

    let authority = RestAuthority::new(&args.authority, &args.identity)?;
    let client = Client::connect(
        authority,
        ConnectOptions {
            identity: args.identity.clone(),
            replication: args.replication,
            block_size: args.block_size,
            timeout: args.timeout,
        },
    )
    .await?;

    let cancellation_token = create_cancellation_token()?;
    tokio::select! {
        result = execute(&client, args.command) => result?,
        _ = cancellation_token.cancelled() => {
            tracing::warn!("interrupted; any partial transfer must be retried with --overwrite or cleaned up with rm");
        }
    }
    client.close();
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}
