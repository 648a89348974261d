pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod render;
pub mod resync;
pub mod session;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use crate::task::Address;

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting strand CLI"
    );
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.strandrc.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let max_content = cfg.get_usize("content.max")?.unwrap_or(100);
    let store = Arc::new(
        datastore::LocalStore::open(&data_dir, max_content).with_context(|| {
            format!("failed to open task store at {}", data_dir.display())
        })?,
    );

    let mut renderer = render::Renderer::new(&cfg)?;
    let inv = cli::Invocation::parse(&cfg, cli.rest)?;
    let identity = cli
        .identity
        .or_else(|| cfg.get("identity"))
        .map(Address::new);

    // Single-threaded cooperative execution; store calls suspend the
    // caller without blocking anything else.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(commands::dispatch(
        store,
        &cfg,
        &mut renderer,
        identity,
        inv,
    ))?;

    info!("done");
    Ok(())
}
