use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::render::Renderer;
use crate::resync::Resync;
use crate::session::{Notice, Session};
use crate::store::TaskStore;
use crate::task::{Address, TaskId};
use crate::view::parse_sort_spec;

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "done", "delete", "clear", "list", "watch", "version", "help",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, identity, inv))]
pub async fn dispatch(
    store: Arc<dyn TaskStore>,
    cfg: &Config,
    renderer: &mut Renderer,
    identity: Option<Address>,
    inv: Invocation,
) -> anyhow::Result<()> {
    let page_size = cfg.get_usize("page.size")?.unwrap_or(8);
    let max_tasks = cfg.get_usize("task.max")?.unwrap_or(8);
    let mut session = Session::new(page_size, max_tasks);

    if let Some(filter_cfg) = cfg.get("default.filter") {
        session.set_filter(filter_cfg.parse()?);
    }

    if let Some(identity) = identity {
        session.connect(store.clone(), identity);
        session
            .refresh(false)
            .await
            .map_err(|err| anyhow!("failed to fetch tasks: {err}"))?;
    }

    debug!(
        command = %inv.command,
        args = ?inv.command_args,
        "dispatching command"
    );

    match inv.command.as_str() {
        "add" => cmd_add(&mut session, renderer, &inv.command_args).await,
        "done" => cmd_done(&mut session, renderer, &inv.command_args).await,
        "delete" => cmd_delete(&mut session, renderer, &inv.command_args).await,
        "clear" => cmd_clear(&mut session, renderer).await,
        "list" => cmd_list(&mut session, renderer, &inv.command_args),
        "watch" => cmd_watch(store, &mut session, renderer, &inv.command_args).await,
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" => cmd_help(),
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Applies taskwarrior-flavored view tokens to the session:
/// `filter:<kind>`, `sort:<key[:dir]>`, `page:<n>`; bare tokens
/// accumulate into the fuzzy search string.
fn apply_view_args(session: &mut Session, args: &[String]) -> anyhow::Result<()> {
    let mut search_terms: Vec<&str> = Vec::new();
    let mut page = None;

    for arg in args {
        if let Some(value) = arg.strip_prefix("filter:") {
            session.set_filter(value.parse()?);
        } else if let Some(value) = arg.strip_prefix("sort:") {
            let (key, dir) = parse_sort_spec(value)?;
            session.set_sort(key, dir);
        } else if let Some(value) = arg.strip_prefix("page:") {
            let parsed: usize = value
                .parse()
                .map_err(|_| anyhow!("invalid page number: {value}"))?;
            page = Some(parsed);
        } else {
            search_terms.push(arg);
        }
    }

    if !search_terms.is_empty() {
        session.set_search(search_terms.join(" "));
    }

    // Applied last: the view setters above reset to page 1.
    if let Some(page) = page {
        session.set_page(page);
    }

    Ok(())
}

fn render_page(session: &Session, renderer: &mut Renderer) -> anyhow::Result<()> {
    renderer.print_task_page(
        &session.page_items(),
        session.identity(),
        session.view().page,
        session.total_pages(),
    )
}

#[instrument(skip(session, renderer, args))]
async fn cmd_add(
    session: &mut Session,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command add");

    let mut private = false;
    let content_terms: Vec<&str> = args
        .iter()
        .filter(|arg| {
            if arg.as_str() == "+private" {
                private = true;
                false
            } else {
                true
            }
        })
        .map(String::as_str)
        .collect();
    let content = content_terms.join(" ");

    match session.add(&content, private).await {
        Ok(()) => {
            println!("Created task.");
            render_page(session, renderer)
        }
        Err(notice) => renderer.print_notice(&notice),
    }
}

/// Resolves a cached task by unique id prefix, falling back to the
/// literal token so the session's own existence check gets to answer
/// for unknown identifiers.
fn resolve_arg_id(session: &Session, args: &[String]) -> anyhow::Result<TaskId> {
    let prefix = args
        .first()
        .ok_or_else(|| anyhow!("expected a task id"))?;
    Ok(session
        .resolve_id(prefix)
        .unwrap_or_else(|| TaskId::new(prefix.clone())))
}

#[instrument(skip(session, renderer, args))]
async fn cmd_done(
    session: &mut Session,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command done");

    let id = resolve_arg_id(session, args)?;
    match session.toggle_completed(&id).await {
        Ok(()) => render_page(session, renderer),
        Err(notice) => renderer.print_notice(&notice),
    }
}

#[instrument(skip(session, renderer, args))]
async fn cmd_delete(
    session: &mut Session,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete");

    let id = resolve_arg_id(session, args)?;
    match session.delete(&id).await {
        Ok(()) => render_page(session, renderer),
        Err(notice) => renderer.print_notice(&notice),
    }
}

#[instrument(skip(session, renderer))]
async fn cmd_clear(session: &mut Session, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command clear");

    match session.clear_completed().await {
        Ok(()) => {
            println!("Cleared completed tasks.");
            render_page(session, renderer)
        }
        Err(notice) => renderer.print_notice(&notice),
    }
}

#[instrument(skip(session, renderer, args))]
fn cmd_list(
    session: &mut Session,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command list");

    apply_view_args(session, args)?;
    render_page(session, renderer)
}

#[instrument(skip(store, session, renderer, args))]
async fn cmd_watch(
    store: Arc<dyn TaskStore>,
    session: &mut Session,
    renderer: &mut Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command watch");

    apply_view_args(session, args)?;
    render_page(session, renderer)?;

    let mut resync = Resync::new();
    resync.bind(store.as_ref());

    while let Some(event) = resync.next_event().await {
        debug!(kind = ?event.kind, "store notification; re-syncing");
        resync_and_render(session, renderer).await?;
    }

    Ok(())
}

/// One watch iteration: re-fetch with filter and page preserved, then
/// re-render. A failed fetch surfaces a notice and keeps the previous
/// view on screen; the watch loop stays alive.
async fn resync_and_render(
    session: &mut Session,
    renderer: &mut Renderer,
) -> anyhow::Result<()> {
    if let Err(err) = session.refresh(true).await {
        warn!(%err, "re-sync failed; keeping previous view");
        return renderer.print_notice(&Notice::Failure(format!("Task refresh failed: {err}")));
    }
    render_page(session, renderer)
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: strand [--identity ADDR] [--data DIR] [rc.key=value] <command>");
    println!();
    println!("commands:");
    println!("  add [+private] <content>   create a task");
    println!("  done <id>                  toggle a task's completion");
    println!("  delete <id>                soft-delete a task");
    println!("  clear                      clear your completed tasks");
    println!("  list [filter:KIND] [sort:KEY[:DIR]] [page:N] [search terms]");
    println!("  watch [view args]          follow store events and re-render");
    println!("  version                    print the version");
    Ok(())
}
