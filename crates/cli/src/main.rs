//! `nmck`: command-line front end for the pricing service.
//!
//! Results are printed as pretty JSON on stdout; logs go to stderr and are
//! filtered with `RUST_LOG` (default `info`).

use std::{env, path::PathBuf, process, str::FromStr};

use anyhow::{bail, Context, Result};
use nmck_core::{Config, PriceId, RequestDraft, RequestId, RequestStatus, SourceId};
use nmck_engine::{MockMatcher, NmckService};
use nmck_store::{SourceRepository, SqliteStore};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: nmck [--db PATH] [--config PATH] <command> [args]

commands:
  init                          register the default price sources
  sources                       list active sources
  add-source <name> <kind>      register or re-activate a source
  disable-source <id>           stop collecting from a source
  draft <draft.json> [id]       save a draft (overwrite draft <id> if given)
  create <draft.json> [id]      create a request (or reuse draft <id>) and price it
  recalc <id>                   recalculate a request
  status <id> <status>          set status: draft | calculated | approved
  approve <id>                  approve a calculated request
  unapprove <id>                return an approved request to calculated
  exclude <price-id>            exclude a price from aggregation
  include <price-id>            re-admit an excluded price
  show <id>                     request with analogs, result and advisories
  list [status]                 list requests, optionally by status
  delete <id>                   delete a request and everything it owns";

const DEFAULT_SOURCES: [(&str, &str); 4] = [
    ("Wildberries", "marketplace"),
    ("Ozon", "marketplace"),
    ("Procurement history", "internal"),
    ("Industry price list", "catalog"),
];

type Service = NmckService<SqliteStore, MockMatcher>;

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("nmck failed: {err:#}");
        process::exit(1);
    }
}

struct Args {
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    command: Vec<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        db: None,
        config: None,
        command: Vec::new(),
    };
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--db" => args.db = Some(iter.next().context("--db needs a path")?.into()),
            "--config" => args.config = Some(iter.next().context("--config needs a path")?.into()),
            "-h" | "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            _ => {
                args.command.push(arg);
                args.command.extend(iter.by_ref());
            }
        }
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if args.db.is_some() {
        config.store.path = args.db.clone();
    }
    Ok(config)
}

fn run() -> Result<()> {
    let args = parse_args()?;
    let Some((command, rest)) = args.command.split_first() else {
        bail!("{USAGE}");
    };
    let config = load_config(&args)?;
    if config.store.path.is_none() {
        info!("no --db given; using a throwaway in-memory database");
    }

    let store = SqliteStore::open(&config.store)?;
    let service = Service::new(store, MockMatcher::new(config.matcher.clone()), config);

    match (command.as_str(), rest) {
        ("init", []) => {
            let sources = DEFAULT_SOURCES
                .iter()
                .map(|(name, kind)| service.store().upsert_source(name, kind, true))
                .collect::<nmck_core::Result<Vec<_>>>()?;
            print_json(&sources)
        }
        ("sources", []) => print_json(&service.store().active_sources()?),
        ("add-source", [name, kind]) => print_json(&service.store().upsert_source(name, kind, true)?),
        ("disable-source", [id]) => {
            service.store().set_source_active(SourceId(parse_id(id)?), false)?;
            print_json(&service.store().active_sources()?)
        }
        ("draft", [path, existing @ ..]) => {
            let draft = read_draft(path)?;
            print_json(&service.save_draft(&draft, optional_id(existing)?)?)
        }
        ("create", [path, existing @ ..]) => {
            let draft = read_draft(path)?;
            print_json(&service.create_and_aggregate(&draft, optional_id(existing)?)?)
        }
        ("recalc", [id]) => print_json(&service.recalculate(request_id(id)?)?),
        ("status", [id, status]) => {
            let target = RequestStatus::from_str(status)?;
            print_json(&service.set_status(request_id(id)?, target)?)
        }
        ("approve", [id]) => print_json(&service.approve(request_id(id)?)?),
        ("unapprove", [id]) => print_json(&service.unapprove(request_id(id)?)?),
        ("exclude", [id]) => set_excluded(&service, id, true),
        ("include", [id]) => set_excluded(&service, id, false),
        ("show", [id]) => print_json(&service.request_detail(request_id(id)?)?),
        ("list", []) => print_json(&service.list_requests(None)?),
        ("list", [status]) => print_json(&service.list_requests(Some(RequestStatus::from_str(status)?))?),
        ("delete", [id]) => {
            service.delete_request(request_id(id)?)?;
            Ok(())
        }
        _ => bail!("unrecognized command line\n\n{USAGE}"),
    }
}

fn set_excluded(service: &Service, id: &str, excluded: bool) -> Result<()> {
    service.set_price_excluded(PriceId(parse_id(id)?), excluded)?;
    info!(price_id = id, excluded, "price flag updated; run `recalc` to apply");
    Ok(())
}

fn read_draft(path: &str) -> Result<RequestDraft> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing draft {path}"))
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse().with_context(|| format!("'{raw}' is not a valid id"))
}

fn request_id(raw: &str) -> Result<RequestId> {
    parse_id(raw).map(RequestId)
}

fn optional_id(rest: &[String]) -> Result<Option<RequestId>> {
    match rest {
        [] => Ok(None),
        [id] => request_id(id).map(Some),
        _ => bail!("too many arguments\n\n{USAGE}"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
