use anyhow::{anyhow, bail, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use itertools::Itertools;
use log::*;
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::env;
use std::fs::File;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use square_woo_sync::internal;
use internal::api::SwsApi;
use internal::cache::{open_cache, InventoryCache};
use internal::import::{BatchSize, DataToImport, ImportError, ImportRequest, Importer, RunState};
use internal::card_brand::allowed_brands;
use internal::inventory::{find_by_id, summarize, InventoryItem};
use internal::payment::PaymentConfig;
use internal::settings::{dotdir, Settings};

fn init_logging(settings: &Settings, verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => settings.logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if settings.logging.file {
        let path = dotdir()?.join("sws.log");
        let file = File::options().create(true).append(true).open(path)?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, simplelog::Config::default(), file));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn flag(name: &'static str) -> Arg {
    Arg::new(name).long(name).num_args(0).action(ArgAction::SetTrue)
}

fn batch_size() -> Arg {
    Arg::new("batch-size")
        .long("batch-size")
        .value_parser(clap::value_parser!(usize))
        .value_name("N")
}

fn batch_size_arg(scmd: &ArgMatches, settings: &Settings) -> Result<BatchSize> {
    let size = scmd
        .get_one::<usize>("batch-size")
        .copied()
        .unwrap_or(settings.import.batch_size);
    Ok(BatchSize::new(size)?)
}

fn required<'a>(m: &'a ArgMatches, name: &str) -> Result<&'a String> {
    m.get_one::<String>(name)
        .ok_or_else(|| anyhow!("{} required", name))
}

fn cached_inventory(cache: &InventoryCache) -> Result<Vec<InventoryItem>> {
    if cache.is_empty() {
        bail!("no inventory cached yet, run `sws inventory --refresh` first");
    }
    Ok(cache.items().to_vec())
}

fn print_inventory(items: &[InventoryItem]) {
    for item in items {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{:?}",
            item.id,
            item.sku.as_deref().unwrap_or("-"),
            item.name,
            item.price.as_ref().map(|p| p.to_string()).unwrap_or_default(),
            item.stock.as_ref().map(|s| s.to_string()).unwrap_or_default(),
            item.status
        );
    }
    let s = summarize(items);
    println!(
        "{} items: {} linked, {} partial, {} unlinked",
        s.total, s.linked, s.partial, s.unlinked
    );
}

async fn import(
    api: &SwsApi,
    settings: &Settings,
    cache: &mut InventoryCache,
    scmd: &ArgMatches,
) -> Result<()> {
    let inventory = cached_inventory(cache)?;
    let products: Vec<InventoryItem> = match scmd.get_many::<String>("id") {
        Some(ids) => ids
            .map(|id| match find_by_id(&inventory, id) {
                Some(item) => item.clone(),
                None => InventoryItem { id: id.to_string(), ..Default::default() },
            })
            .collect(),
        None if scmd.get_flag("all") => {
            inventory.iter().filter(|i| !i.is_linked()).cloned().collect()
        }
        None => bail!("pass --all or at least one --id"),
    };
    let data_to_import = match scmd.get_one::<String>("fields") {
        Some(list) => {
            let fields: Vec<&str> = list.split(',').map(str::trim).collect();
            DataToImport::from_fields(&fields)?
        }
        None => DataToImport::from_fields(&settings.import.fields)?,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, aborting import");
            on_signal.cancel();
        }
    });

    let importer = Importer::new(Arc::new(api.clone()));
    let request = ImportRequest {
        products,
        inventory,
        data_to_import,
        batch_size: batch_size_arg(scmd, settings)?,
        cancel,
    };
    let report = importer
        .run(request, |p| {
            info!(
                "batch {}/{}: {} of {} done, {} failed",
                p.batch,
                p.batches,
                p.done(),
                p.total,
                p.failed()
            );
        })
        .await
        .ok_or_else(|| anyhow!("an import is already running"))?;

    let filename = scmd.get_one::<String>("report").map(|s| s.as_str());
    internal::report::save_import_run(cache, &report, filename)?;

    let failures = report.progress.iter().filter(|e| !e.is_success()).collect::<Vec<_>>();
    for entry in &failures {
        println!("{}\t{}", entry.square_id, entry.message.as_deref().unwrap_or("failed"));
    }
    if report.state == RunState::Failed {
        bail!("{} of {} products failed to import", failures.len(), report.progress.len());
    }
    println!("imported {} products", report.progress.len());
    Ok(())
}

async fn run(m: &ArgMatches, api: &SwsApi, settings: &Settings) -> Result<bool> {
    let mut cache = open_cache(&dotdir()?)?;
    match m.subcommand() {
        Some(("settings", scmd)) => match scmd.subcommand() {
            Some(("set", set)) => {
                let key = required(set, "key")?;
                let value = required(set, "value")?;
                let updated = api
                    .update_setting(key, internal::plugin::setting_value(value))
                    .await?;
                println!("{}", serde_json::to_string_pretty(&updated)?);
            }
            _ => println!("{}", serde_json::to_string_pretty(&api.get_settings().await?)?),
        },
        Some(("access-token", scmd)) => {
            let status = match scmd.subcommand() {
                Some(("set", set)) => {
                    let token = required(set, "token")?;
                    api.set_access_token(token).await?
                }
                Some(("delete", _)) => api.delete_access_token().await?,
                _ => api.get_access_token().await?,
            };
            match status.access_token.as_deref() {
                Some(token) if status.is_set() => println!("access token: {}", token),
                _ => println!("no access token set"),
            }
        }
        Some(("locations", _)) => {
            for loc in api.get_locations().await? {
                println!("{}\t{}\t{}", loc.id, loc.name, loc.status.as_deref().unwrap_or(""));
            }
        }
        Some(("export", _)) => {
            println!("{}", serde_json::to_string_pretty(&api.export_to_square().await?)?);
        }
        Some(("inventory", scmd)) => {
            if scmd.get_flag("clear") {
                cache.clear()?;
                println!("inventory cache cleared");
                return Ok(true);
            }
            if scmd.get_flag("refresh") || cache.is_empty() {
                let backoff = internal::refresh::Backoff::from_settings(&settings.refresh);
                let items = internal::refresh::refresh_inventory(api, &backoff).await?;
                cache.replace(items)?;
            }
            print_inventory(cache.items());
        }
        Some(("import", scmd)) => import(api, settings, &mut cache, scmd).await?,
        Some(("match", scmd)) => {
            let inventory = cached_inventory(&cache)?;
            let batch_size = batch_size_arg(scmd, settings)?;
            let (linked, summary) =
                internal::matcher::auto_match(api, &inventory, batch_size).await?;
            cache.replace(linked)?;
            println!(
                "matched {} of {} candidates ({} batches failed)",
                summary.matched, summary.candidates, summary.failed_batches
            );
        }
        Some(("orders", scmd)) => {
            let page = scmd.get_one::<u32>("page").copied().unwrap_or(1);
            let per_page = scmd.get_one::<u32>("per-page").copied().unwrap_or(20);
            let res = api.get_orders(page, per_page).await?;
            for order in res.orders.iter().sorted_by_key(|o| o.id) {
                println!(
                    "{}\t{}\t{} {}\t{}\t{}",
                    order.id,
                    order.status,
                    order.total,
                    order.currency.as_deref().unwrap_or(""),
                    order.customer_name(),
                    match order.square_order_id.as_deref() {
                        Some(id) if order.synced() => id,
                        _ => "not synced",
                    }
                );
            }
            println!("page {} of {} ({} orders)", page, res.total_pages, res.total);
        }
        Some(("create-order", scmd)) => {
            let id = scmd
                .get_one::<u64>("id")
                .copied()
                .ok_or_else(|| anyhow!("order id required"))?;
            let res = api.create_square_order(id).await?;
            if !res.success {
                bail!("{}", res.message.unwrap_or_else(|| "order was not created".to_string()));
            }
            println!("{}", res.message.unwrap_or_else(|| format!("order {} sent to Square", id)));
        }
        Some(("logs", scmd)) => {
            let errors_only = scmd.get_flag("errors");
            for entry in api.get_logs().await? {
                if errors_only && !entry.is_error() {
                    continue;
                }
                let when = entry.timestamp.map(|t| t.to_string()).unwrap_or_default();
                let level = entry.level.map(|l| format!("{:?}", l)).unwrap_or_default();
                if entry.is_error() {
                    eprintln!("{}\t{}\t{}", when, level, entry.log);
                } else {
                    println!("{}\t{}\t{}", when, level, entry.log);
                }
            }
        }
        Some(("ajax-sync", scmd)) => {
            let id = scmd
                .get_one::<u64>("id")
                .copied()
                .ok_or_else(|| anyhow!("product id required"))?;
            println!("{}", api.sync_to_square(id).await?);
        }
        Some(("checkout", scmd)) => match scmd.subcommand() {
            Some(("needs-shipping", _)) => println!("{}", api.get_needs_shipping().await?),
            Some(("config", _)) => {
                let config = PaymentConfig::from_settings(&settings.payments);
                if config.application_id.is_empty() || config.location_id.is_empty() {
                    warn!("payments.application_id and payments.location_id must both be set");
                }
                println!("application id: {}", config.application_id);
                println!("location id: {}", config.location_id);
                let brands = allowed_brands(&config.available_card_types);
                println!("accepted brands: {}", brands.iter().sorted().join(", "));
                println!("wallet verification: {:?}", config.wallet_verification);
            }
            Some(("payment-request", pr)) => {
                let context = pr
                    .get_one::<String>("context")
                    .map(|s| s.as_str())
                    .unwrap_or("checkout");
                let options = api.get_payment_request(context).await?;
                println!("{}", serde_json::to_string_pretty(&options)?);
            }
            _ => return Ok(false),
        },
        _ => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() {
    let mut cmd = Command::new("sws")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Drives the Square for WooCommerce sync plugin from the command line")
        .arg(Arg::new("url").long("url").action(ArgAction::Set).value_name("SITE_URL"))
        .arg(Arg::new("nonce").long("nonce").action(ArgAction::Set).value_name("NONCE"))
        .arg(Arg::new("verbose").long("verbose").short('v').action(ArgAction::Count))
        .subcommand(Command::new("settings")
            .subcommand(Command::new("get"))
            .subcommand(Command::new("set")
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true))))
        .subcommand(Command::new("access-token")
            .subcommand(Command::new("show"))
            .subcommand(Command::new("set").arg(Arg::new("token").required(true)))
            .subcommand(Command::new("delete")))
        .subcommand(Command::new("locations"))
        .subcommand(Command::new("export"))
        .subcommand(Command::new("inventory")
            .arg(flag("refresh"))
            .arg(flag("clear").conflicts_with("refresh")))
        .subcommand(Command::new("import")
            .arg(flag("all").conflicts_with("id"))
            .arg(Arg::new("id").long("id").action(ArgAction::Append).value_name("SQUARE_ID"))
            .arg(batch_size())
            .arg(Arg::new("fields").long("fields").action(ArgAction::Set).value_name("LIST"))
            .arg(Arg::new("report").long("report").short('o').value_name("FILE")))
        .subcommand(Command::new("match").arg(batch_size()))
        .subcommand(Command::new("orders")
            .arg(Arg::new("page").long("page")
                .value_parser(clap::value_parser!(u32))
                .default_value("1"))
            .arg(Arg::new("per-page").long("per-page")
                .value_parser(clap::value_parser!(u32))
                .default_value("20")))
        .subcommand(Command::new("create-order")
            .arg(Arg::new("id").required(true).value_parser(clap::value_parser!(u64))))
        .subcommand(Command::new("logs").arg(flag("errors")))
        .subcommand(Command::new("ajax-sync")
            .arg(Arg::new("id").required(true).value_parser(clap::value_parser!(u64))))
        .subcommand(Command::new("checkout")
            .subcommand(Command::new("payment-request")
                .arg(Arg::new("context").long("context").default_value("checkout")))
            .subcommand(Command::new("needs-shipping"))
            .subcommand(Command::new("config")));
    let help = cmd.render_help();
    let m = cmd.get_matches();

    if let Some(url) = m.get_one::<String>("url") {
        env::set_var("SWS_SITE__URL", url)
    }
    if let Some(nonce) = m.get_one::<String>("nonce") {
        env::set_var("SWS_SITE__NONCE", nonce)
    }

    let settings = match Settings::new() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            process::exit(exitcode::CONFIG);
        }
    };
    if let Err(e) = init_logging(&settings, m.get_count("verbose")) {
        eprintln!("Error setting up logging: {}", e);
        process::exit(exitcode::IOERR);
    }
    if settings.site.nonce.is_empty() {
        warn!("no REST nonce configured; set site.nonce in ~/.sws/config or SWS_SITE__NONCE");
    }

    let api = match internal::api::create_api(&settings.site) {
        Ok(api) => api,
        Err(e) => {
            error!("{}", e);
            process::exit(exitcode::CONFIG);
        }
    };

    match run(&m, &api, &settings).await {
        Ok(true) => process::exit(exitcode::OK),
        Ok(false) => {
            println!("{}", help);
            process::exit(exitcode::USAGE);
        }
        Err(e) => {
            error!("{}", e);
            let code = match e.downcast_ref::<ImportError>() {
                Some(ImportError::BatchSize(_)) | Some(ImportError::UnknownField(_)) => {
                    exitcode::USAGE
                }
                _ => exitcode::SOFTWARE,
            };
            process::exit(code);
        }
    }
}
