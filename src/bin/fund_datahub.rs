use fund_datahub::config::Config;
use fund_datahub::scrapers::base::FundScraper;
use fund_datahub::scrapers::eastmoney::EastmoneyScraper;
use fund_datahub::services::export;
use fund_datahub::services::pipeline::FundPipeline;
use fund_datahub::services::scheduler::Scheduler;
use fund_datahub::store::FundStore;
use fund_datahub::util;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use log::info;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = Command::new("FundDataHub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fund net value history fetcher")
        .arg(
            Arg::new("store")
                .long("store")
                .value_name("PATH")
                .help("SQLite store path (overrides FUNDHUB_STORE_PATH)")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Fetch, clean and store history for one fund")
                .arg(Arg::new("fund_id").value_name("FUND_ID").required(true))
                .arg(
                    Arg::new("start")
                        .long("start")
                        .value_name("DATE")
                        .help("Start date (YYYY-MM-DD); defaults to the latest stored date")
                        .takes_value(true),
                )
                .arg(
                    Arg::new("end")
                        .long("end")
                        .value_name("DATE")
                        .help("End date (YYYY-MM-DD); defaults to today")
                        .takes_value(true),
                )
                .arg(
                    Arg::new("full")
                        .long("full")
                        .help("Ignore stored data and fetch the whole default window")
                        .takes_value(false),
                ),
        )
        .subcommand(
            Command::new("run-batch")
                .about("Run the pipeline for a comma separated list of funds")
                .arg(Arg::new("fund_ids").value_name("FUND_ID,...").required(true)),
        )
        .subcommand(
            Command::new("monitor")
                .about("Re-run the pipeline on a fixed interval")
                .arg(Arg::new("fund_ids").value_name("FUND_ID,...").required(true))
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECS")
                        .help("Seconds between runs (overrides FUNDHUB_INTERVAL_SECS)")
                        .takes_value(true),
                )
                .arg(
                    Arg::new("ticks")
                        .long("ticks")
                        .value_name("N")
                        .help("Stop after N runs")
                        .takes_value(true),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export stored history for one fund as CSV")
                .arg(Arg::new("fund_id").value_name("FUND_ID").required(true))
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("PATH")
                        .help("Output file; defaults to <FUND_ID>_data.csv")
                        .takes_value(true),
                ),
        )
        .subcommand(
            Command::new("quote")
                .about("Show the intraday estimate for one fund")
                .arg(Arg::new("fund_id").value_name("FUND_ID").required(true)),
        )
        .subcommand(
            Command::new("show")
                .about("Show stored history for one fund")
                .arg(Arg::new("fund_id").value_name("FUND_ID").required(true))
                .arg(
                    Arg::new("limit")
                        .short('l')
                        .long("limit")
                        .value_name("LIMIT")
                        .help("Number of rows to display")
                        .takes_value(true)
                        .default_value("10"),
                ),
        );

    let matches = app.get_matches();

    let mut config = Config::from_env().context("failed to load configuration")?;
    // --store 为全局参数，值会下传到子命令
    let store_override = matches
        .subcommand()
        .and_then(|(_, sub)| sub.value_of("store"))
        .or_else(|| matches.value_of("store"));
    if let Some(path) = store_override {
        config = config.with_store_path(path);
    }

    let code = match matches.subcommand() {
        Some(("run", sub)) => run_single(config, sub).await?,
        Some(("run-batch", sub)) => run_batch(config, sub).await?,
        Some(("monitor", sub)) => monitor(config, sub).await?,
        Some(("export", sub)) => export_csv(config, sub)?,
        Some(("quote", sub)) => quote(config, sub).await?,
        Some(("show", sub)) => show(config, sub)?,
        _ => {
            info!("No command specified. Use --help for usage information.");
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_pipeline(config: &Config) -> anyhow::Result<FundPipeline> {
    let store = FundStore::open(&config.store_path)
        .with_context(|| format!("failed to open store at {}", config.store_path))?;
    let scraper = EastmoneyScraper::new(config)?;
    Ok(FundPipeline::new(config.clone(), Arc::new(scraper), Arc::new(store)))
}

fn parse_date_arg(sub: &ArgMatches, name: &str) -> anyhow::Result<Option<chrono::NaiveDate>> {
    match sub.value_of(name) {
        Some(raw) => Ok(Some(util::parse_date(raw).with_context(|| format!("invalid --{}", name))?)),
        None => Ok(None),
    }
}

async fn run_single(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_id = sub.value_of("fund_id").unwrap_or_default().trim().to_string();
    let start = parse_date_arg(sub, "start")?;
    let end = parse_date_arg(sub, "end")?;
    let full = sub.is_present("full");

    let pipeline = build_pipeline(&config)?;
    let request = pipeline.plan_request(&fund_id, start, end, full)?;
    if let Some(range) = request.date_range {
        info!("Fetching {} from {} to {}", fund_id, range.start, range.end);
    }

    let report = pipeline.process(request).await;
    println!("{}", report);

    Ok(report.exit_code())
}

async fn run_batch(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_ids = util::parse_fund_ids(sub.value_of("fund_ids").unwrap_or_default())?;

    let pipeline = build_pipeline(&config)?;
    let batch = pipeline.process_batch(&fund_ids).await;

    for report in &batch.reports {
        println!("{}", report);
    }
    println!(
        "{} of {} funds succeeded ({:.1}s)",
        batch.succeeded(),
        batch.reports.len(),
        batch.elapsed.as_secs_f64()
    );
    batch.log_summary("批量抓取");

    Ok(batch.exit_code())
}

async fn monitor(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_ids = util::parse_fund_ids(sub.value_of("fund_ids").unwrap_or_default())?;
    let interval = match sub.value_of("interval") {
        Some(raw) => {
            let secs: u64 = raw.parse().context("invalid --interval")?;
            anyhow::ensure!(secs > 0, "--interval must be positive");
            Duration::from_secs(secs)
        }
        None => config.interval,
    };
    let max_ticks = match sub.value_of("ticks") {
        Some(raw) => {
            let ticks = raw.parse::<u64>().context("invalid --ticks")?;
            anyhow::ensure!(ticks > 0, "--ticks must be positive");
            Some(ticks)
        }
        None => None,
    };

    let concurrency = config.max_concurrency;
    let pipeline = Arc::new(build_pipeline(&config)?);
    let scheduler = Scheduler::new(pipeline, fund_ids, interval, concurrency);
    scheduler.run(max_ticks).await;

    Ok(0)
}

fn export_csv(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_id = sub.value_of("fund_id").unwrap_or_default().trim().to_string();
    let path = sub
        .value_of("out")
        .map(str::to_string)
        .unwrap_or_else(|| export::default_export_path(&fund_id));

    let store = FundStore::open(&config.store_path)?;
    let written = export::export_fund(&store, &fund_id, &path)
        .with_context(|| format!("failed to export {} to {}", fund_id, path))?;

    if written == 0 {
        println!("No stored data for fund {}", fund_id);
        return Ok(1);
    }
    println!("Exported {} records for {} to {}", written, fund_id, path);
    Ok(0)
}

async fn quote(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_id = sub.value_of("fund_id").unwrap_or_default().trim().to_string();
    anyhow::ensure!(util::is_valid_fund_id(&fund_id), "invalid fund id: {}", fund_id);

    let scraper = EastmoneyScraper::new(&config)?;
    let quote = scraper.fetch_quote(&fund_id).await?;

    let fmt_decimal = |v: Option<rust_decimal::Decimal>| v.map_or_else(|| "-".to_string(), |d| d.to_string());
    println!("基金代码: {}", quote.fund_id);
    println!("基金名称: {}", quote.name);
    println!(
        "最新净值: {} ({})",
        fmt_decimal(quote.net_value),
        quote.net_value_date.map_or_else(|| "-".to_string(), |d| d.to_string())
    );
    println!("估算净值: {}", fmt_decimal(quote.estimate_value));
    println!("估算涨跌幅: {}%", fmt_decimal(quote.estimate_growth_pct));
    println!("更新时间: {}", quote.estimate_time.as_deref().unwrap_or("-"));

    Ok(0)
}

fn show(config: Config, sub: &ArgMatches) -> anyhow::Result<i32> {
    let fund_id = sub.value_of("fund_id").unwrap_or_default().trim().to_string();
    let limit = sub
        .value_of("limit")
        .unwrap_or("10")
        .parse::<usize>()
        .context("invalid --limit")?;

    let store = FundStore::open(&config.store_path)?;
    let total = store.count(&fund_id)?;
    let records = store.records(&fund_id, limit)?;

    if records.is_empty() {
        println!("No stored data for fund {}", fund_id);
        return Ok(1);
    }

    println!("{:<12} {:>10} {:>10} {:>10}", "Date", "NAV", "Cum NAV", "Growth%");
    println!("{:-<46}", "");
    for record in &records {
        let opt = |v: Option<rust_decimal::Decimal>| v.map_or_else(|| "-".to_string(), |d| d.normalize().to_string());
        println!(
            "{:<12} {:>10} {:>10} {:>10}",
            record.date().to_string(),
            record.net_value().normalize().to_string(),
            opt(record.cumulative_value()),
            opt(record.daily_growth_pct())
        );
    }
    if total > records.len() {
        println!("... and {} more records", total - records.len());
    }

    Ok(0)
}
