use fund_datahub::config::Config;
use fund_datahub::store::FundStore;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let path = std::env::args().nth(1).unwrap_or(config.store_path);

    // 检查数据文件是否存在
    if !Path::new(&path).exists() {
        anyhow::bail!("数据文件 {} 不存在，请先运行 'cargo run -- run <FUND_ID>'", path);
    }

    let store = FundStore::open(&path)?;
    let fund_ids = store.fund_ids()?;

    if fund_ids.is_empty() {
        println!("未找到任何基金数据");
        return Ok(());
    }

    let mut latest_overall = None;
    for fund_id in &fund_ids {
        let latest = store.latest_date(fund_id)?;
        let count = store.count(fund_id)?;
        match latest {
            Some(date) => println!("{:<8} {} ({} 条)", fund_id, date, count),
            None => println!("{:<8} -", fund_id),
        }
        latest_overall = latest_overall.max(latest);
    }

    if let Some(date) = latest_overall {
        println!("最新净值日期: {}", date);
    }

    Ok(())
}
