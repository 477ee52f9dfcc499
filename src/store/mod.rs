use crate::errors::{FundHubError, Result};
use crate::models::fund::FundRecord;
use chrono::NaiveDate;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fund_history (
    fund_id TEXT NOT NULL,
    date DATE NOT NULL,
    net_value REAL NOT NULL,
    cumulative_value REAL NULL,
    daily_growth_pct REAL NULL,
    PRIMARY KEY (fund_id, date)
);
";

const UPSERT: &str = "
INSERT INTO fund_history (fund_id, date, net_value, cumulative_value, daily_growth_pct)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (fund_id, date) DO UPDATE SET
    net_value = excluded.net_value,
    cumulative_value = excluded.cumulative_value,
    daily_growth_pct = excluded.daily_growth_pct
";

/// 一次写入的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: usize,
    pub failed: usize,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// 基金净值存储，单连接 + 全局写锁
pub struct FundStore {
    conn: Mutex<Connection>,
}

impl FundStore {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: &str) -> Result<Self> {
        // 确保目录存在
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL 对 :memory: 无效，失败可忽略
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch(SCHEMA)?;

        info!("Opened fund store at {}", path);
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// 内存数据库，用于测试
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FundHubError::StoreUnavailable("fund store lock poisoned".to_string()))
    }

    /// 按 (fund_id, date) upsert 记录
    ///
    /// 单条记录失败只计数不中断；事务无法开始或提交时返回 `StorageError`。
    pub fn write(&self, records: &[FundRecord]) -> Result<WriteReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut report = WriteReport::default();

        {
            let mut stmt = tx.prepare_cached(UPSERT)?;
            for record in records {
                match upsert(&mut stmt, record) {
                    Ok(_) => report.written += 1,
                    Err(e) => {
                        error!(
                            "Failed to store {} on {}: {}",
                            record.fund_id(),
                            record.date(),
                            e
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    /// 最近的记录，按日期降序
    pub fn records(&self, fund_id: &str, limit: usize) -> Result<Vec<FundRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT fund_id, date, net_value, cumulative_value, daily_growth_pct
             FROM fund_history WHERE fund_id = ?1 ORDER BY date DESC LIMIT ?2",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![fund_id, limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, NaiveDate>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<f64>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, date, net, cumulative, growth) = row?;
            let net = Decimal::from_f64(net).ok_or_else(|| {
                FundHubError::ValidationError(format!("stored net value {} is not a number", net))
            })?;
            records.push(FundRecord::new(
                &id,
                date,
                net,
                cumulative.and_then(Decimal::from_f64),
                growth.and_then(Decimal::from_f64),
            )?);
        }

        Ok(records)
    }

    /// 全部记录，按日期升序
    pub fn history(&self, fund_id: &str) -> Result<Vec<FundRecord>> {
        let mut records = self.records(fund_id, usize::MAX)?;
        records.reverse();
        Ok(records)
    }

    pub fn latest_date(&self, fund_id: &str) -> Result<Option<NaiveDate>> {
        let conn = self.lock()?;
        let date = conn
            .query_row(
                "SELECT MAX(date) FROM fund_history WHERE fund_id = ?1",
                params![fund_id],
                |row| row.get::<_, Option<NaiveDate>>(0),
            )
            .optional()?
            .flatten();
        Ok(date)
    }

    pub fn count(&self, fund_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fund_history WHERE fund_id = ?1",
            params![fund_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// 库中出现过的所有基金代码
    pub fn fund_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT fund_id FROM fund_history ORDER BY fund_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn upsert(stmt: &mut rusqlite::CachedStatement<'_>, record: &FundRecord) -> Result<usize> {
    let net = record.net_value().to_f64().ok_or_else(|| {
        FundHubError::ValidationError(format!("net value {} out of range", record.net_value()))
    })?;

    Ok(stmt.execute(params![
        record.fund_id(),
        record.date(),
        net,
        record.cumulative_value().and_then(|d| d.to_f64()),
        record.daily_growth_pct().and_then(|d| d.to_f64()),
    ])?)
}
