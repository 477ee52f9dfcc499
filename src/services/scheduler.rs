//! 监控模式：按固定间隔重复执行流水线，同一基金同一时刻只允许一个运行中的任务。

use crate::services::pipeline::{BatchReport, FundPipeline, FundReport};
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// 正在运行的基金代码集合
#[derive(Debug, Default)]
pub struct InFlight {
    active: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 占用基金代码；已被占用时返回 None
    pub fn try_acquire(self: &Arc<Self>, fund_id: &str) -> Option<FlightGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(fund_id.to_string()) {
            return None;
        }
        Some(FlightGuard {
            registry: Arc::clone(self),
            fund_id: fund_id.to_string(),
        })
    }

    pub fn is_active(&self, fund_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(fund_id)
    }
}

/// 释放时归还占用
#[derive(Debug)]
pub struct FlightGuard {
    registry: Arc<InFlight>,
    fund_id: String,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.fund_id);
    }
}

pub struct Scheduler {
    pipeline: Arc<FundPipeline>,
    fund_ids: Vec<String>,
    interval: Duration,
    concurrency: usize,
    in_flight: Arc<InFlight>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<FundPipeline>, fund_ids: Vec<String>, interval: Duration, concurrency: usize) -> Self {
        Self {
            pipeline,
            fund_ids,
            interval,
            concurrency: concurrency.max(1),
            in_flight: InFlight::new(),
        }
    }

    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// 执行一轮；仍在上一轮中运行的基金被跳过
    pub async fn run_round(&self) -> BatchReport {
        run_round(
            Arc::clone(&self.pipeline),
            self.fund_ids.clone(),
            Arc::clone(&self.in_flight),
            self.concurrency,
        )
        .await
    }

    /// 按间隔循环执行，直到收到 Ctrl-C 或达到 `max_ticks`；返回触发的轮数
    pub async fn run(&self, max_ticks: Option<u64>) -> u64 {
        info!(
            "=== 监控模式启动: {} 只基金, 间隔 {:?} ===",
            self.fund_ids.len(),
            self.interval
        );

        if max_ticks == Some(0) {
            info!("=== 监控结束, 共 0 轮 ===");
            return 0;
        }

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut rounds: JoinSet<BatchReport> = JoinSet::new();
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("收到终止信号, 停止监控");
                    break;
                }
                _ = interval.tick() => {
                    ticks += 1;
                    info!("=== 第 {} 轮开始 ===", ticks);
                    rounds.spawn(run_round(
                        Arc::clone(&self.pipeline),
                        self.fund_ids.clone(),
                        Arc::clone(&self.in_flight),
                        self.concurrency,
                    ));

                    if max_ticks.map_or(false, |max| ticks >= max) {
                        break;
                    }
                }
                Some(finished) = rounds.join_next(), if !rounds.is_empty() => {
                    log_round(finished);
                }
            }
        }

        // 等待已启动的轮次结束，不中途取消写入
        while let Some(finished) = rounds.join_next().await {
            log_round(finished);
        }

        info!("=== 监控结束, 共 {} 轮 ===", ticks);
        ticks
    }
}

async fn run_round(
    pipeline: Arc<FundPipeline>,
    fund_ids: Vec<String>,
    in_flight: Arc<InFlight>,
    concurrency: usize,
) -> BatchReport {
    let started = Instant::now();

    let reports: Vec<FundReport> = stream::iter(fund_ids)
        .map(|fund_id| {
            let pipeline = Arc::clone(&pipeline);
            let in_flight = Arc::clone(&in_flight);
            async move {
                let Some(_guard) = in_flight.try_acquire(&fund_id) else {
                    warn!("基金 {} 上一轮仍在运行, 本轮跳过", fund_id);
                    return FundReport::skipped(&fund_id);
                };
                pipeline.run_fund(&fund_id).await
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    BatchReport {
        reports,
        elapsed: started.elapsed(),
    }
}

fn log_round(finished: Result<BatchReport, tokio::task::JoinError>) {
    match finished {
        Ok(report) => {
            for fund in &report.reports {
                info!("{}", fund);
            }
            report.log_summary("监控轮次");
        }
        Err(e) => error!("监控轮次异常退出: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_exclusive_per_fund() {
        let in_flight = InFlight::new();

        let first = in_flight.try_acquire("000001");
        assert!(first.is_some());
        assert!(in_flight.try_acquire("000001").is_none());
        assert!(in_flight.try_acquire("110022").is_some());
        assert!(in_flight.is_active("000001"));

        drop(first);
        assert!(!in_flight.is_active("000001"));
        assert!(in_flight.try_acquire("000001").is_some());
    }
}
