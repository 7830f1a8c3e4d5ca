// crates/aq_engine/src/forecast.rs

//! 并行概率预报
//!
//! 把同化后的集合在 `[t_fc, t_end]` 窗口上扇出：
//!
//! - 粒子进入共享队列，`C` 个工作线程反复出队并调用
//!   [`ForecastRunner`]，把逐时输出按粒子权重投入对应的
//!   (变量, 时间戳) 核密度桶
//! - 桶由独立互斥锁保护；`add_sample` 可交换，桶间无顺序约束
//! - 主线程通过完成通道计数，对照墙钟预算等待；预算用尽即清空
//!   队列并以当时的桶内容报告部分结果，在途的运行自行收尾退出
//!
//! 失败的粒子不贡献任何样本；前缀成功的运行只贡献完成的时段。

use crate::error::EngineResult;
use aq_filter::{ForecastRunner, Particle};
use aq_prob::{KernelDensity, WeightedSample};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 预报产物
///
/// 每个 (变量, 时间戳) 一个已计算带宽的核密度；空桶的统计量
/// 为 NaN。`end_states` 收集成功运行的窗口末状态，供后续
/// 前瞻期链式使用。
#[derive(Debug)]
pub struct ForecastResult {
    /// 流量分布
    pub streamflow: BTreeMap<NaiveDateTime, KernelDensity>,
    /// 蒸散发分布
    pub evaporation: BTreeMap<NaiveDateTime, KernelDensity>,
    /// 三层土壤含水量分布
    pub soil_moisture: [BTreeMap<NaiveDateTime, KernelDensity>; 3],
    /// 成功粒子的 (权重, 末状态)
    pub end_states: Vec<WeightedSample>,
    /// 完成（含失败）的粒子数
    pub completed: usize,
    /// 是否因墙钟预算耗尽而提前返回
    pub timed_out: bool,
}

impl ForecastResult {
    /// 末状态重建为粒子集合（标识 `"Particle i"`）
    pub fn end_particles(&self) -> Vec<Particle> {
        self.end_states
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                Particle::new(
                    format!("Particle {}", i + 1),
                    sample.values.clone(),
                    sample.weight,
                )
            })
            .collect()
    }
}

/// 逐时刻的核密度桶集合，预报期间被工作线程共享
struct Buckets {
    streamflow: BTreeMap<NaiveDateTime, Mutex<KernelDensity>>,
    evaporation: BTreeMap<NaiveDateTime, Mutex<KernelDensity>>,
    soil_moisture: [BTreeMap<NaiveDateTime, Mutex<KernelDensity>>; 3],
}

impl Buckets {
    fn for_timestamps(times: &[NaiveDateTime]) -> Self {
        fn empty_map(
            times: &[NaiveDateTime],
        ) -> BTreeMap<NaiveDateTime, Mutex<KernelDensity>> {
            times
                .iter()
                .map(|t| (*t, Mutex::new(KernelDensity::new())))
                .collect()
        }
        Self {
            streamflow: empty_map(times),
            evaporation: empty_map(times),
            soil_moisture: [empty_map(times), empty_map(times), empty_map(times)],
        }
    }

    /// 克隆桶内容并统一计算带宽
    fn close(&self) -> ForecastResult {
        let close_map = |source: &BTreeMap<NaiveDateTime, Mutex<KernelDensity>>| {
            source
                .iter()
                .map(|(t, bucket)| {
                    let mut kde = bucket.lock().clone();
                    kde.compute_gaussian_bandwidth();
                    (*t, kde)
                })
                .collect::<BTreeMap<_, _>>()
        };
        ForecastResult {
            streamflow: close_map(&self.streamflow),
            evaporation: close_map(&self.evaporation),
            soil_moisture: [
                close_map(&self.soil_moisture[0]),
                close_map(&self.soil_moisture[1]),
                close_map(&self.soil_moisture[2]),
            ],
            end_states: Vec::new(),
            completed: 0,
            timed_out: false,
        }
    }
}

/// 预报引擎
///
/// 线程数按 CPU/磁盘容量配置，与集合大小无关；每个工作线程
/// 大部分时间阻塞在外部进程上。
pub struct ForecastEngine<M: ForecastRunner + 'static> {
    model: Arc<M>,
    thread_count: usize,
    budget: Duration,
}

impl<M: ForecastRunner + 'static> ForecastEngine<M> {
    /// 创建引擎
    pub fn new(model: Arc<M>, thread_count: usize, budget_ms: u64) -> Self {
        Self {
            model,
            thread_count: thread_count.max(1),
            budget: Duration::from_millis(budget_ms),
        }
    }

    /// 对集合执行一次预报扇出
    ///
    /// 目标时间戳为 `{start+Δ, start+2Δ, …, end}`。返回时所有桶的
    /// 带宽已计算完毕。
    pub fn run(
        &self,
        ensemble: &[Particle],
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: ChronoDuration,
    ) -> EngineResult<ForecastResult> {
        let mut times = Vec::new();
        let mut t = start + step;
        while t <= end {
            times.push(t);
            t += step;
        }

        let buckets = Arc::new(Buckets::for_timestamps(&times));
        let end_states = Arc::new(Mutex::new(Vec::new()));
        let queue: Arc<Mutex<VecDeque<Particle>>> =
            Arc::new(Mutex::new(ensemble.iter().cloned().collect()));
        let times = Arc::new(times);
        let total = ensemble.len();

        info!(
            "starting forecast: {} particle(s), {} timestamp(s), {} worker(s)",
            total,
            times.len(),
            self.thread_count
        );

        let (done_tx, done_rx) = mpsc::channel::<()>();
        for _ in 0..self.thread_count.min(total.max(1)) {
            let model = Arc::clone(&self.model);
            let queue = Arc::clone(&queue);
            let buckets = Arc::clone(&buckets);
            let end_states = Arc::clone(&end_states);
            let times = Arc::clone(&times);
            let done_tx = done_tx.clone();
            std::thread::spawn(move || {
                forecast_worker(&*model, &queue, &buckets, &end_states, &times, start, end, &done_tx);
            });
        }
        drop(done_tx);

        // 等待全部完成或预算用尽
        let deadline = Instant::now() + self.budget;
        let mut completed = 0usize;
        let mut timed_out = false;
        while completed < total {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            match done_rx.recv_timeout(remaining) {
                Ok(()) => completed += 1,
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        if timed_out {
            info!("forecast budget exhausted, dropping queued particles");
            queue.lock().clear();
        }

        let mut result = buckets.close();
        result.end_states = end_states.lock().clone();
        result.completed = completed;
        result.timed_out = timed_out;
        debug!(
            "forecast finished: {}/{} particle(s), timed_out = {}",
            completed, total, timed_out
        );
        Ok(result)
    }
}

/// 工作线程主体：出队、运行、按权重写桶、报告完成
#[allow(clippy::too_many_arguments)]
fn forecast_worker<M: ForecastRunner + ?Sized>(
    model: &M,
    queue: &Mutex<VecDeque<Particle>>,
    buckets: &Buckets,
    end_states: &Mutex<Vec<WeightedSample>>,
    times: &[NaiveDateTime],
    start: NaiveDateTime,
    end: NaiveDateTime,
    done_tx: &mpsc::Sender<()>,
) {
    loop {
        let Some(particle) = queue.lock().pop_front() else {
            return;
        };
        match model.run_forecast(&particle.id, &particle.state, start, end) {
            Ok(series) => {
                let weight = particle.weight;
                for t in times {
                    if let Some(&q) = series.streamflow.get(t) {
                        buckets.streamflow[t].lock().add_sample(q, weight);
                    }
                    if let Some(&ev) = series.evaporation.get(t) {
                        buckets.evaporation[t].lock().add_sample(ev, weight);
                    }
                    if let Some(&sm) = series.soil_moisture.get(t) {
                        for (layer, bucket_map) in buckets.soil_moisture.iter().enumerate()
                        {
                            bucket_map[t].lock().add_sample(sm[layer], weight);
                        }
                    }
                }
                if let Some(state) = series.end_state {
                    end_states.lock().push(WeightedSample::new(weight, state));
                }
                debug!("completed forecast for {}", particle.id);
            }
            Err(err) => {
                warn!("forecast for {} failed: {err}", particle.id);
            }
        }
        // 接收端在预算耗尽后关闭，发送失败无需处理
        let _ = done_tx.send(());
    }
}
