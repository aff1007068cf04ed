use std::time::{Duration, Instant};
use tracing::debug;

/// 流水线阶段计时结构。
#[derive(Clone)]
pub struct StageTimer {
    consumed: Duration,
    since: Instant,
}

impl StageTimer {
    /// 初始化计时器。初始化时会视为已经调用一次`self.start()`。
    #[inline]
    pub fn new() -> Self {
        Self {
            consumed: Duration::from_micros(0),
            since: Instant::now(),
        }
    }

    /// 开始计时。可以通过再次调用来重置。
    #[inline]
    pub fn start(&mut self) {
        self.since = Instant::now();
    }

    /// 结束计时，并将这一区间的时间累计起来。上一次调用必须是`self.start()`，否则时间计算值无意义。
    #[inline]
    pub fn elapsed(&mut self) {
        self.consumed += self.since.elapsed();
    }

    /// 结束计时，以`debug`级别记录阶段`stage`本身的用时与至今的累计用时，返回本阶段用时。
    pub fn finish(&mut self, stage: &str) -> Duration {
        let spent = self.since.elapsed();
        self.consumed += spent;
        debug!(
            stage,
            ms = spent.as_millis() as u64,
            total_ms = self.get_total_ms(),
            "阶段完成"
        );
        spent
    }

    /// 获得总共累计下来的时间（以毫秒为单位）。
    #[inline]
    pub fn get_total_ms(&self) -> u64 {
        self.consumed.as_millis() as u64
    }
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::new()
    }
}
