//! 日志抑制
//!
//! 监控循环里的同一类失败可能每个 tick 都发生。`LogSuppressor` 按
//! `(site, FailureKind)` 计数，只在以下情况输出一行：
//! - 第一次出现
//! - 每第 N 次出现
//! - 距离上次输出超过抑制窗口
//!
//! 输出行携带 `occurrences` (累计次数) 与 `suppressed` (上次输出后被吞掉的次数)。

use std::collections::HashMap;
use std::fmt::Display;
use std::time::{Duration, Instant};

use contracts::FailureKind;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::metrics::record_suppressed_failure;

/// 抑制策略
#[derive(Debug, Clone, Copy)]
pub struct SuppressionPolicy {
    /// 每 N 次输出一次
    pub every_n: u64,
    /// 超过该时长未输出则强制输出
    pub window: Duration,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            every_n: 100,
            window: Duration::from_secs(10),
        }
    }
}

/// 一次被放行的日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    pub occurrences: u64,
    pub suppressed: u64,
}

/// 单个键的汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressionSummary {
    pub site: &'static str,
    pub kind: FailureKind,
    pub occurrences: u64,
    pub suppressed_total: u64,
}

#[derive(Debug)]
struct Entry {
    occurrences: u64,
    pending: u64,
    suppressed_total: u64,
    last_emitted: Instant,
}

/// 按失败类型去重的日志器
#[derive(Debug, Default)]
pub struct LogSuppressor {
    policy: SuppressionPolicy,
    entries: Mutex<HashMap<(&'static str, FailureKind), Entry>>,
}

impl LogSuppressor {
    pub fn new(policy: SuppressionPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> SuppressionPolicy {
        self.policy
    }

    /// 记录一次失败，返回是否应输出
    pub fn observe(&self, site: &'static str, kind: FailureKind) -> Option<Emission> {
        self.observe_at(site, kind, Instant::now())
    }

    /// 同 `observe`，时间由调用方提供
    pub fn observe_at(
        &self,
        site: &'static str,
        kind: FailureKind,
        now: Instant,
    ) -> Option<Emission> {
        let mut entries = self.entries.lock();
        let entry = match entries.get_mut(&(site, kind)) {
            Some(entry) => entry,
            None => {
                entries.insert(
                    (site, kind),
                    Entry {
                        occurrences: 1,
                        pending: 0,
                        suppressed_total: 0,
                        last_emitted: now,
                    },
                );
                return Some(Emission {
                    occurrences: 1,
                    suppressed: 0,
                });
            }
        };

        entry.occurrences += 1;
        let every_n = self.policy.every_n.max(1);
        let due = entry.occurrences % every_n == 0
            || now.saturating_duration_since(entry.last_emitted) >= self.policy.window;

        if due {
            let emission = Emission {
                occurrences: entry.occurrences,
                suppressed: entry.pending,
            };
            entry.pending = 0;
            entry.last_emitted = now;
            Some(emission)
        } else {
            entry.pending += 1;
            entry.suppressed_total += 1;
            drop(entries);
            record_suppressed_failure(kind);
            None
        }
    }

    /// 记录失败并在放行时输出日志
    ///
    /// 返回是否输出了日志。
    pub fn report(&self, site: &'static str, kind: FailureKind, error: &dyn Display) -> bool {
        match self.observe(site, kind) {
            Some(emission) => {
                if kind == FailureKind::SuppressedDuplicate {
                    info!(
                        site,
                        kind = %kind,
                        occurrences = emission.occurrences,
                        suppressed = emission.suppressed,
                        "{error}"
                    );
                } else {
                    warn!(
                        site,
                        kind = %kind,
                        occurrences = emission.occurrences,
                        suppressed = emission.suppressed,
                        "{error}"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// 失败恢复后清除计数，下次失败立即输出
    pub fn clear(&self, site: &'static str, kind: FailureKind) -> bool {
        self.entries.lock().remove(&(site, kind)).is_some()
    }

    /// 各键的累计统计 (按 site 排序)
    pub fn summary(&self) -> Vec<SuppressionSummary> {
        let mut out: Vec<_> = self
            .entries
            .lock()
            .iter()
            .map(|(&(site, kind), e)| SuppressionSummary {
                site,
                kind,
                occurrences: e.occurrences,
                suppressed_total: e.suppressed_total,
            })
            .collect();
        out.sort_by(|a, b| a.site.cmp(b.site).then(a.kind.as_str().cmp(b.kind.as_str())));
        out
    }

    /// 输出一行汇总日志 (仅在有失败时)
    pub fn log_summary(&self) {
        for s in self.summary() {
            info!(
                site = s.site,
                kind = %s.kind,
                occurrences = s.occurrences,
                suppressed = s.suppressed_total,
                "Failure summary"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "capture";

    fn policy(every_n: u64, window_ms: u64) -> SuppressionPolicy {
        SuppressionPolicy {
            every_n,
            window: Duration::from_millis(window_ms),
        }
    }

    #[test]
    fn test_first_occurrence_is_emitted() {
        let s = LogSuppressor::default();
        let emission = s.observe(SITE, FailureKind::TransientCaptureFailure);
        assert_eq!(
            emission,
            Some(Emission {
                occurrences: 1,
                suppressed: 0
            })
        );
    }

    #[test]
    fn test_every_nth_is_emitted() {
        let s = LogSuppressor::new(policy(5, 60_000));
        let t0 = Instant::now();
        let emitted: Vec<u64> = (0..12)
            .filter_map(|_| s.observe_at(SITE, FailureKind::TransientCaptureFailure, t0))
            .map(|e| e.occurrences)
            .collect();
        assert_eq!(emitted, vec![1, 5, 10]);
    }

    #[test]
    fn test_window_forces_emission() {
        let s = LogSuppressor::new(policy(1000, 100));
        let t0 = Instant::now();
        assert!(s.observe_at(SITE, FailureKind::EntityNotResolved, t0).is_some());
        assert!(s
            .observe_at(SITE, FailureKind::EntityNotResolved, t0 + Duration::from_millis(50))
            .is_none());
        let e = s
            .observe_at(SITE, FailureKind::EntityNotResolved, t0 + Duration::from_millis(150))
            .unwrap();
        assert_eq!(e.occurrences, 3);
        assert_eq!(e.suppressed, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let s = LogSuppressor::new(policy(1000, 60_000));
        let t0 = Instant::now();
        assert!(s.observe_at(SITE, FailureKind::TransientCaptureFailure, t0).is_some());
        assert!(s.observe_at(SITE, FailureKind::ConfigurationUnavailable, t0).is_some());
        assert!(s.observe_at("telemetry", FailureKind::TransientCaptureFailure, t0).is_some());
        assert!(s.observe_at(SITE, FailureKind::TransientCaptureFailure, t0).is_none());
    }

    #[test]
    fn test_clear_and_summary() {
        let s = LogSuppressor::new(policy(1000, 60_000));
        for _ in 0..4 {
            s.report(SITE, FailureKind::AccessViolation, &"engine advanced");
        }
        let summary = s.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].occurrences, 4);
        assert_eq!(summary[0].suppressed_total, 3);

        assert!(s.clear(SITE, FailureKind::AccessViolation));
        assert!(s.report(SITE, FailureKind::AccessViolation, &"engine advanced"));
    }
}
