//! Background scheduler for reminder jobs.
//!
//! Three job shapes, all owned by [`ReminderScheduler`]:
//! - interval jobs (activity / task / fall polling)
//! - cron jobs with standard 5-field syntax (daily medication scheduling,
//!   evaluated in the facility-local offset)
//! - one-shot jobs at an absolute instant (queued medication reminders)
//!
//! Every job holds a `CancellationToken` + `JoinHandle`; re-adding an id
//! replaces and cancels the previous job. Tick errors are logged and the
//! loop continues.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};
use tracing::warn;

// ============== Cron expression engine ==============

#[derive(Clone, Debug)]
pub struct CronExpr {
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

impl CronExpr {
    /// Parse a 5-field cron expression (min hour dom mon dow).
    pub fn parse(expr: &str) -> Result<Self> {
        let parts = expr
            .split_whitespace()
            .filter(|s| !s.trim().is_empty())
            .collect::<Vec<_>>();
        if parts.len() != 5 {
            return Err(Error::Config(format!(
                "expected 5 cron fields, got {}",
                parts.len()
            )));
        }

        let min = Field::parse(parts[0], 0, 59, false)?;
        let hour = Field::parse(parts[1], 0, 23, false)?;
        let dom = Field::parse(parts[2], 1, 31, false)?;
        let mon = Field::parse(parts[3], 1, 12, false)?;
        let dow = Field::parse(parts[4], 0, 6, true)?;

        Ok(Self {
            min,
            hour,
            dom,
            mon,
            dow,
        })
    }

    pub fn matches<Tz: TimeZone>(&self, dt: &DateTime<Tz>) -> bool {
        let minute = dt.minute();
        let hour = dt.hour();
        let dom = dt.day();
        let mon = dt.month();
        let dow = dt.weekday().num_days_from_sunday();

        if !self.min.contains(minute) {
            return false;
        }
        if !self.hour.contains(hour) {
            return false;
        }
        if !self.mon.contains(mon) {
            return false;
        }

        // Standard cron semantics: if both DOM and DOW are restricted, match
        // when EITHER matches.
        let dom_match = self.dom.contains(dom);
        let dow_match = self.dow.contains(dow);

        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    pub fn next_after<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        // Start at the next minute boundary.
        let mut t = now + chrono::Duration::minutes(1);
        t = t.with_second(0)?.with_nanosecond(0)?;

        // Hard cap to avoid infinite loops for impossible expressions.
        let max_iters = 366usize * 24 * 60;
        for _ in 0..max_iters {
            if self.matches(&t) {
                return Some(t);
            }
            t += chrono::Duration::minutes(1);
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, allow_7_as_0: bool) -> Result<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(Self {
                min,
                max,
                any: true,
                allowed: vec![true; (max + 1) as usize],
            });
        }

        let mut allowed = vec![false; (max + 1) as usize];
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if part == "*" {
                for v in min..=max {
                    allowed[v as usize] = true;
                }
                continue;
            }

            let (base, step) = if let Some((a, b)) = part.split_once('/') {
                let step: u32 = b
                    .trim()
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid cron step: {b}")))?;
                if step == 0 {
                    return Err(Error::Config("cron step must be > 0".to_string()));
                }
                (a.trim(), Some(step))
            } else {
                (part, None)
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                let a = parse_u32(a.trim(), allow_7_as_0)?;
                let b = parse_u32(b.trim(), allow_7_as_0)?;
                (a, b)
            } else {
                let a = parse_u32(base.trim(), allow_7_as_0)?;
                if step.is_some() {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            let start = start.max(min);
            let end = end.min(max);
            if start > end {
                return Err(Error::Config(format!("invalid cron range: {base}")));
            }

            let step = step.unwrap_or(1);
            let mut v = start;
            while v <= end {
                allowed[v as usize] = true;
                v = v.saturating_add(step);
            }
        }

        let mut any = true;
        for v in min..=max {
            if !allowed[v as usize] {
                any = false;
                break;
            }
        }

        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        if v < self.min || v > self.max {
            return false;
        }
        self.allowed.get(v as usize).copied().unwrap_or(false)
    }
}

fn parse_u32(s: &str, allow_7_as_0: bool) -> Result<u32> {
    let mut v: u32 = s
        .parse()
        .map_err(|_| Error::Config(format!("invalid cron number: {s}")))?;
    if allow_7_as_0 && v == 7 {
        v = 0;
    }
    Ok(v)
}

// ============== Reminder scheduler ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobKind {
    Interval,
    Cron,
    OneShot,
}

struct JobEntry {
    kind: JobKind,
    seq: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    jobs: HashMap<String, JobEntry>,
}

struct Inner {
    state: tokio::sync::Mutex<State>,
    next_seq: AtomicU64,
}

#[derive(Clone)]
pub struct ReminderScheduler {
    inner: Arc<Inner>,
}

impl Default for ReminderScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: tokio::sync::Mutex::new(State::default()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Run `tick` every `period`. The first tick fires after one period.
    pub async fn add_interval_job<F, Fut>(&self, id: &str, period: Duration, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tok.cancelled() => break,
                    _ = sleep(period) => {
                        if let Err(e) = tick().await {
                            warn!("interval job {job_id} tick failed: {e}");
                        }
                    }
                }
            }
        });
        self.insert(id, JobKind::Interval, cancel, handle).await;
    }

    /// Run `tick` at every match of `expr`, evaluated in `tz`.
    pub async fn add_cron_job<F, Fut>(&self, id: &str, expr: CronExpr, tz: FixedOffset, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&tz);
                let Some(next) = expr.next_after(now) else {
                    warn!("cron job {job_id} has no next run, stopping");
                    break;
                };
                let dur = (next - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = tok.cancelled() => break,
                    _ = sleep(dur) => {
                        if let Err(e) = tick().await {
                            warn!("cron job {job_id} tick failed: {e}");
                        }
                    }
                }
            }
        });
        self.insert(id, JobKind::Cron, cancel, handle).await;
    }

    /// Run `run` once at `at`. Due-or-past instants fire immediately.
    /// The job removes itself once it has run.
    pub async fn schedule_at<F, Fut>(&self, id: &str, at: DateTime<Utc>, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let job_id = id.to_string();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let dur = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tok.cancelled() => return,
                _ = sleep(dur) => {
                    if let Err(e) = run().await {
                        warn!("one-shot job {job_id} failed: {e}");
                    }
                }
            }
            if let Some(inner) = weak.upgrade() {
                let mut st = inner.state.lock().await;
                // Only remove our own entry, not a replacement under the same id.
                if st.jobs.get(&job_id).map(|j| j.seq) == Some(seq) {
                    st.jobs.remove(&job_id);
                }
            }
        });
        self.insert_with_seq(id, JobKind::OneShot, seq, cancel, handle)
            .await;
    }

    /// Cancel every pending one-shot job (used by `/refresh` before
    /// re-scheduling, so reminders are not duplicated).
    pub async fn clear_oneshots(&self) {
        let mut st = self.inner.state.lock().await;
        let ids: Vec<String> = st
            .jobs
            .iter()
            .filter(|(_, j)| j.kind == JobKind::OneShot)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(job) = st.jobs.remove(&id) {
                job.cancel.cancel();
                job.handle.abort();
            }
        }
    }

    /// Cancel everything.
    pub async fn shutdown(&self) {
        let mut st = self.inner.state.lock().await;
        for (_, job) in st.jobs.drain() {
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    pub async fn job_count(&self) -> usize {
        self.inner.state.lock().await.jobs.len()
    }

    async fn insert(&self, id: &str, kind: JobKind, cancel: CancellationToken, handle: JoinHandle<()>) {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst);
        self.insert_with_seq(id, kind, seq, cancel, handle).await;
    }

    async fn insert_with_seq(
        &self,
        id: &str,
        kind: JobKind,
        seq: u64,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    ) {
        let mut st = self.inner.state.lock().await;
        if let Some(old) = st.jobs.insert(
            id.to_string(),
            JobEntry {
                kind,
                seq,
                cancel,
                handle,
            },
        ) {
            old.cancel.cancel();
            old.handle.abort();
        }
    }
}

// ============== Tests ==============

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::facility_offset;
    use std::sync::atomic::AtomicUsize;

    fn facility(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        facility_offset()
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
    }

    #[test]
    fn cron_parses_and_matches_basic() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        assert!(expr.matches(&facility(2026, 1, 1, 10, 0)));
        assert!(!expr.matches(&facility(2026, 1, 1, 10, 1)));
    }

    #[test]
    fn daily_medication_expression_matches_one_past_midnight() {
        let expr = CronExpr::parse("1 0 * * *").unwrap();
        assert!(expr.matches(&facility(2026, 1, 1, 0, 1)));
        assert!(!expr.matches(&facility(2026, 1, 1, 0, 2)));
        assert!(!expr.matches(&facility(2026, 1, 1, 1, 1)));
    }

    #[test]
    fn next_after_finds_next_step_boundary() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let next = expr.next_after(facility(2026, 1, 1, 10, 1)).unwrap();
        assert_eq!(next.minute(), 5);
        assert_eq!(next.second(), 0);
    }

    #[test]
    fn dom_dow_or_rule() {
        // 2026-01-01 is a Thursday (dow 4). dom=15 restricted, dow=4 restricted:
        // either match fires.
        let expr = CronExpr::parse("0 0 15 * 4").unwrap();
        assert!(expr.matches(&facility(2026, 1, 1, 0, 0))); // dow matches
        assert!(expr.matches(&facility(2026, 1, 15, 0, 0))); // dom matches
        assert!(!expr.matches(&facility(2026, 1, 2, 0, 0))); // neither (Friday the 2nd)
    }

    #[test]
    fn sunday_accepts_seven() {
        let expr = CronExpr::parse("0 0 * * 7").unwrap();
        // 2026-01-04 is a Sunday.
        assert!(expr.matches(&facility(2026, 1, 4, 0, 0)));
    }

    #[test]
    fn rejects_bad_expressions() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("x * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("30-10 * * * *").is_err());
    }

    #[tokio::test]
    async fn one_shot_in_the_past_fires_immediately() {
        let scheduler = ReminderScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler
            .schedule_at("past", Utc::now() - chrono::Duration::seconds(5), move || async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // The one-shot removed itself after running.
        assert_eq!(scheduler.job_count().await, 0);
    }

    #[tokio::test]
    async fn clear_oneshots_cancels_pending_jobs() {
        let scheduler = ReminderScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler
            .schedule_at("future", Utc::now() + chrono::Duration::seconds(60), move || async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert_eq!(scheduler.job_count().await, 1);
        scheduler.clear_oneshots().await;
        assert_eq!(scheduler.job_count().await, 0);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interval_job_ticks_repeatedly_and_survives_errors() {
        let scheduler = ReminderScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        scheduler
            .add_interval_job("poll", Duration::from_millis(10), move || {
                let h = h.clone();
                async move {
                    let n = h.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        return Err(Error::External("transient".to_string()));
                    }
                    Ok(())
                }
            })
            .await;
        sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;
        assert!(hits.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn re_adding_an_id_replaces_the_old_job() {
        let scheduler = ReminderScheduler::new();
        let old_hits = Arc::new(AtomicUsize::new(0));
        let h = old_hits.clone();
        scheduler
            .schedule_at("med-1", Utc::now() + chrono::Duration::milliseconds(30), move || async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let new_hits = Arc::new(AtomicUsize::new(0));
        let h = new_hits.clone();
        scheduler
            .schedule_at("med-1", Utc::now() + chrono::Duration::milliseconds(30), move || async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        sleep(Duration::from_millis(120)).await;
        assert_eq!(old_hits.load(Ordering::SeqCst), 0);
        assert_eq!(new_hits.load(Ordering::SeqCst), 1);
    }
}
