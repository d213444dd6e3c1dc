use super::{BatchRecalculationService, ProgressFn, RecalcFailure, RecalcProgress, RecalcReport, BATCH_ACTOR};
use crate::engine::calculation::WriteMode;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::locks::CancellationFlag;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Instant;

#[derive(Default)]
struct Progress {
    recalculated: usize,
    unchanged: usize,
    failed: Vec<RecalcFailure>,
    storage_error: Option<EngineError>,
}

/// 一批条目的共享工作队列
struct WorkQueue<'a> {
    queue: Mutex<VecDeque<String>>,
    progress: Mutex<Progress>,
    abort: AtomicBool,
    cancel: &'a CancellationFlag,
    mode: &'a WriteMode,
    reason: &'a str,
    total: usize,
    on_progress: Option<ProgressFn<'a>>,
}

impl WorkQueue<'_> {
    fn next(&self) -> Option<String> {
        if self.cancel.is_cancelled() || self.abort.load(Ordering::SeqCst) {
            return None;
        }
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn progress(&self) -> std::sync::MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 记录一个条目的结果并通知回调（回调在锁外执行）
    fn finish(&self, data_entry_id: String, record: impl FnOnce(&mut Progress, String)) {
        let processed = {
            let mut progress = self.progress();
            record(&mut progress, data_entry_id.clone());
            progress.recalculated + progress.unchanged + progress.failed.len()
        };
        if let Some(notify) = self.on_progress {
            notify(&RecalcProgress {
                data_entry_id,
                processed,
                total: self.total,
            });
        }
    }
}

impl BatchRecalculationService {
    /// 顺序或并行地消费队列
    pub(super) fn run(
        &self,
        ids: Vec<String>,
        cancel: &CancellationFlag,
        mode: &WriteMode,
        reason: &str,
        on_progress: Option<ProgressFn<'_>>,
    ) -> EngineResult<RecalcReport> {
        let start = Instant::now();
        let workers = self.parallelism.min(ids.len()).max(1);
        let total = ids.len();

        let work = WorkQueue {
            queue: Mutex::new(ids.into_iter().collect()),
            progress: Mutex::new(Progress::default()),
            abort: AtomicBool::new(false),
            cancel,
            mode,
            reason,
            total,
            on_progress,
        };

        if workers == 1 {
            self.drain(&work);
        } else {
            thread::scope(|s| {
                for _ in 0..workers {
                    s.spawn(|| self.drain(&work));
                }
            });
        }

        let progress = work.progress.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = progress.storage_error {
            return Err(err);
        }

        let pending: Vec<String> = work
            .queue
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .into_iter()
            .collect();

        let mut failed = progress.failed;
        failed.sort_by(|a, b| a.data_entry_id.cmp(&b.data_entry_id));

        Ok(RecalcReport {
            factor_id: None,
            recalculated: progress.recalculated,
            unchanged: progress.unchanged,
            failed,
            cancelled: cancel.is_cancelled() && !pending.is_empty(),
            pending,
            elapsed_ms: start.elapsed().as_millis() as i64,
        })
    }

    fn drain(&self, work: &WorkQueue<'_>) {
        while let Some(data_entry_id) = work.next() {
            let result = self.calculator.calculate_with(
                &data_entry_id,
                BATCH_ACTOR,
                Some(work.reason),
                work.mode,
            );

            match result {
                Ok(outcome) if outcome.is_noop() => work.finish(data_entry_id, |p, _| p.unchanged += 1),
                Ok(_) => work.finish(data_entry_id, |p, _| p.recalculated += 1),
                Err(e) if e.is_storage_failure() => {
                    tracing::error!(data_entry_id = %data_entry_id, error = %e, "存储层故障，中止批量重算");
                    work.abort.store(true, Ordering::SeqCst);
                    work.progress().storage_error.get_or_insert(e);
                    return;
                }
                Err(e) => {
                    tracing::warn!(data_entry_id = %data_entry_id, error = %e, "条目重算失败");
                    work.finish(data_entry_id, |p, id| {
                        p.failed.push(RecalcFailure {
                            data_entry_id: id,
                            error: e.to_string(),
                        })
                    });
                }
            }
        }
    }
}
