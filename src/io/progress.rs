use std::sync::{Mutex, OnceLock};

/// Events delivered to the process-wide progress callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StemProgress {
    Stage(&'static str),
    Started {
        label: &'static str,
        total: u64,
    },
    Advanced {
        label: &'static str,
        done: u64,
        total: u64,
    },
    Finished {
        label: &'static str,
    },
}

static PROGRESS_CB: OnceLock<Mutex<Option<Box<dyn Fn(StemProgress) + Send + 'static>>>> =
    OnceLock::new();

pub fn set_progress_callback(cb: impl Fn(StemProgress) + Send + 'static) {
    let _ = PROGRESS_CB.set(Mutex::new(Some(Box::new(cb))));
}

pub fn emit_progress(event: StemProgress) {
    if let Some(m) = PROGRESS_CB.get() {
        if let Ok(g) = m.lock() {
            if let Some(cb) = &*g {
                cb(event);
            }
        }
    }
}

/// Receiver of monotonic progress increments.
///
/// Invoked synchronously on the thread doing the work.
pub trait ProgressSink {
    fn start(&mut self, total: u64);
    fn advance(&mut self, delta: u64);
    fn finish(&mut self);
}

impl ProgressSink for () {
    fn start(&mut self, _total: u64) {}
    fn advance(&mut self, _delta: u64) {}
    fn finish(&mut self) {}
}

impl<P: ProgressSink + ?Sized> ProgressSink for &mut P {
    fn start(&mut self, total: u64) {
        (**self).start(total)
    }

    fn advance(&mut self, delta: u64) {
        (**self).advance(delta)
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

/// Counts increments and forwards them to the process-wide callback.
#[derive(Debug)]
pub struct ReportedProgress {
    label: &'static str,
    done: u64,
    total: u64,
}

impl ReportedProgress {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            done: 0,
            total: 0,
        }
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl ProgressSink for ReportedProgress {
    fn start(&mut self, total: u64) {
        self.done = 0;
        self.total = total;
        emit_progress(StemProgress::Started {
            label: self.label,
            total,
        });
    }

    fn advance(&mut self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.done = self.done.saturating_add(delta);
        emit_progress(StemProgress::Advanced {
            label: self.label,
            done: self.done,
            total: self.total,
        });
    }

    fn finish(&mut self) {
        emit_progress(StemProgress::Finished { label: self.label });
    }
}
