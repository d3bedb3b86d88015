//! Frame ownership and the single-threaded execution contract.
//!
//! The evidence pipeline runs serially: one frame at a time, on one thread.
//! This module enforces that at runtime.
//!
//! - `FrameContext`: owns a frame's immutable input samples and its mutable
//!   outputs. Sample access after `consume()` is impossible by construction
//!   (consume takes the context by value); access from outside the owning
//!   frame is a leak, fatal in strict mode.
//! - A thread-local current-frame id backs `assert_in_frame` guards at
//!   ownership boundaries.
//! - `ReentrancyGuard`: named critical-section guard; a second concurrent
//!   entry under the same name is a precondition violation.
//! - `ThreadVerification`: captures the expected thread at init and asserts
//!   on every public entry point.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::ThreadId;

use anyhow::{anyhow, Result};

use crate::fusion::ledger::Observation;
use crate::grid::GridOp;
use crate::state::{ColorState, GateVerdict};

// ----------------------------------------------------------------------------
// FrameId
// ----------------------------------------------------------------------------

/// Monotonically increasing frame identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId {
    pub id: u64,
    pub created_ms: i64,
}

static FRAME_COUNTER: AtomicU64 = AtomicU64::new(1);

impl FrameId {
    /// Allocate the next frame id. The counter is process-scoped and reset
    /// at session start.
    pub fn next(created_ms: i64) -> Self {
        Self {
            id: FRAME_COUNTER.fetch_add(1, Ordering::Relaxed),
            created_ms,
        }
    }
}

/// Reset the frame counter; called once per session open.
pub fn reset_frame_counter() {
    FRAME_COUNTER.store(1, Ordering::Relaxed);
}

// ----------------------------------------------------------------------------
// Task-local current frame
// ----------------------------------------------------------------------------

thread_local! {
    static CURRENT_FRAME: Cell<Option<u64>> = const { Cell::new(None) };
}

/// The frame currently executing on this thread, if any.
pub fn current_frame_id() -> Option<u64> {
    CURRENT_FRAME.with(|c| c.get())
}

/// Ownership-boundary guard: the caller must be inside frame `id`.
pub fn assert_in_frame(id: u64) -> Result<()> {
    match current_frame_id() {
        Some(current) if current == id => Ok(()),
        current => Err(anyhow!(
            "frame ownership violated: expected frame {}, current {:?}",
            id,
            current
        )),
    }
}

#[cfg(test)]
fn force_current_frame(id: Option<u64>) {
    CURRENT_FRAME.with(|c| c.set(id));
}

// ----------------------------------------------------------------------------
// Frame leak logger
// ----------------------------------------------------------------------------

/// Process-scoped logger for cross-frame access. Not on the hot path;
/// callers must not hold grid or ledger locks while reporting.
#[derive(Debug, Default)]
pub struct FrameLeakLogger {
    leaks: Mutex<u64>,
}

static LEAK_LOGGER: OnceLock<FrameLeakLogger> = OnceLock::new();

pub fn frame_leak_logger() -> &'static FrameLeakLogger {
    LEAK_LOGGER.get_or_init(FrameLeakLogger::default)
}

impl FrameLeakLogger {
    fn record(&self, expected_frame: u64, actual_frame: Option<u64>, caller: &'static str) {
        *self.leaks.lock().expect("frame leak logger poisoned") += 1;
        log::warn!(
            "cross-frame leak: expected_frame={} actual_frame={:?} caller={}",
            expected_frame,
            actual_frame,
            caller
        );
    }

    pub fn leak_count(&self) -> u64 {
        *self.leaks.lock().expect("frame leak logger poisoned")
    }

    /// Reset at session start.
    pub fn reset_for_session(&self) {
        *self.leaks.lock().expect("frame leak logger poisoned") = 0;
    }
}

// ----------------------------------------------------------------------------
// FrameContext
// ----------------------------------------------------------------------------

/// One sensor sample entering a frame: the ledger observation plus the grid
/// mutations derived from it.
#[derive(Clone, Debug)]
pub struct FrameSample {
    pub observation: Observation,
    pub grid_ops: Vec<GridOp>,
}

/// Mutable outputs owned by a frame context.
#[derive(Clone, Debug, Default)]
pub struct FrameOutputs {
    pub fused_coverage: f64,
    pub smoothed_coverage: f64,
    pub soft_evidence: f64,
    pub color_state: Option<ColorState>,
    pub gate_verdict: Option<GateVerdict>,
    pub path_trace: Vec<&'static str>,
}

/// Owns one frame's inputs and outputs for exactly one frame.
///
/// Inputs are private and immutable; there is no `Clone` and no `Serialize`,
/// so samples cannot escape the context. `consume()` takes the context by
/// value, which makes post-consume access unrepresentable; cross-frame
/// access is detected at runtime against the thread-local current frame.
pub struct FrameContext {
    frame_id: FrameId,
    session_id: u64,
    samples: Vec<FrameSample>,
    outputs: FrameOutputs,
    strict: bool,
}

impl FrameContext {
    /// Enter a frame: binds the thread-local current frame to this id.
    pub fn enter(
        frame_id: FrameId,
        session_id: u64,
        samples: Vec<FrameSample>,
        strict: bool,
    ) -> Self {
        CURRENT_FRAME.with(|c| c.set(Some(frame_id.id)));
        Self {
            frame_id,
            session_id,
            samples,
            outputs: FrameOutputs::default(),
            strict,
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    fn check_ownership(&self, caller: &'static str) {
        let current = current_frame_id();
        if current != Some(self.frame_id.id) {
            if self.strict {
                panic!(
                    "cross-frame leak: expected_frame={} actual_frame={:?} caller={}",
                    self.frame_id.id, current, caller
                );
            }
            frame_leak_logger().record(self.frame_id.id, current, caller);
        }
    }

    /// Immutable input samples. Only readable from inside the owning frame.
    pub fn samples(&self, caller: &'static str) -> &[FrameSample] {
        self.check_ownership(caller);
        &self.samples
    }

    /// Mutable outputs. Only writable from inside the owning frame.
    pub fn outputs_mut(&mut self, caller: &'static str) -> &mut FrameOutputs {
        self.check_ownership(caller);
        &mut self.outputs
    }

    /// Record a trace event on this frame's path.
    pub fn trace(&mut self, event: &'static str) {
        self.check_ownership("trace");
        self.outputs.path_trace.push(event);
    }

    /// Consume the frame: clears the thread-local current frame and yields
    /// the outputs. The context is gone afterward; there is nothing left to
    /// leak.
    pub fn consume(self) -> FrameOutputs {
        CURRENT_FRAME.with(|c| {
            if c.get() == Some(self.frame_id.id) {
                c.set(None);
            }
        });
        self.outputs
    }
}

// ----------------------------------------------------------------------------
// Reentrancy guard
// ----------------------------------------------------------------------------

/// Active named sections for one owner (a session actor).
#[derive(Clone, Debug, Default)]
pub struct ReentrancySet {
    sections: Arc<Mutex<BTreeSet<&'static str>>>,
}

impl ReentrancySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the named section. A second concurrent entry with the same
    /// name panics in strict mode and errors otherwise.
    pub fn enter(&self, name: &'static str, strict: bool) -> Result<ReentrancyGuard> {
        let mut sections = self.sections.lock().expect("reentrancy set poisoned");
        if !sections.insert(name) {
            drop(sections);
            if strict {
                panic!("precondition violated: reentrant entry into {}", name);
            }
            return Err(anyhow!(
                "precondition failed: reentrant entry into {}",
                name
            ));
        }
        Ok(ReentrancyGuard {
            sections: Arc::clone(&self.sections),
            name,
        })
    }
}

/// Named critical-section guard. Mandatory on every outer entry point.
pub struct ReentrancyGuard {
    sections: Arc<Mutex<BTreeSet<&'static str>>>,
    name: &'static str,
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        self.sections
            .lock()
            .expect("reentrancy set poisoned")
            .remove(self.name);
    }
}

// ----------------------------------------------------------------------------
// Thread verification
// ----------------------------------------------------------------------------

/// Captures the owning thread at init; public entries assert against it.
#[derive(Clone, Debug)]
pub struct ThreadVerification {
    expected: ThreadId,
}

impl Default for ThreadVerification {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadVerification {
    pub fn new() -> Self {
        Self {
            expected: std::thread::current().id(),
        }
    }

    pub fn verify(&self, entry: &'static str) -> Result<()> {
        let current = std::thread::current().id();
        if current != self.expected {
            return Err(anyhow!(
                "single-threaded contract violated at {}: expected {:?}, got {:?}",
                entry,
                self.expected,
                current
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(strict: bool) -> FrameContext {
        FrameContext::enter(
            FrameId {
                id: 42,
                created_ms: 0,
            },
            1,
            Vec::new(),
            strict,
        )
    }

    #[test]
    fn frame_ids_increase_monotonically() {
        let a = FrameId::next(0);
        let b = FrameId::next(1);
        assert!(b.id > a.id);
    }

    #[test]
    fn entering_a_frame_binds_the_thread_local() {
        let ctx = sample_frame(false);
        assert_eq!(current_frame_id(), Some(42));
        assert!(assert_in_frame(42).is_ok());
        assert!(assert_in_frame(7).is_err());
        let _ = ctx.consume();
        assert_eq!(current_frame_id(), None);
    }

    #[test]
    fn samples_are_readable_inside_the_frame() {
        let ctx = sample_frame(false);
        assert!(ctx.samples("test").is_empty());
        let outputs = ctx.consume();
        assert!(outputs.path_trace.is_empty());
    }

    #[test]
    fn cross_frame_access_is_logged_when_not_strict() {
        let ctx = sample_frame(false);
        // Simulate another frame taking over the thread.
        force_current_frame(Some(99));
        let before = frame_leak_logger().leak_count();
        let _ = ctx.samples("leak_test");
        assert!(frame_leak_logger().leak_count() > before);
        force_current_frame(None);
    }

    #[test]
    #[should_panic(expected = "cross-frame leak")]
    fn cross_frame_access_panics_in_strict_mode() {
        let ctx = sample_frame(true);
        force_current_frame(Some(99));
        let _ = ctx.samples("leak_test");
    }

    #[test]
    fn reentrancy_guard_blocks_nested_entry() {
        let set = ReentrancySet::new();
        let _outer = set.enter("test_section", false).unwrap();
        assert!(set.enter("test_section", false).is_err());
        // Distinct names coexist.
        assert!(set.enter("other_section", false).is_ok());
    }

    #[test]
    fn reentrancy_guard_releases_on_drop() {
        let set = ReentrancySet::new();
        {
            let _guard = set.enter("droppable_section", false).unwrap();
        }
        assert!(set.enter("droppable_section", false).is_ok());
    }

    #[test]
    #[should_panic(expected = "reentrant entry")]
    fn reentrancy_guard_panics_in_strict_mode() {
        let set = ReentrancySet::new();
        let _outer = set.enter("strict_section", true).unwrap();
        let _ = set.enter("strict_section", true);
    }

    #[test]
    fn thread_verification_accepts_owner() {
        let tv = ThreadVerification::new();
        assert!(tv.verify("test_entry").is_ok());
    }

    #[test]
    fn thread_verification_rejects_other_threads() {
        let tv = ThreadVerification::new();
        let handle = std::thread::spawn(move || tv.verify("cross_thread"));
        assert!(handle.join().unwrap().is_err());
    }

    #[test]
    fn outputs_accumulate_trace_events() {
        let mut ctx = sample_frame(false);
        ctx.trace("softmax_uniform");
        ctx.outputs_mut("test").fused_coverage = 0.5;
        let outputs = ctx.consume();
        assert_eq!(outputs.path_trace, vec!["softmax_uniform"]);
        assert_eq!(outputs.fused_coverage, 0.5);
    }
}
