//! DOM action engine.
//!
//! Actions dispatch the events a real user would produce, in order, and
//! fail with a precondition error instead of retrying. Retry policy is the
//! caller's business.

mod keyboard;
mod navigation;
mod pointer;
mod precheck;
mod tempo;

use std::sync::Arc;
use std::time::Duration;

use crossrun_core_types::RelayResult;
use crossrun_dom::{NodeId, SharedDocument};
use tokio::time::sleep;
use tracing::{debug, instrument};

pub use navigation::{navigate, reload, reset, ResetMode, ResetReport};
pub use pointer::{click, dblclick, hover};
pub use precheck::{active_target, ensure_editable, ensure_enabled};
pub use tempo::{
    Cadence, HumanCadence, SeededCadence, TypingPlan, TypingStep, MAX_KEY_DELAY_MS,
    MIN_KEY_DELAY_MS,
};

/// Runs actions against a shared document, pacing keystrokes with a [`Cadence`].
///
/// The document lock is never held across a pause.
#[derive(Clone, Debug)]
pub struct ActionEngine {
    cadence: Arc<dyn Cadence>,
}

impl Default for ActionEngine {
    fn default() -> Self {
        Self::new(Arc::new(HumanCadence))
    }
}

impl ActionEngine {
    pub fn new(cadence: Arc<dyn Cadence>) -> Self {
        Self { cadence }
    }

    pub fn hover(&self, doc: &SharedDocument, target: NodeId) {
        hover(&mut doc.lock(), target);
    }

    pub fn click(&self, doc: &SharedDocument, target: NodeId) -> RelayResult<()> {
        click(&mut doc.lock(), target)
    }

    pub fn dblclick(&self, doc: &SharedDocument, target: NodeId) -> RelayResult<()> {
        dblclick(&mut doc.lock(), target)
    }

    /// Types `text` one character at a time into `target` or the focused element.
    ///
    /// Each character waits out its pause, lands at the caret and fires
    /// `input` (or `change`).
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    pub async fn type_text(
        &self,
        doc: &SharedDocument,
        target: Option<NodeId>,
        text: &str,
    ) -> RelayResult<TypingPlan> {
        let node = {
            let mut page = doc.lock();
            let node = active_target(&page, target)?;
            ensure_editable(&page, node)?;
            page.focus(node);
            node
        };

        let plan = self.cadence.plan(text);
        for step in &plan.steps {
            sleep(Duration::from_millis(step.delay_ms)).await;
            let mut page = doc.lock();
            keyboard::insert_at_selection(&mut page, node, &step.chunk);
            keyboard::notify_value_change(&mut page, node);
        }
        debug!(total_delay_ms = plan.total_delay_ms(), "typed");
        Ok(plan)
    }

    /// Inserts `text` in one step after a `paste` event.
    pub fn paste(&self, doc: &SharedDocument, target: Option<NodeId>, text: &str) -> RelayResult<()> {
        let mut page = doc.lock();
        let node = active_target(&page, target)?;
        ensure_editable(&page, node)?;
        page.focus(node);
        page.dispatch(node, "paste", true);
        keyboard::insert_at_selection(&mut page, node, text);
        keyboard::notify_value_change(&mut page, node);
        Ok(())
    }

    /// Empties the value from the end, one character per pause unless `atomic`.
    ///
    /// Returns how many characters were removed.
    pub async fn clear(
        &self,
        doc: &SharedDocument,
        target: Option<NodeId>,
        atomic: bool,
    ) -> RelayResult<usize> {
        let (node, length) = {
            let mut page = doc.lock();
            let node = active_target(&page, target)?;
            ensure_editable(&page, node)?;
            page.focus(node);
            let length = page.value(node).map(|v| v.chars().count()).unwrap_or(0);
            if atomic {
                page.set_value(node, "");
                keyboard::notify_value_change(&mut page, node);
                return Ok(length);
            }
            (node, length)
        };

        let mut removed = 0;
        for _ in 0..length {
            sleep(Duration::from_millis(self.cadence.next_delay_ms())).await;
            let mut page = doc.lock();
            if !keyboard::remove_last(&mut page, node) {
                break;
            }
            keyboard::notify_value_change(&mut page, node);
            removed += 1;
        }
        Ok(removed)
    }
}
