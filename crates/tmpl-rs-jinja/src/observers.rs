//! Render observers.
//!
//! Observers see the template identifier and the fully assembled context of
//! every render, right before the template runs. They are how debugging panels
//! collect "which templates rendered with what" for a request.

use std::sync::{Arc, Mutex};

use tmpl_rs_signals::{ReceiverResult, ScopedReceiver};

use crate::context::Context;
use crate::plugin::TemplateRef;

/// The callable type of a render observer.
pub type RenderObserver = dyn Fn(&TemplateRef, &Context) -> ReceiverResult + Send + Sync;

/// Keeps a scoped observer connected until dropped.
pub type ObserverGuard = ScopedReceiver<RenderObserver>;

/// One observed render.
#[derive(Debug, Clone)]
pub struct RenderRecord {
    /// The template's name.
    pub template: String,
    /// The context the template was rendered with.
    pub context: Context,
}

/// Collects every render it observes.
///
/// Connect [`observer`](Self::observer) with
/// [`JinjaPlugin::observe`](crate::plugin::JinjaPlugin::observe) for the span of
/// a request and inspect [`records`](Self::records) afterwards.
#[derive(Debug, Default)]
pub struct RenderRecorder {
    records: Mutex<Vec<RenderRecord>>,
}

impl RenderRecorder {
    /// Returns an observer that appends to this recorder.
    pub fn observer(self: &Arc<Self>) -> Arc<RenderObserver> {
        let recorder = Arc::clone(self);
        Arc::new(move |template: &TemplateRef, context: &Context| {
            recorder
                .records
                .lock()
                .expect("recorder lock poisoned")
                .push(RenderRecord {
                    template: template.name().to_string(),
                    context: context.clone(),
                });
            Ok(())
        })
    }

    /// Returns the recorded renders, oldest first.
    pub fn records(&self) -> Vec<RenderRecord> {
        self.records.lock().expect("recorder lock poisoned").clone()
    }

    /// Returns the names of the rendered templates, oldest first.
    pub fn template_names(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("recorder lock poisoned")
            .iter()
            .map(|r| r.template.clone())
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.records.lock().expect("recorder lock poisoned").clear();
    }
}
