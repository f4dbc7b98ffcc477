//! Display adapter.
//!
//! [`DisplaySlot`] owns the lifecycle of the size element: it is created
//! lazily on the first render, only while the page landmark it is anchored
//! to is present, and can be removed and recreated as navigation requires.
//! The actual drawing is delegated to a [`Renderer`].

pub mod terminal;

pub use terminal::TerminalRenderer;

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::engine::format::format_size;
use crate::engine::SizeState;

/// Visual treatment of a rendered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Loading,
    Size,
    Error,
}

/// Backend drawing the element.
pub trait Renderer: Send + Sync {
    /// Create the element next to the landmark.
    fn attach(&self);
    /// Replace the element's content.
    fn show(&self, text: &str, style: Style);
    /// Remove the element.
    fn detach(&self);
}

/// Text and style for `state`; `None` for `Idle`, which draws nothing.
pub fn label(state: &SizeState) -> Option<(String, Style)> {
    let rendered = match state {
        SizeState::Idle => return None,
        SizeState::Loading => ("(loading...)".to_string(), Style::Loading),
        SizeState::Validating => ("(validating...)".to_string(), Style::Loading),
        SizeState::Displaying {
            size_bytes,
            approximate,
        } => (format_size(*size_bytes, *approximate), Style::Size),
        SizeState::CredentialRequired { invalid: false } => {
            ("PAT Required".to_string(), Style::Error)
        }
        SizeState::CredentialRequired { invalid: true } => {
            ("Invalid PAT".to_string(), Style::Error)
        }
        SizeState::Error(message) => (format!("Error: {message}"), Style::Error),
    };
    Some(rendered)
}

#[derive(Debug, Default)]
struct SlotState {
    attached: bool,
    landmark: bool,
    last: Option<(String, Style)>,
}

pub struct DisplaySlot {
    renderer: Arc<dyn Renderer>,
    state: Mutex<SlotState>,
}

impl DisplaySlot {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            state: Mutex::new(SlotState::default()),
        }
    }

    /// Record whether the anchoring landmark is currently on the page.  A
    /// landmark that disappears takes the element with it.
    pub fn set_landmark(&self, present: bool) {
        let mut slot = self.lock();
        if slot.attached && !present {
            self.renderer.detach();
            debug!("landmark gone, element dropped with it");
            slot.attached = false;
            slot.last = None;
        }
        slot.landmark = present;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().attached
    }

    /// Draw `state`.  Rendering the same content twice is a no-op.
    pub fn render(&self, state: &SizeState) {
        let Some((text, style)) = label(state) else {
            return;
        };

        let mut slot = self.lock();
        if !slot.attached {
            if !slot.landmark {
                debug!(%text, "landmark not present, render dropped");
                return;
            }
            self.renderer.attach();
            slot.attached = true;
            debug!("display element created");
        }

        if slot.last.as_ref() == Some(&(text.clone(), style)) {
            return;
        }
        self.renderer.show(&text, style);
        slot.last = Some((text, style));
    }

    /// Remove the element if it exists.  The next render recreates it.
    pub fn remove(&self) {
        let mut slot = self.lock();
        if slot.attached {
            self.renderer.detach();
            debug!("display element removed");
        }
        slot.attached = false;
        slot.last = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        // The slot state stays consistent even if a renderer panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Renderer recording every call, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub events: Mutex<Vec<RenderEvent>>,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    Attach,
    Show(String, Style),
    Detach,
}

#[cfg(test)]
impl RecordingRenderer {
    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Text of the most recent `show`.
    pub fn last_text(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|e| match e {
            RenderEvent::Show(text, _) => Some(text),
            _ => None,
        })
    }
}

#[cfg(test)]
impl Renderer for RecordingRenderer {
    fn attach(&self) {
        self.events.lock().unwrap().push(RenderEvent::Attach);
    }

    fn show(&self, text: &str, style: Style) {
        self.events
            .lock()
            .unwrap()
            .push(RenderEvent::Show(text.to_string(), style));
    }

    fn detach(&self) {
        self.events.lock().unwrap().push(RenderEvent::Detach);
    }
}
