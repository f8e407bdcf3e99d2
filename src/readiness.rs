use std::fmt;
use std::sync::{Arc, RwLock};

/// Lifecycle of the translation models.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ModelState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Loading => f.write_str("loading"),
            Self::Ready => f.write_str("ready"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Write side of the readiness gate, owned by whoever prepares the models.
#[derive(Clone, Debug, Default)]
pub struct ReadinessHandle {
    state: Arc<RwLock<ModelState>>,
}

/// Read side of the readiness gate, held by the translator.
#[derive(Clone, Debug)]
pub struct ReadinessView {
    state: Arc<RwLock<ModelState>>,
}

impl ReadinessHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that starts out `Ready`, for engines that need no preparation.
    pub fn ready() -> Self {
        let h = Self::new();
        h.set(ModelState::Ready);
        h
    }

    pub fn view(&self) -> ReadinessView {
        ReadinessView {
            state: Arc::clone(&self.state),
        }
    }

    pub fn begin_loading(&self) {
        self.set(ModelState::Loading);
    }

    pub fn mark_ready(&self) {
        self.set(ModelState::Ready);
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.set(ModelState::Failed(reason.into()));
    }

    pub fn state(&self) -> ModelState {
        read_state(&self.state)
    }

    fn set(&self, next: ModelState) {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        *guard = next;
    }
}

impl ReadinessView {
    pub fn is_ready(&self) -> bool {
        matches!(
            *self.state.read().unwrap_or_else(|e| e.into_inner()),
            ModelState::Ready
        )
    }

    pub fn state(&self) -> ModelState {
        read_state(&self.state)
    }
}

fn read_state(state: &RwLock<ModelState>) -> ModelState {
    state.read().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_follows_handle_transitions() {
        let handle = ReadinessHandle::new();
        let view = handle.view();
        assert_eq!(view.state(), ModelState::Uninitialized);
        assert!(!view.is_ready());

        handle.begin_loading();
        assert_eq!(view.state(), ModelState::Loading);
        assert!(!view.is_ready());

        handle.mark_ready();
        assert!(view.is_ready());

        handle.mark_failed("disk full");
        assert!(!view.is_ready());
        assert_eq!(view.state().to_string(), "failed: disk full");
    }

    #[test]
    fn ready_constructor_starts_open() {
        assert!(ReadinessHandle::ready().view().is_ready());
    }

    #[test]
    fn views_are_shared_across_threads() {
        let handle = ReadinessHandle::new();
        let view = handle.view();
        let t = std::thread::spawn(move || handle.mark_ready());
        t.join().unwrap();
        assert!(view.is_ready());
    }
}
