use std::fmt;

/// Handle returned by operations that hold something until released.
///
/// Release is explicit: call [`dispose`](Disposable::dispose). Dropping a
/// handle without disposing keeps the resource held. Disposing more than
/// once is a no-op.
#[must_use = "a Disposable holds its resource until dispose() is called"]
pub struct Disposable {
    action: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Disposable {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { action: None }
    }

    pub fn dispose(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.action.is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
