/// Runs `on_exit` when dropped, including when the owning task is aborted
/// mid-await.
pub struct ScopeGuard<F: FnOnce()> {
    on_exit: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(on_exit: F) -> Self {
        Self { on_exit: Some(on_exit) }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }
}
