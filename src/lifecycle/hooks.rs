/// Collaborator notified around lifecycle transitions.
///
/// `on_before_stop` runs before any adapter teardown, while the emulated
/// network is still up, so collaborators can close sessions that hold
/// engine resources.
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_before_stop(&self);
}

/// A hook made from a closure.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

impl<F> LifecycleHook for FnHook<F>
where
    F: Fn() + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_before_stop(&self) {
        (self.f)()
    }
}
