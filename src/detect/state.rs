use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type Slot<S> = Arc<RwLock<Option<S>>>;

/// Per-camera state of one processor.
///
/// Slots are created lazily on first access and start out absent (`None`), which is
/// distinct from any value of `S`. Different cameras never contend on the same slot;
/// the outer map is only write-locked to add a camera.
pub struct ProcessorState<S> {
    slots: RwLock<HashMap<String, Slot<S>>>,
}

impl<S> ProcessorState<S> {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, camera: &str) -> Slot<S> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(camera)
        {
            return slot.clone();
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(camera.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(None)))
            .clone()
    }

    /// True once a state has been stored for `camera`.
    pub fn contains(&self, camera: &str) -> bool {
        self.with(camera, |state| state.is_some())
    }

    /// Read the camera's state without cloning it.
    pub fn with<R>(&self, camera: &str, f: impl FnOnce(Option<&S>) -> R) -> R {
        let slot = self.slot(camera);
        let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }

    /// Compute a new state from the previous one. On `Err` the previous state is kept.
    pub fn update<E>(
        &self,
        camera: &str,
        f: impl FnOnce(Option<&S>) -> Result<S, E>,
    ) -> Result<(), E> {
        let slot = self.slot(camera);
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        let next = f(guard.as_ref())?;
        *guard = Some(next);
        Ok(())
    }

    /// Mutate the camera's state in place, creating it with `S::default()` if absent.
    pub fn modify_or_default<R>(&self, camera: &str, f: impl FnOnce(&mut S) -> R) -> R
    where
        S: Default,
    {
        let slot = self.slot(camera);
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        f(guard.get_or_insert_with(S::default))
    }

    /// Drop the camera's state, returning it.
    pub fn clear(&self, camera: &str) -> Option<S> {
        let slot = self.slot(camera);
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        guard.take()
    }

    /// Cameras that have a slot, present or not.
    pub fn cameras(&self) -> Vec<String> {
        let mut cameras: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        cameras.sort();
        cameras
    }
}

impl<S: Clone> ProcessorState<S> {
    pub fn get(&self, camera: &str) -> Option<S> {
        self.with(camera, |state| state.cloned())
    }
}

impl<S> Default for ProcessorState<S> {
    fn default() -> Self {
        Self::new()
    }
}
