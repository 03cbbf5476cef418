//! Lazily loaded, explicitly unloadable model slots.

use std::fmt;

use tracing::{info, warn};

use bark_core::{BarkError, BarkResult};

/// Constructor for the model held by a [`ModelSlot`].
pub type Loader<M> = Box<dyn Fn() -> BarkResult<Box<M>> + Send + Sync>;

/// Holds at most one instance of a model, loading it on first use.
///
/// A failed load leaves the slot empty and returns `ModelLoad`.
pub struct ModelSlot<M: ?Sized> {
    name: &'static str,
    loader: Loader<M>,
    model: Option<Box<M>>,
}

impl<M: ?Sized> ModelSlot<M> {
    pub fn new(name: &'static str, loader: Loader<M>) -> Self {
        Self {
            name,
            loader,
            model: None,
        }
    }

    /// Slot name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Load the model unless it is already resident.
    pub fn load(&mut self) -> BarkResult<()> {
        if self.model.is_some() {
            return Ok(());
        }
        match (self.loader)() {
            Ok(model) => {
                info!(model = self.name, "Model loaded");
                self.model = Some(model);
                Ok(())
            }
            Err(e) => {
                warn!(model = self.name, error = %e, "Model failed to load");
                self.model = None;
                Err(match e {
                    e @ BarkError::ModelLoad { .. } => e,
                    other => BarkError::model_load(self.name, other.to_string()),
                })
            }
        }
    }

    /// The resident model, loading it first if needed.
    pub fn get(&mut self) -> BarkResult<&mut M> {
        self.load()?;
        let name = self.name;
        self.model
            .as_deref_mut()
            .ok_or_else(|| BarkError::NoModelLoaded(name.to_string()))
    }

    /// Drop the resident model. Returns whether one was loaded.
    pub fn unload(&mut self) -> bool {
        let was_loaded = self.model.take().is_some();
        if was_loaded {
            info!(model = self.name, "Model unloaded");
        }
        was_loaded
    }
}

impl<M: ?Sized> fmt::Debug for ModelSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSlot")
            .field("name", &self.name)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Constructor for a model chosen by name.
pub type NamedLoader<M> = Box<dyn Fn(&str) -> BarkResult<Box<M>> + Send + Sync>;

/// Holds at most one of several interchangeable models, keyed by name.
///
/// Asking for the resident name reuses it; any other name drops the resident
/// model before the new one loads.
pub struct NamedSlot<M: ?Sized> {
    kind: &'static str,
    loader: NamedLoader<M>,
    current: Option<(String, Box<M>)>,
}

impl<M: ?Sized> NamedSlot<M> {
    pub fn new(kind: &'static str, loader: NamedLoader<M>) -> Self {
        Self {
            kind,
            loader,
            current: None,
        }
    }

    /// Slot that cannot load anything.
    pub fn unavailable(kind: &'static str) -> Self {
        Self::new(
            kind,
            Box::new(move |_: &str| Err(BarkError::NoModelLoaded(kind.to_string()))),
        )
    }

    /// Name of the resident model.
    pub fn loaded_name(&self) -> Option<&str> {
        self.current.as_ref().map(|(name, _)| name.as_str())
    }

    /// The model called `name`, loading it in place of the resident one if needed.
    pub fn get(&mut self, name: &str) -> BarkResult<&mut M> {
        if self.loaded_name() != Some(name) {
            if let Some((old, _)) = self.current.take() {
                info!(kind = self.kind, model = %old, "Model unloaded");
            }
            let model = (self.loader)(name).map_err(|e| {
                warn!(kind = self.kind, model = name, error = %e, "Model failed to load");
                match e {
                    e @ (BarkError::ModelLoad { .. } | BarkError::NoModelLoaded(_)) => e,
                    other => BarkError::model_load(name, other.to_string()),
                }
            })?;
            info!(kind = self.kind, model = name, "Model loaded");
            self.current = Some((name.to_string(), model));
        }
        let kind = self.kind;
        self.current
            .as_mut()
            .map(|(_, model)| &mut **model)
            .ok_or_else(|| BarkError::NoModelLoaded(kind.to_string()))
    }

    /// Drop the resident model. Returns whether one was loaded.
    pub fn unload(&mut self) -> bool {
        match self.current.take() {
            Some((name, _)) => {
                info!(kind = self.kind, model = %name, "Model unloaded");
                true
            }
            None => false,
        }
    }
}

impl<M: ?Sized> fmt::Debug for NamedSlot<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedSlot")
            .field("kind", &self.kind)
            .field("loaded", &self.loaded_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_slot(fail: bool) -> (ModelSlot<u32>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let slot = ModelSlot::new(
            "test",
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(BarkError::Io(std::io::Error::other("weights missing")))
                } else {
                    Ok(Box::new(7))
                }
            }),
        );
        (slot, loads)
    }

    #[test]
    fn test_lazy_load_and_reuse() {
        let (mut slot, loads) = counting_slot(false);
        assert!(!slot.is_loaded());
        assert_eq!(*slot.get().unwrap(), 7);
        assert_eq!(*slot.get().unwrap(), 7);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unload_forces_reload() {
        let (mut slot, loads) = counting_slot(false);
        slot.get().unwrap();
        assert!(slot.unload());
        assert!(!slot.unload());
        slot.get().unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_named_slot_reloads_on_name_change() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let mut slot: NamedSlot<String> = NamedSlot::new(
            "voice",
            Box::new(move |name: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(name.to_uppercase()))
            }),
        );

        assert_eq!(*slot.get("alto").unwrap(), "ALTO");
        assert_eq!(*slot.get("alto").unwrap(), "ALTO");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        assert_eq!(*slot.get("bass").unwrap(), "BASS");
        assert_eq!(slot.loaded_name(), Some("bass"));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        assert!(slot.unload());
        assert!(slot.loaded_name().is_none());
    }

    #[test]
    fn test_unavailable_named_slot() {
        let mut slot: NamedSlot<u32> = NamedSlot::unavailable("synthesizer");
        assert!(matches!(slot.get("any"), Err(BarkError::NoModelLoaded(_))));
        assert!(!slot.unload());
    }

    #[test]
    fn test_failed_load_leaves_slot_empty() {
        let (mut slot, _) = counting_slot(true);
        let err = slot.get().unwrap_err();
        assert!(matches!(err, BarkError::ModelLoad { ref model, .. } if model == "test"));
        assert!(!slot.is_loaded());
    }
}
