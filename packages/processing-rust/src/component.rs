//! Lazily built, replaceable configuration values.
//!
//! A [`Component`] wraps a factory that receives the [`Configuration`]. The
//! factory runs at most once; every later `get` returns the cached value until
//! the component is [`reset`](Component::reset).

use std::convert::Infallible;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Configuration;

type Factory<T, E> = Arc<dyn Fn(&Configuration) -> Result<T, E> + Send + Sync>;

struct ComponentState<T, E> {
    factory: Factory<T, E>,
    instance: Option<T>,
}

/// A named lazy cell around a configuration factory.
///
/// The factory runs under the cell's lock, so concurrent first accesses build
/// the value exactly once. A factory must not resolve its own component.
///
/// `E` is the factory's error type. Infallible components expose
/// [`get`](Component::get); fallible ones expose
/// [`try_get`](Component::try_get), which does not cache failures.
pub struct Component<T, E = Infallible> {
    name: String,
    state: Mutex<ComponentState<T, E>>,
}

impl<T: Clone, E> Component<T, E> {
    /// Creates a component whose factory may fail.
    pub fn fallible(
        name: impl Into<String>,
        factory: impl Fn(&Configuration) -> Result<T, E> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ComponentState {
                factory: Arc::new(factory),
                instance: None,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cached value, building it first if needed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error. Nothing is cached in that case, so the next
    /// call runs the factory again.
    pub fn try_get(&self, configuration: &Configuration) -> Result<T, E> {
        let mut state = self.state.lock();
        if let Some(instance) = &state.instance {
            return Ok(instance.clone());
        }
        debug!(component = %self.name, "building component");
        let instance = (state.factory)(configuration)?;
        state.instance = Some(instance.clone());
        Ok(instance)
    }

    /// Replaces the factory.
    ///
    /// An already built value stays cached; the new factory only takes effect
    /// after [`reset`](Component::reset).
    pub fn update_fallible(
        &self,
        factory: impl Fn(&Configuration) -> Result<T, E> + Send + Sync + 'static,
    ) {
        let mut state = self.state.lock();
        if state.instance.is_some() {
            warn!(
                component = %self.name,
                "component replaced after it was built; the built value is kept until reset"
            );
        }
        state.factory = Arc::new(factory);
    }

    /// The cached value, without building it.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.state.lock().instance.clone()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().instance.is_some()
    }

    /// Drops the cached value so the next access runs the current factory.
    pub fn reset(&self) {
        self.state.lock().instance = None;
    }
}

impl<T: Clone + 'static> Component<T> {
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(&Configuration) -> T + Send + Sync + 'static,
    ) -> Self {
        Self::fallible(name, move |configuration| Ok(factory(configuration)))
    }

    /// Returns the cached value, building it first if needed.
    pub fn get(&self, configuration: &Configuration) -> T {
        match self.try_get(configuration) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// See [`update_fallible`](Component::update_fallible).
    pub fn update(&self, factory: impl Fn(&Configuration) -> T + Send + Sync + 'static) {
        self.update_fallible(move |configuration| Ok(factory(configuration)));
    }
}

impl<T, E> std::fmt::Debug for Component<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.name)
            .field("initialized", &self.state.lock().instance.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>, value: u32) -> Component<u32> {
        let counter = counter.clone();
        Component::new("number", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            value
        })
    }

    #[test]
    fn builds_once_and_caches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let component = counting(&calls, 7);
        let configuration = Configuration::default();

        assert!(!component.is_initialized());
        assert_eq!(component.peek(), None);
        assert_eq!(component.get(&configuration), 7);
        assert_eq!(component.get(&configuration), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(component.peek(), Some(7));
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let component = Arc::new(counting(&calls, 3));
        let configuration = Arc::new(Configuration::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let component = component.clone();
                let configuration = configuration.clone();
                thread::spawn(move || component.get(&configuration))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_after_build_keeps_cached_value_until_reset() {
        let calls = Arc::new(AtomicUsize::new(0));
        let component = counting(&calls, 1);
        let configuration = Configuration::default();

        assert_eq!(component.get(&configuration), 1);
        component.update(|_| 2);
        assert_eq!(component.get(&configuration), 1);

        component.reset();
        assert_eq!(component.get(&configuration), 2);
    }

    #[test]
    fn update_before_build_takes_effect() {
        let calls = Arc::new(AtomicUsize::new(0));
        let component = counting(&calls, 1);
        component.update(|_| 5);
        assert_eq!(component.get(&Configuration::default()), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failures_are_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let component: Component<u32, String> = Component::fallible("flaky", move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("not yet".to_string())
            } else {
                Ok(9)
            }
        });
        let configuration = Configuration::default();

        assert_eq!(component.try_get(&configuration), Err("not yet".to_string()));
        assert!(!component.is_initialized());
        assert_eq!(component.try_get(&configuration), Ok(9));
        assert_eq!(component.try_get(&configuration), Ok(9));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
