use std::future::Future;
use tracing::debug;

/// Remembers the single most recent call by argument equality.
///
/// Meant for expensive per-field checks ("is this username taken?") that
/// re-run on every keystroke with mostly the same argument. Failures are
/// never cached: an `Err` clears the slot so the next call retries.
pub struct SingleSlotCache<A, R> {
    slot: Option<(A, R)>,
    eq: fn(&A, &A) -> bool,
}

impl<A: PartialEq, R> Default for SingleSlotCache<A, R> {
    fn default() -> Self {
        Self::with_eq(|a, b| a == b)
    }
}

impl<A: PartialEq, R> SingleSlotCache<A, R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<A, R> SingleSlotCache<A, R> {
    /// Use a custom argument equality.
    pub fn with_eq(eq: fn(&A, &A) -> bool) -> Self {
        SingleSlotCache { slot: None, eq }
    }

    /// The cached result, if `args` matches the cached call.
    pub fn get(&self, args: &A) -> Option<&R> {
        match &self.slot {
            Some((cached, result)) if (self.eq)(cached, args) => Some(result),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn get_or_try_insert_with<E, F>(&mut self, args: A, f: F) -> Result<R, E>
    where
        R: Clone,
        F: FnOnce(&A) -> Result<R, E>,
    {
        if let Some(hit) = self.get(&args) {
            return Ok(hit.clone());
        }
        let result = f(&args);
        self.store(args, result)
    }

    pub async fn get_or_try_insert_async<E, F, Fut>(&mut self, args: A, f: F) -> Result<R, E>
    where
        R: Clone,
        F: FnOnce(&A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        if let Some(hit) = self.get(&args) {
            return Ok(hit.clone());
        }
        let result = f(&args).await;
        self.store(args, result)
    }

    fn store<E>(&mut self, args: A, result: Result<R, E>) -> Result<R, E>
    where
        R: Clone,
    {
        match result {
            Ok(value) => {
                self.slot = Some((args, value.clone()));
                Ok(value)
            }
            Err(err) => {
                debug!(target: "formstate::memo", "call failed, clearing cached result");
                self.clear();
                Err(err)
            }
        }
    }
}
