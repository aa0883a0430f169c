//! # Handle to one forked sub-operation.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::TaskError;
use crate::group::scope::lock;
use crate::group::SubtaskGroup;

/// Result cell written by the child task, read once by the handle.
pub(crate) enum Slot<R> {
    Running,
    Succeeded(R),
    Failed,
    Taken,
}

/// Observable state of a forked sub-operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtaskState {
    /// Still executing (or cancelled before it could record anything).
    Running,
    /// Finished with a value; the group has not joined yet.
    Succeeded,
    /// Finished with an error (or was cancelled); the group has not joined yet.
    Failed,
    /// The group joined; [`SubtaskHandle::get`] no longer blocks.
    Joined,
}

type Fallback<R> = Box<dyn FnOnce(TaskError) -> R + Send>;

/// Handle to a sub-operation forked into a [`SubtaskGroup`].
///
/// Reading the result joins the whole group first (once, shared with every other handle).
pub struct SubtaskHandle<R> {
    name: Arc<str>,
    group: SubtaskGroup,
    slot: Arc<Mutex<Slot<R>>>,
    fallback: Option<Fallback<R>>,
}

impl<R> fmt::Debug for SubtaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtaskHandle")
            .field("name", &self.name)
            .field("group", &self.group.name())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<R> SubtaskHandle<R>
where
    R: Send + 'static,
{
    pub(crate) fn new(name: Arc<str>, group: SubtaskGroup, slot: Arc<Mutex<Slot<R>>>) -> Self {
        Self {
            name,
            group,
            slot,
            fallback: None,
        }
    }

    /// Sub-operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs a substitution callback: when the group fails, [`get`](Self::get)
    /// returns `Ok(f(cause))` instead of the error.
    ///
    /// # Example
    /// ```
    /// use stagevisor::{GroupConfig, SubtaskGroup, TaskError};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let group = SubtaskGroup::open(GroupConfig::new());
    /// let price = group
    ///     .fork(async { Err::<u32, _>(TaskError::fail("pricing unavailable")) })
    ///     .unwrap()
    ///     .on_error(|_| 0);
    /// assert_eq!(price.get().await.ok(), Some(0));
    /// # }
    /// ```
    pub fn on_error(mut self, f: impl FnOnce(TaskError) -> R + Send + 'static) -> Self {
        self.fallback = Some(Box::new(f));
        self
    }

    /// Current state of this sub-operation.
    pub fn state(&self) -> SubtaskState {
        if self.group.is_joined() {
            return SubtaskState::Joined;
        }
        match &*lock(&self.slot) {
            Slot::Running | Slot::Taken => SubtaskState::Running,
            Slot::Succeeded(_) => SubtaskState::Succeeded,
            Slot::Failed => SubtaskState::Failed,
        }
    }

    /// Joins the group and returns this sub-operation's value.
    ///
    /// If the group failed (first sibling failure, deadline, or close) every handle
    /// observes that same error, unless a callback was installed with
    /// [`on_error`](Self::on_error).
    pub async fn get(self) -> Result<R, TaskError> {
        let joined = self.group.join().await;
        let slot = std::mem::replace(&mut *lock(&self.slot), Slot::Taken);

        let error = match (joined, slot) {
            (Ok(()), Slot::Succeeded(value)) => return Ok(value),
            (Err(e), _) => e,
            (Ok(()), _) => TaskError::Canceled,
        };
        match self.fallback {
            Some(f) => Ok(f(error)),
            None => Err(error),
        }
    }
}
