use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::{
    api::{RemoteError, ReplyId},
    Error,
};

/// Something the viewer can switch on and off
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ToggleTarget {
    QuestionLike,
    ReplyLike(ReplyId),
    Saved,
}

/// Viewer flag plus the displayed counter that goes with it, if any
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Toggle {
    pub on: bool,
    pub count: Option<u64>,
}

impl Toggle {
    /// Local guess at what flipping the flag does
    pub fn flipped(self) -> Toggle {
        let count = self.count.map(|c| match self.on {
            true => c.saturating_sub(1),
            false => c + 1,
        });
        Toggle {
            on: !self.on,
            count,
        }
    }

    /// The store's count wins over our guess
    pub fn reconciled(self, remote_count: Option<u64>) -> Toggle {
        match (self.count, remote_count) {
            (Some(_), Some(remote)) => Toggle {
                on: self.on,
                count: Some(remote),
            },
            _ => self,
        }
    }
}

/// Applies toggles locally before the store confirms them
///
/// Toggles of the same target are run one after the other, in the order they
/// were requested, so each one starts from the settled result of the previous.
#[derive(Debug, Default)]
pub struct OptimisticMutator {
    turns: Mutex<HashMap<ToggleTarget, Arc<tokio::sync::Mutex<()>>>>,
}

struct Turn<'a> {
    mutator: &'a OptimisticMutator,
    target: ToggleTarget,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut turns = self.mutator.turns.lock();
        // ours and the map's: nobody is waiting
        if turns
            .get(&self.target)
            .map_or(false, |t| Arc::strong_count(t) <= 2)
        {
            turns.remove(&self.target);
        }
    }
}

impl OptimisticMutator {
    pub fn new() -> OptimisticMutator {
        OptimisticMutator::default()
    }

    /// Whether a toggle of `target` is running or waiting
    pub fn in_flight(&self, target: &ToggleTarget) -> bool {
        self.turns.lock().contains_key(target)
    }

    async fn begin(&self, target: &ToggleTarget) -> Turn<'_> {
        let lock = self
            .turns
            .lock()
            .entry(target.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        Turn {
            mutator: self,
            target: target.clone(),
            _guard: lock.lock_owned().await,
        }
    }

    /// Flip `target`
    ///
    /// `read` fetches the current state once it is our turn, `write` stores a
    /// new state, and `remote` tells the store about the requested flag value.
    /// On remote failure the state from before is written back and the error
    /// returned.
    pub async fn toggle<R, W, F, Fut>(
        &self,
        target: ToggleTarget,
        read: R,
        write: W,
        remote: F,
    ) -> Result<Toggle, Error>
    where
        R: FnOnce() -> Result<Toggle, Error>,
        W: Fn(Toggle),
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<Option<u64>, RemoteError>>,
    {
        let _turn = self.begin(&target).await;
        let before = read()?;
        let optimistic = before.flipped();
        write(optimistic);
        tracing::debug!(?target, ?before, ?optimistic, "applied optimistic toggle");
        match remote(optimistic.on).await {
            Ok(remote_count) => {
                let settled = optimistic.reconciled(remote_count);
                write(settled);
                Ok(settled)
            }
            Err(err) => {
                tracing::warn!(?target, ?err, "toggle failed remotely, rolling back");
                write(before);
                Err(Error::Remote(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;
    use futures::channel::oneshot;

    fn liked(on: bool, count: u64) -> Toggle {
        Toggle {
            on,
            count: Some(count),
        }
    }

    #[test]
    fn flip_adjusts_count() {
        assert_eq!(liked(false, 2).flipped(), liked(true, 3));
        assert_eq!(liked(true, 3).flipped(), liked(false, 2));
        // never below zero
        assert_eq!(liked(true, 0).flipped(), liked(false, 0));
        let saved = Toggle {
            on: false,
            count: None,
        };
        assert_eq!(saved.flipped(), Toggle { on: true, count: None });
    }

    #[test]
    fn reconcile_prefers_remote_count() {
        assert_eq!(liked(true, 3).reconciled(Some(7)), liked(true, 7));
        assert_eq!(liked(true, 3).reconciled(None), liked(true, 3));
        let saved = Toggle {
            on: true,
            count: None,
        };
        assert_eq!(saved.reconciled(Some(4)), saved);
    }

    #[tokio::test]
    async fn success_reconciles() {
        let m = OptimisticMutator::new();
        let state = Mutex::new(liked(false, 2));
        let res = m
            .toggle(
                ToggleTarget::QuestionLike,
                || Ok(*state.lock()),
                |t| *state.lock() = t,
                |on| async move {
                    assert!(on);
                    Ok(Some(10))
                },
            )
            .await;
        assert_eq!(res, Ok(liked(true, 10)));
        assert_eq!(*state.lock(), liked(true, 10));
        assert!(!m.in_flight(&ToggleTarget::QuestionLike));
    }

    #[tokio::test]
    async fn failure_rolls_back() {
        let m = OptimisticMutator::new();
        let state = Mutex::new(liked(true, 5));
        let res = m
            .toggle(
                ToggleTarget::ReplyLike(ReplyId::from("r1")),
                || Ok(*state.lock()),
                |t| *state.lock() = t,
                |_| async { Err(RemoteError::new("offline")) },
            )
            .await;
        assert_eq!(res, Err(Error::Remote(RemoteError::new("offline"))));
        assert_eq!(*state.lock(), liked(true, 5));
    }

    #[tokio::test]
    async fn failed_read_touches_nothing() {
        let m = OptimisticMutator::new();
        let writes = Mutex::new(0);
        let res = m
            .toggle(
                ToggleTarget::ReplyLike(ReplyId::from("gone")),
                || Err(ValidationError::UnknownReply(ReplyId::from("gone")).into()),
                |_| *writes.lock() += 1,
                |_| async { Ok(None) },
            )
            .await;
        assert!(matches!(
            res,
            Err(Error::Validation(ValidationError::UnknownReply(_)))
        ));
        assert_eq!(*writes.lock(), 0);
    }

    #[tokio::test]
    async fn same_target_toggles_are_serialized() {
        let m = OptimisticMutator::new();
        let state = Mutex::new(liked(false, 2));
        let target = ToggleTarget::ReplyLike(ReplyId::from("r1"));
        let (release_first, first_response) = oneshot::channel::<()>();
        let requested = Mutex::new(Vec::new());

        let first = m.toggle(
            target.clone(),
            || Ok(*state.lock()),
            |t| *state.lock() = t,
            |on| {
                requested.lock().push(on);
                async move {
                    first_response.await.expect("first response");
                    Ok(Some(3))
                }
            },
        );
        let second = m.toggle(
            target.clone(),
            || Ok(*state.lock()),
            |t| *state.lock() = t,
            |on| {
                requested.lock().push(on);
                async move { Ok(Some(2)) }
            },
        );
        let release = async {
            // by now the first toggle is waiting on the store, the second on its turn
            assert_eq!(*requested.lock(), vec![true]);
            assert_eq!(*state.lock(), liked(true, 3));
            assert!(m.in_flight(&target));
            release_first.send(()).expect("releasing first response");
        };
        let (first, second, ()) = futures::join!(first, second, release);

        assert_eq!(first, Ok(liked(true, 3)));
        assert_eq!(second, Ok(liked(false, 2)));
        assert_eq!(*requested.lock(), vec![true, false]);
        assert_eq!(*state.lock(), liked(false, 2));
        assert!(!m.in_flight(&target));
    }
}
