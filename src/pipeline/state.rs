//! Pipeline state store — the single source of truth stages read from and
//! write to.
//!
//! [`PipelineStore`] holds at most one current [`Artifact`] per stage, the
//! readiness flag of each stage, and the in-memory credential map.  It is
//! confined to the control thread: it uses `Cell`/`RefCell` rather than
//! locks, so the compiler rejects any attempt to move it onto a worker.
//! Readers on other threads take a [`StateSnapshot`] instead.
//!
//! Subscribers registered with [`subscribe`](PipelineStore::subscribe) are
//! notified synchronously, in registration order, after `set` has committed
//! both the artifact and the `Ready` flag.  Any mutation attempted while a
//! notification is running fails with [`PipelineError::ReentrantMutation`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;

use super::artifact::{Artifact, Readiness, Stage};
use super::error::PipelineError;
use crate::config::ProviderKind;
use crate::llm::Credential;

/// Subscriber callback invoked with the artifact a stage just produced.
pub type Listener = Box<dyn FnMut(&Artifact) -> Result<(), PipelineError>>;

/// Shared handle to the control thread's store.
pub type SharedStore = Rc<PipelineStore>;

#[derive(Default)]
struct Slots {
    artifacts: [Option<Artifact>; 3],
    readiness: [Readiness; 3],
    credentials: HashMap<ProviderKind, Credential>,
}

// ---------------------------------------------------------------------------
// PipelineStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct PipelineStore {
    slots: RefCell<Slots>,
    listeners: RefCell<Vec<(Stage, Listener)>>,
    notifying: Cell<Option<Stage>>,
}

impl PipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a store behind an `Rc` for sharing between controllers.
    pub fn shared() -> SharedStore {
        Rc::new(Self::new())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Copy of the latest artifact produced by `stage`.
    pub fn get(&self, stage: Stage) -> Option<Artifact> {
        self.slots.borrow().artifacts[stage.index()].clone()
    }

    pub fn readiness(&self, stage: Stage) -> Readiness {
        self.slots.borrow().readiness[stage.index()]
    }

    /// Copy of the credential for `provider`.
    pub fn get_credential(&self, provider: ProviderKind) -> Option<Credential> {
        self.slots.borrow().credentials.get(&provider).cloned()
    }

    /// Owned, thread-safe copy of artifacts and readiness flags.
    /// Credentials are never included.
    pub fn snapshot(&self) -> StateSnapshot {
        let slots = self.slots.borrow();
        StateSnapshot {
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageSnapshot {
                    stage,
                    readiness: slots.readiness[stage.index()],
                    artifact: slots.artifacts[stage.index()].clone(),
                })
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Replace the artifact of `stage`, mark it `Ready`, then notify the
    /// stage's subscribers in registration order.
    ///
    /// The first subscriber error stops notification and is returned.
    pub fn set(&self, stage: Stage, artifact: Artifact) -> Result<(), PipelineError> {
        self.guard(stage)?;
        debug_assert_eq!(artifact.stage(), stage, "artifact stored under wrong stage");

        {
            let mut slots = self.slots.borrow_mut();
            slots.artifacts[stage.index()] = Some(artifact.clone());
            slots.readiness[stage.index()] = Readiness::Ready;
        }
        log::debug!(target: stage.log_target(), "state: {stage} artifact ready");

        self.notify(stage, &artifact)
    }

    /// Move `stage` to `Running`.  Fails with `NotReady` when its strict
    /// upstream stage has no ready artifact.
    pub fn mark_running(&self, stage: Stage) -> Result<(), PipelineError> {
        self.guard(stage)?;
        let mut slots = self.slots.borrow_mut();
        if let Some(upstream) = stage.upstream() {
            if slots.readiness[upstream.index()] != Readiness::Ready {
                return Err(PipelineError::NotReady { stage, upstream });
            }
        }
        slots.readiness[stage.index()] = Readiness::Running;
        Ok(())
    }

    /// Flag `stage` as `Failed`.  Its previous artifact, if any, is kept.
    pub fn mark_failed(&self, stage: Stage) -> Result<(), PipelineError> {
        self.guard(stage)?;
        self.slots.borrow_mut().readiness[stage.index()] = Readiness::Failed;
        Ok(())
    }

    /// Return `stage` to the flag its stored artifact implies: `Ready` when
    /// an earlier run succeeded, `Pending` otherwise.  Used after a cancel.
    pub fn settle(&self, stage: Stage) -> Result<(), PipelineError> {
        self.guard(stage)?;
        let mut slots = self.slots.borrow_mut();
        slots.readiness[stage.index()] = if slots.artifacts[stage.index()].is_some() {
            Readiness::Ready
        } else {
            Readiness::Pending
        };
        Ok(())
    }

    pub fn set_credential(
        &self,
        provider: ProviderKind,
        secret: Credential,
    ) -> Result<(), PipelineError> {
        self.guard(Stage::Summarize)?;
        self.slots.borrow_mut().credentials.insert(provider, secret);
        Ok(())
    }

    pub fn clear_credentials(&self) {
        self.slots.borrow_mut().credentials.clear();
    }

    /// Register `listener` for `Ready` transitions of `stage`.
    pub fn subscribe(&self, stage: Stage, listener: Listener) -> Result<(), PipelineError> {
        self.guard(stage)?;
        self.listeners.borrow_mut().push((stage, listener));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn guard(&self, stage: Stage) -> Result<(), PipelineError> {
        match self.notifying.get() {
            Some(_) => Err(PipelineError::ReentrantMutation(stage)),
            None => Ok(()),
        }
    }

    fn notify(&self, stage: Stage, artifact: &Artifact) -> Result<(), PipelineError> {
        self.notifying.set(Some(stage));
        let result = self
            .listeners
            .borrow_mut()
            .iter_mut()
            .filter(|(s, _)| *s == stage)
            .try_for_each(|(_, listener)| listener(artifact));
        self.notifying.set(None);
        result
    }
}

impl Drop for PipelineStore {
    fn drop(&mut self) {
        self.slots.get_mut().credentials.clear();
    }
}

// ---------------------------------------------------------------------------
// StateSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of one stage's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub readiness: Readiness,
    pub artifact: Option<Artifact>,
}

/// Point-in-time copy of the whole store, safe to send across threads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub stages: Vec<StageSnapshot>,
}

impl StateSnapshot {
    pub fn stage(&self, stage: Stage) -> &StageSnapshot {
        &self.stages[stage.index()]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(path: &str) -> Artifact {
        Artifact::AudioFile {
            path: path.into(),
            source_url: None,
        }
    }

    fn transcript(text: &str) -> Artifact {
        Artifact::Transcript {
            text: text.into(),
            source_audio_path: "/tmp/a.mp3".into(),
            language: "en".into(),
        }
    }

    #[test]
    fn get_is_none_until_set() {
        let store = PipelineStore::new();
        for stage in Stage::ALL {
            assert!(store.get(stage).is_none());
            assert_eq!(store.readiness(stage), Readiness::Pending);
        }
    }

    #[test]
    fn set_replaces_and_marks_ready() {
        let store = PipelineStore::new();
        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        store.set(Stage::Fetch, audio("/tmp/b.mp3")).unwrap();

        assert_eq!(store.get(Stage::Fetch), Some(audio("/tmp/b.mp3")));
        assert_eq!(store.readiness(Stage::Fetch), Readiness::Ready);
        assert!(store.get(Stage::Transcribe).is_none());
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let store = PipelineStore::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Rc::clone(&seen);
            store
                .subscribe(
                    Stage::Fetch,
                    Box::new(move |a| {
                        seen.borrow_mut()
                            .push(format!("{tag}:{}", a.audio_path().unwrap().display()));
                        Ok(())
                    }),
                )
                .unwrap();
        }
        let other = Rc::clone(&seen);
        store
            .subscribe(
                Stage::Transcribe,
                Box::new(move |_| {
                    other.borrow_mut().push("transcribe".into());
                    Ok(())
                }),
            )
            .unwrap();

        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec!["first:/tmp/a.mp3".to_string(), "second:/tmp/a.mp3".to_string()]
        );
    }

    #[test]
    fn subscriber_can_read_committed_state() {
        let store = PipelineStore::shared();
        let observed = Rc::new(Cell::new(Readiness::Pending));

        let weak = Rc::downgrade(&store);
        let sink = Rc::clone(&observed);
        store
            .subscribe(
                Stage::Fetch,
                Box::new(move |_| {
                    let store = weak.upgrade().expect("store alive");
                    sink.set(store.readiness(Stage::Fetch));
                    Ok(())
                }),
            )
            .unwrap();

        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        assert_eq!(observed.get(), Readiness::Ready);
    }

    #[test]
    fn reentrant_set_is_rejected() {
        let store = PipelineStore::shared();
        let weak = Rc::downgrade(&store);
        store
            .subscribe(
                Stage::Fetch,
                Box::new(move |_| {
                    let store = weak.upgrade().expect("store alive");
                    store.set(Stage::Transcribe, transcript("nested"))
                }),
            )
            .unwrap();

        let err = store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap_err();
        assert!(matches!(err, PipelineError::ReentrantMutation(Stage::Transcribe)));
        // The outer write committed; the nested one did not.
        assert!(store.get(Stage::Fetch).is_some());
        assert!(store.get(Stage::Transcribe).is_none());

        // Guard is released once notification ends.
        store.set(Stage::Transcribe, transcript("later")).unwrap();
    }

    #[test]
    fn transcribe_cannot_run_without_ready_fetch() {
        let store = PipelineStore::new();
        let err = store.mark_running(Stage::Transcribe).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NotReady {
                stage: Stage::Transcribe,
                upstream: Stage::Fetch
            }
        ));

        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        store.mark_running(Stage::Transcribe).unwrap();
        assert_eq!(store.readiness(Stage::Transcribe), Readiness::Running);
    }

    #[test]
    fn summarize_has_no_strict_dependency() {
        let store = PipelineStore::new();
        store.mark_running(Stage::Summarize).unwrap();
        assert_eq!(store.readiness(Stage::Summarize), Readiness::Running);
    }

    #[test]
    fn failure_keeps_previous_artifact() {
        let store = PipelineStore::new();
        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        store.mark_running(Stage::Fetch).unwrap();
        store.mark_failed(Stage::Fetch).unwrap();

        assert_eq!(store.readiness(Stage::Fetch), Readiness::Failed);
        assert_eq!(store.get(Stage::Fetch), Some(audio("/tmp/a.mp3")));
    }

    #[test]
    fn settle_restores_ready_or_pending() {
        let store = PipelineStore::new();
        store.mark_running(Stage::Fetch).unwrap();
        store.settle(Stage::Fetch).unwrap();
        assert_eq!(store.readiness(Stage::Fetch), Readiness::Pending);

        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();
        store.mark_running(Stage::Fetch).unwrap();
        store.settle(Stage::Fetch).unwrap();
        assert_eq!(store.readiness(Stage::Fetch), Readiness::Ready);
    }

    #[test]
    fn credentials_are_copied_out() {
        let store = PipelineStore::new();
        assert!(store.get_credential(ProviderKind::Claude).is_none());

        store
            .set_credential(ProviderKind::Claude, Credential::new("sk-ant-1"))
            .unwrap();
        let copy = store.get_credential(ProviderKind::Claude).unwrap();
        assert_eq!(copy.expose(), "sk-ant-1");

        store.clear_credentials();
        assert!(store.get_credential(ProviderKind::Claude).is_none());
    }

    #[test]
    fn snapshot_is_send_and_excludes_credentials() {
        fn assert_send<T: Send + Sync + Clone>() {}
        assert_send::<StateSnapshot>();

        let store = PipelineStore::new();
        store
            .set_credential(ProviderKind::OpenAi, Credential::new("sk-secret"))
            .unwrap();
        store.set(Stage::Fetch, audio("/tmp/a.mp3")).unwrap();

        let snap = store.snapshot();
        assert_eq!(snap.stage(Stage::Fetch).readiness, Readiness::Ready);
        assert_eq!(snap.stage(Stage::Summarize).artifact, None);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
