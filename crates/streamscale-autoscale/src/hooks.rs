//! Optional callbacks around topology changes.
//!
//! Hooks run synchronously on the session task, so they should return
//! quickly. `before_*` runs right before the request is issued; `after_*`
//! runs once the stream is active again and never after a failed change.

use std::fmt;
use std::sync::Arc;

use streamscale_client::{MergeRequest, SplitRequest};

pub type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Clone, Default)]
pub struct LifecycleHooks {
    pub before_split: Option<Hook<SplitRequest>>,
    pub after_split: Option<Hook<SplitRequest>>,
    pub before_merge: Option<Hook<MergeRequest>>,
    pub after_merge: Option<Hook<MergeRequest>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_split(mut self, f: impl Fn(&SplitRequest) + Send + Sync + 'static) -> Self {
        self.before_split = Some(Arc::new(f));
        self
    }

    pub fn after_split(mut self, f: impl Fn(&SplitRequest) + Send + Sync + 'static) -> Self {
        self.after_split = Some(Arc::new(f));
        self
    }

    pub fn before_merge(mut self, f: impl Fn(&MergeRequest) + Send + Sync + 'static) -> Self {
        self.before_merge = Some(Arc::new(f));
        self
    }

    pub fn after_merge(mut self, f: impl Fn(&MergeRequest) + Send + Sync + 'static) -> Self {
        self.after_merge = Some(Arc::new(f));
        self
    }
}

pub(crate) fn run<T>(hook: &Option<Hook<T>>, request: &T) {
    if let Some(f) = hook {
        f(request);
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("before_split", &self.before_split.is_some())
            .field("after_split", &self.after_split.is_some())
            .field("before_merge", &self.before_merge.is_some())
            .field("after_merge", &self.after_merge.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builder_sets_only_named_hooks() {
        let hooks = LifecycleHooks::new().before_split(|_| {}).after_merge(|_| {});
        assert_eq!(
            format!("{hooks:?}"),
            "LifecycleHooks { before_split: true, after_split: false, before_merge: false, after_merge: true }"
        );
    }

    #[test]
    fn run_invokes_present_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hooks = LifecycleHooks::new().before_split(move |req| {
            assert_eq!(req.partition_to_split, "shardId-000000000000");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let req = SplitRequest {
            stream_name: "events".into(),
            partition_to_split: "shardId-000000000000".into(),
            new_starting_hash_key: 50u64.into(),
        };
        run(&hooks.before_split, &req);
        run(&hooks.after_split, &req);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
