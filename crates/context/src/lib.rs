//! Context stack trio
//!
//! Three independent, strictly nested LIFO stacks record what operation is
//! in progress so a newly constructed stream can discover why it exists:
//!
//! - *composition*: pushed around a "compose N transforms onto a stream"
//!   call
//! - *transform-execution*: pushed immediately before a user callback of a
//!   stream-producing transform runs
//! - *subscription*: pushed around a subscribe call's synchronous extent
//!
//! ## Design Principles
//!
//! 1. **Guaranteed release**: every push returns a guard that pops its own
//!    frame on drop, including during unwinding. A panicking user callback
//!    cannot leave a frame behind, so later constructions are never
//!    mis-attributed.
//!
//! 2. **Fail-open imbalance handling**: a guard that finds foreign frames
//!    above its own drains them with a diagnostic; a guard whose frame has
//!    already vanished records a diagnostic and does nothing else.
//!
//! 3. **The disambiguation rule**: if the transform-execution stack is
//!    non-empty at construction time, the new stream is subscribe-time and
//!    inherits its origin from the top frame; otherwise it is pipe-time.

#![warn(missing_docs)]
#![warn(clippy::all)]

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;
use streamscope_core::diag::{Diagnostic, SharedDiagnostics, StackKind};
use streamscope_core::{EntityId, LifecycleEvent};

/// Frame pushed around a "compose N transforms" call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionFrame {
    /// Stream the transforms are being composed onto
    pub source: EntityId,
    /// Ordered transform names
    pub transform_names: SmallVec<[String; 4]>,
    /// Fresh composition-session id for this call
    pub group: EntityId,
}

/// Frame pushed before a stream-producing transform's user callback runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformFrame {
    /// Transform name
    pub transform_name: String,
    /// Transform instance id
    pub instance: EntityId,
    /// Subscription whose processing invoked the callback
    pub trigger_subscription: Option<EntityId>,
    /// Stream whose event invoked the callback
    pub trigger_stream: Option<EntityId>,
    /// The triggering lifecycle event
    pub trigger_event: LifecycleEvent,
}

/// Frame pushed around a subscribe call's synchronous extent.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFrame {
    /// The new subscription
    pub subscription: EntityId,
    /// The stream being subscribed
    pub stream: EntityId,
    /// Subscription one nesting level up, if any
    pub parent: Option<EntityId>,
    /// Nesting depth, 0 for a root subscription
    pub depth: usize,
}

/// Why a stream under construction exists.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOrigin {
    /// Static program composition, no subscription running
    PipeTime,
    /// Side effect of an active subscription; carries the transform frame
    /// the new stream inherits its origin fields from
    SubscribeTime(TransformFrame),
}

struct Slot<T> {
    token: u64,
    frame: T,
}

#[derive(Default)]
struct StacksInner {
    composition: Vec<Slot<CompositionFrame>>,
    transform: Vec<Slot<TransformFrame>>,
    subscription: Vec<Slot<SubscriptionFrame>>,
    next_token: u64,
}

impl StacksInner {
    fn mint_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }
}

/// The context stack trio. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ContextStacks {
    inner: Arc<Mutex<StacksInner>>,
    diagnostics: SharedDiagnostics,
}

impl ContextStacks {
    /// Create empty stacks reporting imbalances to `diagnostics`.
    pub fn new(diagnostics: SharedDiagnostics) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StacksInner::default())),
            diagnostics,
        }
    }

    // ---- composition ----

    /// Push a composition frame for the extent of one compose call.
    #[must_use = "dropping the guard pops the frame"]
    pub fn push_composition(&self, frame: CompositionFrame) -> CompositionGuard {
        let mut inner = self.inner.lock();
        let token = inner.mint_token();
        inner.composition.push(Slot { token, frame });
        CompositionGuard {
            stacks: self.clone(),
            token,
        }
    }

    /// Top composition frame, if a compose call is in progress.
    pub fn current_composition(&self) -> Option<CompositionFrame> {
        self.inner
            .lock()
            .composition
            .last()
            .map(|slot| slot.frame.clone())
    }

    // ---- transform execution ----

    /// Push a transform-execution frame for the extent of one user callback.
    #[must_use = "dropping the guard pops the frame"]
    pub fn push_transform(&self, frame: TransformFrame) -> TransformGuard {
        let mut inner = self.inner.lock();
        let token = inner.mint_token();
        inner.transform.push(Slot { token, frame });
        TransformGuard {
            stacks: self.clone(),
            token,
        }
    }

    /// Top transform-execution frame, if a user callback is running.
    pub fn current_transform(&self) -> Option<TransformFrame> {
        self.inner
            .lock()
            .transform
            .last()
            .map(|slot| slot.frame.clone())
    }

    // ---- subscription ----

    /// Push a subscription frame for a subscribe call's synchronous extent.
    ///
    /// Parent and depth are derived from the current stack top, so the
    /// returned frame is the one callers should record.
    #[must_use = "dropping the guard pops the frame"]
    pub fn push_subscription(
        &self,
        subscription: EntityId,
        stream: EntityId,
    ) -> (SubscriptionGuard, SubscriptionFrame) {
        let mut inner = self.inner.lock();
        let parent = inner
            .subscription
            .last()
            .map(|slot| slot.frame.subscription);
        let depth = inner.subscription.len();
        let frame = SubscriptionFrame {
            subscription,
            stream,
            parent,
            depth,
        };
        let token = inner.mint_token();
        inner.subscription.push(Slot {
            token,
            frame: frame.clone(),
        });
        (
            SubscriptionGuard {
                stacks: self.clone(),
                token,
            },
            frame,
        )
    }

    /// Top subscription frame, if inside a subscribe call's extent.
    pub fn current_subscription(&self) -> Option<SubscriptionFrame> {
        self.inner
            .lock()
            .subscription
            .last()
            .map(|slot| slot.frame.clone())
    }

    // ---- disambiguation ----

    /// The load-bearing rule: a non-empty transform-execution stack means
    /// the stream under construction is subscribe-time and inherits the
    /// top frame; otherwise it is pipe-time.
    pub fn origin(&self) -> StreamOrigin {
        match self.current_transform() {
            Some(frame) => StreamOrigin::SubscribeTime(frame),
            None => StreamOrigin::PipeTime,
        }
    }

    /// True when all three stacks are empty.
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock();
        inner.composition.is_empty() && inner.transform.is_empty() && inner.subscription.is_empty()
    }

    /// Test-only: drop all frames.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.composition.clear();
        inner.transform.clear();
        inner.subscription.clear();
    }

    fn release<T>(
        &self,
        kind: StackKind,
        token: u64,
        select: impl FnOnce(&mut StacksInner) -> &mut Vec<Slot<T>>,
    ) {
        let mut inner = self.inner.lock();
        let stack = select(&mut inner);
        match stack.iter().rposition(|slot| slot.token == token) {
            Some(pos) => {
                let drained = stack.len() - pos - 1;
                stack.truncate(pos);
                drop(inner);
                if drained > 0 {
                    self.diagnostics
                        .lock()
                        .push(Diagnostic::DanglingFrames { stack: kind, drained });
                }
            }
            None => {
                drop(inner);
                self.diagnostics.lock().push(Diagnostic::StackImbalance {
                    stack: kind,
                    detail: "frame already released".to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for ContextStacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ContextStacks")
            .field("composition_depth", &inner.composition.len())
            .field("transform_depth", &inner.transform.len())
            .field("subscription_depth", &inner.subscription.len())
            .finish()
    }
}

/// Scoped release for a composition frame.
#[must_use = "dropping the guard pops the frame"]
pub struct CompositionGuard {
    stacks: ContextStacks,
    token: u64,
}

impl Drop for CompositionGuard {
    fn drop(&mut self) {
        self.stacks
            .release(StackKind::Composition, self.token, |inner| {
                &mut inner.composition
            });
    }
}

/// Scoped release for a transform-execution frame.
#[must_use = "dropping the guard pops the frame"]
pub struct TransformGuard {
    stacks: ContextStacks,
    token: u64,
}

impl Drop for TransformGuard {
    fn drop(&mut self) {
        self.stacks
            .release(StackKind::Transform, self.token, |inner| {
                &mut inner.transform
            });
    }
}

/// Scoped release for a subscription frame.
#[must_use = "dropping the guard pops the frame"]
pub struct SubscriptionGuard {
    stacks: ContextStacks,
    token: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.stacks
            .release(StackKind::Subscription, self.token, |inner| {
                &mut inner.subscription
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use streamscope_core::diag::shared_diagnostics;
    use streamscope_core::ids::IdKind;

    fn stacks() -> (ContextStacks, SharedDiagnostics) {
        let diag = shared_diagnostics(16);
        (ContextStacks::new(diag.clone()), diag)
    }

    fn sid(n: u64) -> EntityId {
        EntityId::new(IdKind::Stream, n)
    }

    fn transform_frame(name: &str) -> TransformFrame {
        TransformFrame {
            transform_name: name.to_string(),
            instance: EntityId::new(IdKind::Transform, 0),
            trigger_subscription: Some(EntityId::new(IdKind::Subscription, 0)),
            trigger_stream: Some(sid(0)),
            trigger_event: LifecycleEvent::Element,
        }
    }

    #[test]
    fn test_origin_pipe_time_when_quiescent() {
        let (stacks, _) = stacks();
        assert_eq!(stacks.origin(), StreamOrigin::PipeTime);
    }

    #[test]
    fn test_origin_subscribe_time_inherits_top_frame() {
        let (stacks, _) = stacks();
        let _outer = stacks.push_transform(transform_frame("merge_map"));
        let _inner = stacks.push_transform(transform_frame("switch_map"));
        match stacks.origin() {
            StreamOrigin::SubscribeTime(frame) => {
                assert_eq!(frame.transform_name, "switch_map");
            }
            other => panic!("expected subscribe-time, got {other:?}"),
        }
    }

    #[test]
    fn test_composition_frame_does_not_imply_subscribe_time() {
        let (stacks, _) = stacks();
        let _guard = stacks.push_composition(CompositionFrame {
            source: sid(0),
            transform_names: smallvec!["map".to_string()],
            group: EntityId::new(IdKind::Composition, 0),
        });
        assert_eq!(stacks.origin(), StreamOrigin::PipeTime);
        assert!(stacks.current_composition().is_some());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let (stacks, _) = stacks();
        {
            let _guard = stacks.push_transform(transform_frame("map"));
            assert!(stacks.current_transform().is_some());
        }
        assert!(stacks.current_transform().is_none());
        assert!(stacks.is_quiescent());
    }

    #[test]
    fn test_guard_releases_during_unwind() {
        let (stacks, diag) = stacks();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = stacks.push_transform(transform_frame("merge_map"));
            panic!("user callback exploded");
        }));
        assert!(result.is_err());
        // The frame was popped despite the panic, and cleanly.
        assert!(stacks.current_transform().is_none());
        assert!(diag.lock().is_empty());
    }

    #[test]
    fn test_out_of_order_release_drains_with_diagnostic() {
        let (stacks, diag) = stacks();
        let outer = stacks.push_transform(transform_frame("outer"));
        let inner = stacks.push_transform(transform_frame("inner"));
        // Outer released first: inner's frame is drained and flagged.
        drop(outer);
        assert!(stacks.current_transform().is_none());
        assert!(matches!(
            diag.lock().entries()[0],
            Diagnostic::DanglingFrames {
                stack: StackKind::Transform,
                drained: 1
            }
        ));
        // Inner's own release then finds nothing and flags an imbalance.
        drop(inner);
        assert!(matches!(
            diag.lock().entries()[1],
            Diagnostic::StackImbalance { .. }
        ));
    }

    #[test]
    fn test_subscription_parent_and_depth() {
        let (stacks, _) = stacks();
        let root = EntityId::new(IdKind::Subscription, 0);
        let child = EntityId::new(IdKind::Subscription, 1);

        let (_g0, f0) = stacks.push_subscription(root, sid(0));
        assert_eq!(f0.parent, None);
        assert_eq!(f0.depth, 0);

        let (_g1, f1) = stacks.push_subscription(child, sid(1));
        assert_eq!(f1.parent, Some(root));
        assert_eq!(f1.depth, 1);
    }

    #[test]
    fn test_stacks_are_independent() {
        let (stacks, _) = stacks();
        let _c = stacks.push_composition(CompositionFrame {
            source: sid(0),
            transform_names: smallvec![],
            group: EntityId::new(IdKind::Composition, 0),
        });
        let (_s, _) = stacks.push_subscription(EntityId::new(IdKind::Subscription, 0), sid(0));
        // Neither of the other stacks makes the transform stack non-empty.
        assert!(stacks.current_transform().is_none());
        assert_eq!(stacks.origin(), StreamOrigin::PipeTime);
    }
}
