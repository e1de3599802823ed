//! Render Error Routing
//!
//! A render failure climbs the error chain: the failing widget's own hook,
//! then each ancestor widget's hook, then the process-wide root hook. The
//! first hook to claim the error supplies a replacement node; an unclaimed
//! error is logged and the subtree degrades to a comment placeholder.
//!
//! An error raised inside a hook is only logged; routing continues with the
//! original error so a broken hook cannot start a loop.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{ErrorInfo, RenderError};
use crate::tree::vnode::{self, NodeKind, VNode};

/// An error hook: claim the error by returning a replacement node, or pass
/// it on with `Ok(None)`.
pub type ErrorHook =
    Arc<dyn Fn(&RenderError, &ErrorInfo) -> Result<Option<VNode>, RenderError> + Send + Sync>;

static ROOT_HOOK: OnceLock<RwLock<Option<ErrorHook>>> = OnceLock::new();

fn root_slot() -> &'static RwLock<Option<ErrorHook>> {
    ROOT_HOOK.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide fallback hook, consulted after every ancestor
/// hook has passed.
pub fn set_root_error_hook(hook: ErrorHook) {
    *root_slot().write() = Some(hook);
}

pub fn clear_root_error_hook() {
    *root_slot().write() = None;
}

fn root_error_hook() -> Option<ErrorHook> {
    root_slot().read().clone()
}

/// Route a render error up the chain, returning the node to render in
/// place of the failed subtree.
pub(crate) fn route_error(origin: Option<&VNode>, error: &RenderError, info: &ErrorInfo) -> VNode {
    let mut hooks: Vec<ErrorHook> = Vec::new();
    let mut current = origin.cloned();
    while let Some(node) = current {
        if let NodeKind::Widget(def) = node.kind() {
            if let Some(hook) = def.error_hook() {
                hooks.push(hook);
            }
        }
        current = vnode::parent_of(&node);
    }
    if let Some(root) = root_error_hook() {
        hooks.push(root);
    }

    for hook in hooks {
        match hook(error, info) {
            Ok(Some(replacement)) => return replacement,
            Ok(None) => {}
            Err(hook_error) => {
                tracing::error!(
                    hook_error = %hook_error,
                    original = %error,
                    "error hook raised; continuing with the original error"
                );
            }
        }
    }

    tracing::error!(
        widget = info.widget.as_deref().unwrap_or("<unknown>"),
        phase = info.phase,
        error = %error,
        "unhandled render error"
    );
    VNode::comment("render error")
}

#[cfg(test)]
mod tests {
    use super::*;

    // The root hook is process-wide; serialize tests that touch it.
    static HOOK_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

    #[test]
    fn unclaimed_error_degrades_to_a_comment() {
        let _guard = HOOK_LOCK.lock();
        clear_root_error_hook();
        let error = RenderError::new("boom");
        let node = route_error(None, &error, &ErrorInfo::default());
        assert!(matches!(node.kind(), NodeKind::Comment));
    }

    #[test]
    fn root_hook_claims_the_error() {
        let _guard = HOOK_LOCK.lock();
        set_root_error_hook(Arc::new(|error, _| {
            Ok(Some(VNode::text(&format!("caught: {error}"))))
        }));
        let node = route_error(None, &RenderError::new("boom"), &ErrorInfo::default());
        assert_eq!(node.content(), "caught: boom");
        clear_root_error_hook();
    }

    #[test]
    fn failing_hook_is_skipped() {
        let _guard = HOOK_LOCK.lock();
        set_root_error_hook(Arc::new(|_, _| Err(RenderError::new("hook broke"))));
        let node = route_error(None, &RenderError::new("boom"), &ErrorInfo::default());
        assert!(matches!(node.kind(), NodeKind::Comment));
        clear_root_error_hook();
    }
}
