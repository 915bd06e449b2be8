/// Synchronous side channel for notices the user must see before a flow aborts.
///
/// Implementations decide how the notice is rendered (terminal, JSON-RPC notification, ...).
/// `notify` must not return before the notice has been handed to its sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}
