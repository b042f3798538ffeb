//! Sample consumers.

use daq_pool::{Sample, SampleElement};
use std::sync::Arc;

/// Receiver of distributed samples.
///
/// # Contract
///
/// - `receive()` runs on the publishing thread and should return quickly
/// - the sample is borrowed; call [`Sample::hold`] to keep it past the call
/// - a client may subscribe or unsubscribe itself from inside `receive()`
pub trait SampleClient<T: SampleElement>: Send + Sync {
    /// Handle one sample. Returns false if the sample was rejected.
    fn receive(&self, sample: &Sample<T>) -> bool;

    /// Push out anything buffered.
    fn flush(&self) {}

    /// Name for logs.
    fn name(&self) -> &str {
        "unnamed_client"
    }
}

impl<T, F> SampleClient<T> for F
where
    T: SampleElement,
    F: Fn(&Sample<T>) -> bool + Send + Sync,
{
    fn receive(&self, sample: &Sample<T>) -> bool {
        self(sample)
    }
}

/// Address of the client object, ignoring the vtable.
pub(crate) fn client_key<T: SampleElement>(client: &Arc<dyn SampleClient<T>>) -> usize {
    Arc::as_ptr(client) as *const () as usize
}
