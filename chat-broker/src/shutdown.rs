use tokio_util::sync::CancellationToken;

/// Process-wide cancellation handle.
///
/// Cloning is cheap and every clone observes the same trigger. Once fired the
/// handle stays fired.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Fires the signal. Calling it again is a no-op.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has fired, immediately if it already has.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}
