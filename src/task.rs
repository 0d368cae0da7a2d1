use tokio::task::JoinHandle;

/// Spawned task that is aborted when the handle is dropped.
pub struct AutoCancelTask<T>(pub JoinHandle<T>);

impl<T> AutoCancelTask<T> {
    pub fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl<T> Drop for AutoCancelTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
