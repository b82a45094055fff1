use anyhow::Result;

/// Every command runs on a current thread runtime. Starting a detached tracker forks, and a fork
/// must never happen while runtime worker threads exist, so runtimes are built per step and
/// dropped before detaching.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
