use std::sync::Arc;

/// Business logic of a concrete service.
///
/// The lifecycle core calls these hooks at the appropriate point of a
/// transition. Any `Err` is treated the same way: it is logged and turned
/// into a FAILED state, never returned to the caller of the lifecycle
/// operation.
pub trait ServiceLogic: Send + Sync {
    fn do_start(&self) -> anyhow::Result<()>;

    fn do_stop(&self) -> anyhow::Result<()>;

    /// Often nothing to do; override when a service keeps state across runs
    fn do_reset(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: ServiceLogic + ?Sized> ServiceLogic for Arc<T> {
    fn do_start(&self) -> anyhow::Result<()> {
        (**self).do_start()
    }

    fn do_stop(&self) -> anyhow::Result<()> {
        (**self).do_stop()
    }

    fn do_reset(&self) -> anyhow::Result<()> {
        (**self).do_reset()
    }
}
