//! Offload pools: OS threads for blocking calls, fibers for deferred and
//! fire-and-forget work

mod fiberpool;
mod threadpool;

pub(crate) use fiberpool::FiberPool;
pub(crate) use threadpool::{Job, ThreadPool};
