//! Queue worker process: wires configuration, the Redis store and the
//! submission handler into a running worker.

pub mod handlers;
pub mod shutdown;
