//! Worker pools: fixed-size (steady, balanced) and elastic.
//!
//! The fixed pools shard one queue per worker and place submissions on the
//! least busy slot; the elastic pool funnels everything through a shared
//! queue so its worker set can change at runtime.

mod balanced;
mod elastic;
mod fixed;
mod slot;
mod steady;

pub use balanced::BalancedPool;
pub use elastic::ElasticPool;
pub use steady::SteadyPool;
