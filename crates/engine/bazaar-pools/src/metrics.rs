use lazy_static::lazy_static;
use prometheus::{opts, register_int_gauge, IntGauge};

lazy_static! {
    pub static ref POOL_CURRENT_SIZE: IntGauge = register_int_gauge!(opts!(
        "bazaar_pool_current_size",
        "Activities currently owned by the pool (idle plus checked out)"
    ))
    .unwrap();
    pub static ref POOL_IDLE_SIZE: IntGauge = register_int_gauge!(opts!(
        "bazaar_pool_idle_size",
        "Prepared activities waiting in the idle queue"
    ))
    .unwrap();
    pub static ref POOL_TARGET_SIZE: IntGauge = register_int_gauge!(opts!(
        "bazaar_pool_target_size",
        "Configured target number of pooled activities"
    ))
    .unwrap();
}

pub fn record_pool_sizes(current: usize, idle: usize, target: usize) {
    POOL_CURRENT_SIZE.set(current as i64);
    POOL_IDLE_SIZE.set(idle as i64);
    POOL_TARGET_SIZE.set(target as i64);
}
