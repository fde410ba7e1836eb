//! Cost tracking and anomaly detection over the task/run stream (C11, C12).

pub mod anomaly;
pub mod cost;
