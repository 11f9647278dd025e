//! Exchange names, queue names, and routing-key conventions.
//!
//! These string constants are the de-facto schema shared with collaborator
//! processes and must be preserved bit-exact for interoperability.
//!
//! Routing keys are hierarchical `facility.instance-id` strings. Topic
//! exchanges give targeted, filterable delivery (per-meter readings,
//! per-camera commands); fanout exchanges give broadcast (global stop
//! signals, "something changed" notifications). Topic + durable named queue
//! means exactly one of N workers eventually processes a message and it
//! survives worker restarts; fanout + exclusive auto-named queue means only
//! active listeners see it and there is no backlog.

/// Topic exchange carrying meter readings.
pub const METERS_EXCHANGE: &str = "meters";
/// Facility segment of meter routing keys.
pub const METER_FACILITY: &str = "meter";
/// Durable shared queue for the meter-persisting worker pool.
pub const METERS_DB_QUEUE: &str = "meters_db_queue";
/// Topic exchange carrying post-update notifications from the meter workers.
pub const METERS_UPDATES_EXCHANGE: &str = "meters_db_updates";

/// Topic exchange carrying camera start tasks.
pub const CAM_TASKS_EXCHANGE: &str = "cam_tasks";
/// Facility segment of camera-task routing keys.
pub const CAM_TASK_FACILITY: &str = "cam.task";
/// Durable shared queue for the camera worker pool.
///
/// Declared durable here so queued tasks survive a broker restart; a
/// collaborator that declares the same queue non-durable will hit a
/// topology conflict at startup. Both sides must agree on the flag.
pub const CAM_TASKS_QUEUE: &str = "cam_tasks_queue";
/// Fanout exchange broadcasting camera stop commands to all workers.
pub const CAM_STOP_EXCHANGE: &str = "cam_stop";

/// Topic exchange for chat broadcast.
pub const CHAT_EXCHANGE: &str = "chat";

/// Fanout exchange for product-change notifications.
pub const PRODUCTS_UPDATE_EXCHANGE: &str = "products_update";

/// Routing key for one meter instance: `meter.<id>`.
pub fn meter_key(meter_id: &str) -> String {
    format!("{}.{}", METER_FACILITY, meter_id)
}

/// Routing key for one camera task: `cam.task.<id>`.
pub fn cam_task_key(cam_id: i64) -> String {
    format!("{}.{}", CAM_TASK_FACILITY, cam_id)
}

/// Wildcard binding pattern matching every instance of a facility.
pub fn all_of(facility: &str) -> String {
    format!("{}.#", facility)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_key() {
        assert_eq!(meter_key("m1"), "meter.m1");
    }

    #[test]
    fn test_cam_task_key() {
        assert_eq!(cam_task_key(42), "cam.task.42");
    }

    #[test]
    fn test_wildcard_patterns() {
        assert_eq!(all_of(METER_FACILITY), "meter.#");
        assert_eq!(all_of(CAM_TASK_FACILITY), "cam.task.#");
    }

    /// The constants are the interop contract with collaborator processes;
    /// a rename here silently partitions the system.
    #[test]
    fn test_interop_names_are_fixed() {
        assert_eq!(METERS_EXCHANGE, "meters");
        assert_eq!(METERS_DB_QUEUE, "meters_db_queue");
        assert_eq!(METERS_UPDATES_EXCHANGE, "meters_db_updates");
        assert_eq!(CAM_TASKS_EXCHANGE, "cam_tasks");
        assert_eq!(CAM_TASKS_QUEUE, "cam_tasks_queue");
        assert_eq!(CAM_STOP_EXCHANGE, "cam_stop");
        assert_eq!(CHAT_EXCHANGE, "chat");
        assert_eq!(PRODUCTS_UPDATE_EXCHANGE, "products_update");
    }
}
